//! Water-balance correction against satellite storage observations.
//!
//! A balance formula such as `p-et-tr` combines basin-mean series of gridded
//! variables. Its cumulative sum is compared with an observed storage-change
//! series and the last term is rescaled by a single non-negative factor so
//! that the two agree in the least-squares sense. The factor is then applied
//! to every raster of that variable.
//!
//! [`correct_variable`] runs the whole workflow from a [`RunContext`]; the
//! stages are available separately in [`wbcorr_core`] and
//! [`wbcorr_calibrate`].

pub mod context;
pub mod pipeline;

pub use context::RunContext;
pub use pipeline::{correct_variable, correct_with_observation};
pub use wbcorr_calibrate;
pub use wbcorr_core;
