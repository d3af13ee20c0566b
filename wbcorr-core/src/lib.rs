//! Core types for reconciling a water-balance model with storage observations.
//!
//! Provides dated series with an explicit missing marker, the flat formula
//! language used to combine balance terms, alignment of observation feeds
//! onto the model's date axis, and the raster access seam used to read and
//! rewrite variable stacks.

pub mod errors;
pub mod formula;
pub mod interpolate;
pub mod observation;
pub mod raster;
pub mod spatial;
pub mod timeseries;
pub mod timeseries_collection;
