//! Calibration of a single water-balance term.
//!
//! The workflow has three stages:
//!
//! 1. [`calibration::compute_variable_means`] reduces the gridded inputs to
//!    basin-mean time series on a shared date axis.
//! 2. [`calibration::fit_correction`] finds the non-negative factor for one
//!    term of the balance formula so that the cumulative balance tracks the
//!    observed storage change.
//! 3. [`correction::apply_factor`] writes the corrected grids back.

pub mod calibration;
pub mod correction;
pub mod solver;

pub use calibration::{
    compute_variable_means, fit_correction, storage_curves, CalibrationResult, StorageCurves,
};
pub use correction::{apply_factor, correct_series};
pub use solver::{fit_scale_factor, SolverConfig, SolverOutcome};
