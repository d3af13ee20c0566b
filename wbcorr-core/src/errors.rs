use chrono::NaiveDate;
use thiserror::Error;

/// Error type for water-balance correction operations.
#[derive(Error, Debug)]
pub enum WbError {
    #[error("Malformed formula '{formula}': {reason}")]
    MalformedFormula { formula: String, reason: String },
    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("Timeseries '{variable}' has {found} values but the formula axis has {expected}")]
    AxisMismatch {
        variable: String,
        expected: usize,
        found: usize,
    },
    #[error("Index {index} is out of range for a timeseries of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Invalid timeseries: {0}")]
    InvalidTimeSeries(String),
    #[error("Observation feed record {record}: {reason}")]
    ObservationFormat { record: usize, reason: String },
    #[error("Inconsistent grids: {0}")]
    InconsistentGrid(String),
    #[error("Variable '{variable}' has no raster for {date}")]
    MissingDate { variable: String, date: NaiveDate },
    #[error("The observation series does not overlap the model dates")]
    EmptyOverlap,
    #[error("Optimization failed: {0}")]
    Optimization(String),
    #[error("Correction factor must be finite and non-negative, got {0}")]
    InvalidFactor(f64),
    #[error("Raster access failed for {path}: {reason}")]
    Raster { path: String, reason: String },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WbError {
    pub fn malformed(formula: &str, reason: impl Into<String>) -> Self {
        WbError::MalformedFormula {
            formula: formula.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience type for `Result<T, WbError>`.
pub type WbResult<T> = Result<T, WbError>;
