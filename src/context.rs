use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use wbcorr_calibrate::solver::SolverConfig;
use wbcorr_core::errors::{WbError, WbResult};
use wbcorr_core::formula::Formula;
use wbcorr_core::observation::FeedFormat;

/// Everything a correction run needs besides the raster stacks.
///
/// ```toml
/// formula = "p-et-tr"
/// mask_path = "basin_mask.tif"
/// observation_path = "grace_ds.csv"
///
/// [feed]
/// value_column = "dS [mm]"
///
/// [solver]
/// patience = 200
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// Balance formula; its last term is the corrected variable
    pub formula: String,
    /// Grid whose data cells delimit the basin
    pub mask_path: PathBuf,
    /// Storage-change observation feed
    pub observation_path: PathBuf,
    #[serde(default)]
    pub feed: FeedFormat,
    #[serde(default)]
    pub solver: SolverConfig,
}

impl RunContext {
    pub fn new(
        formula: impl Into<String>,
        mask_path: impl Into<PathBuf>,
        observation_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            formula: formula.into(),
            mask_path: mask_path.into(),
            observation_path: observation_path.into(),
            feed: FeedFormat::default(),
            solver: SolverConfig::default(),
        }
    }

    pub fn from_toml_str(text: &str) -> WbResult<Self> {
        let context: RunContext =
            toml::from_str(text).map_err(|e| WbError::Config(e.to_string()))?;
        context.solver.validate()?;
        Ok(context)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> WbResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> WbResult<String> {
        toml::to_string(self).map_err(|e| WbError::Config(e.to_string()))
    }

    pub fn parsed_formula(&self) -> WbResult<Formula> {
        Formula::parse(&self.formula)
    }
}
