//! Region-of-interest masks and spatial aggregation
//!
//! A [`SpatialMask`] marks the cells of a grid that belong to the basin being
//! calibrated. Variables are reduced to one value per date by averaging the
//! cells inside the mask that hold data.
//!
//! # Examples
//!
//! ```rust
//! use ndarray::array;
//! use wbcorr_core::raster::{GeoMetadata, Grid};
//! use wbcorr_core::spatial::SpatialMask;
//!
//! let geo = GeoMetadata {
//!     projection: "EPSG:4326".to_string(),
//!     geo_transform: [0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
//!     nodata: None,
//! };
//! let mask = SpatialMask::from_grid(&Grid::new(array![[1.0, f64::NAN]], geo.clone()));
//! let rain = Grid::new(array![[30.0, 90.0]], geo);
//! assert_eq!(mask.aggregate_mean(&rain).unwrap(), Some(30.0));
//! ```

use crate::errors::{WbError, WbResult};
use crate::raster::Grid;
use crate::timeseries::{FloatValue, Value};
use ndarray::Array2;

/// Cells inside the region of interest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpatialMask {
    inside: Array2<bool>,
}

impl SpatialMask {
    /// Derives a mask from a grid: cells holding data are inside.
    pub fn from_grid(grid: &Grid) -> Self {
        Self {
            inside: grid.values.mapv(|v| grid.is_data(v)),
        }
    }

    pub fn from_cells(inside: Array2<bool>) -> Self {
        Self { inside }
    }

    /// A mask with every cell inside.
    pub fn everywhere(shape: (usize, usize)) -> Self {
        Self {
            inside: Array2::from_elem(shape, true),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.inside.dim()
    }

    /// Number of cells inside the region.
    pub fn size(&self) -> usize {
        self.inside.iter().filter(|&&inside| inside).count()
    }

    /// Mean over cells that are inside the mask and hold data.
    ///
    /// Returns `None` when no such cell exists.
    pub fn aggregate_mean(&self, grid: &Grid) -> WbResult<Value> {
        if grid.shape() != self.shape() {
            return Err(WbError::InconsistentGrid(format!(
                "grid shape {:?} does not match mask shape {:?}",
                grid.shape(),
                self.shape()
            )));
        }

        let (sum, count) = grid
            .values
            .iter()
            .zip(self.inside.iter())
            .filter(|&(&value, &inside)| inside && grid.is_data(value))
            .fold((0.0, 0usize), |(sum, count), (&value, _)| {
                (sum + value, count + 1)
            });

        if count == 0 {
            return Ok(None);
        }
        Ok(Some(sum / count as FloatValue))
    }
}
