//! Access to geo-referenced grids.
//!
//! Reading and writing raster files is delegated to a [`RasterStore`]
//! implementation supplied by the caller; the correction code only relies on
//! the grid values and on being able to write them back with unchanged
//! metadata.

use crate::errors::{WbError, WbResult};
use crate::timeseries::FloatValue;
use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Whether a cell value holds data: finite and not the no-data value.
pub fn is_data(value: FloatValue, nodata: Option<FloatValue>) -> bool {
    value.is_finite() && nodata.map_or(true, |nodata| value != nodata)
}

/// Geospatial description of a grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoMetadata {
    /// Projection definition (WKT or an authority code)
    pub projection: String,
    /// Affine transform
    /// `[origin_x, pixel_width, row_rotation, origin_y, column_rotation, pixel_height]`
    pub geo_transform: [f64; 6],
    /// Value marking cells without data
    pub nodata: Option<FloatValue>,
}

impl GeoMetadata {
    /// Whether two grids share projection, resolution, extent and no-data convention.
    ///
    /// NaN no-data values compare equal to each other.
    pub fn matches(&self, other: &GeoMetadata) -> bool {
        let nodata_matches = match (self.nodata, other.nodata) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => false,
        };
        self.projection == other.projection
            && self.geo_transform == other.geo_transform
            && nodata_matches
    }
}

/// A single raster band with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub values: Array2<FloatValue>,
    pub geo: GeoMetadata,
}

impl Grid {
    pub fn new(values: Array2<FloatValue>, geo: GeoMetadata) -> Self {
        Self { values, geo }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Whether a cell value holds data under this grid's no-data convention.
    pub fn is_data(&self, value: FloatValue) -> bool {
        is_data(value, self.geo.nodata)
    }

    /// Same shape, projection and transform as `other`, whatever the no-data values.
    pub fn is_aligned_with(&self, other: &Grid) -> bool {
        self.shape() == other.shape()
            && self.geo.projection == other.geo.projection
            && self.geo.geo_transform == other.geo.geo_transform
    }

    /// Same geometry and no-data convention as `other`.
    pub fn matches(&self, other: &Grid) -> bool {
        self.shape() == other.shape() && self.geo.matches(&other.geo)
    }
}

/// Raster access collaborator.
pub trait RasterStore {
    /// Reads the grid stored at `path`.
    fn open_grid(&self, path: &Path) -> WbResult<Grid>;

    /// Writes `grid` to `path`, replacing any existing grid.
    fn write_grid(&mut self, path: &Path, grid: &Grid) -> WbResult<()>;

    /// Whether all grids at `paths` agree on projection, resolution, extent and no-data value.
    ///
    /// The default implementation opens every grid once.
    fn grid_geometry_matches(&self, paths: &[&Path]) -> WbResult<bool> {
        let mut reference: Option<Grid> = None;
        for path in paths {
            let grid = self.open_grid(path)?;
            match &reference {
                Some(first) if !first.matches(&grid) => return Ok(false),
                Some(_) => {}
                None => reference = Some(grid),
            }
        }
        Ok(true)
    }
}

/// A [`RasterStore`] that keeps grids in memory, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryRasterStore {
    grids: HashMap<PathBuf, Grid>,
}

impl MemoryRasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, grid: Grid) {
        self.grids.insert(path.into(), grid);
    }

    pub fn get(&self, path: &Path) -> Option<&Grid> {
        self.grids.get(path)
    }

    pub fn len(&self) -> usize {
        self.grids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }
}

impl RasterStore for MemoryRasterStore {
    fn open_grid(&self, path: &Path) -> WbResult<Grid> {
        self.grids.get(path).cloned().ok_or_else(|| WbError::Raster {
            path: path.display().to_string(),
            reason: "no such grid".to_string(),
        })
    }

    fn write_grid(&mut self, path: &Path, grid: &Grid) -> WbResult<()> {
        self.grids.insert(path.to_path_buf(), grid.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    pub path: PathBuf,
    pub date: NaiveDate,
}

/// The dated rasters of one variable, one file per date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterStack {
    variable: String,
    entries: Vec<StackEntry>,
}

impl RasterStack {
    /// Builds a stack from parallel path and date lists.
    ///
    /// Dates must be strictly increasing.
    pub fn new(
        variable: impl Into<String>,
        paths: Vec<PathBuf>,
        dates: Vec<NaiveDate>,
    ) -> WbResult<Self> {
        let variable = variable.into();
        if paths.len() != dates.len() {
            return Err(WbError::InvalidTimeSeries(format!(
                "stack '{variable}' has {} files but {} dates",
                paths.len(),
                dates.len()
            )));
        }
        if let Some(pair) = dates.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(WbError::InvalidTimeSeries(format!(
                "stack '{variable}' dates must be strictly increasing, found {} followed by {}",
                pair[0], pair[1]
            )));
        }
        let entries = paths
            .into_iter()
            .zip(dates)
            .map(|(path, date)| StackEntry { path, date })
            .collect();
        Ok(Self { variable, entries })
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.entries.iter().map(|entry| entry.date)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|entry| entry.path.as_path())
    }

    pub fn path_for(&self, date: NaiveDate) -> Option<&Path> {
        self.entries
            .binary_search_by_key(&date, |entry| entry.date)
            .ok()
            .map(|index| self.entries[index].path.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn geo() -> GeoMetadata {
        GeoMetadata {
            projection: "EPSG:4326".to_string(),
            geo_transform: [30.0, 0.1, 0.0, 10.0, 0.0, -0.1],
            nodata: Some(-9999.0),
        }
    }

    fn date(month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2008, month, 1).unwrap()
    }

    #[test]
    fn test_nodata_cells() {
        let grid = Grid::new(array![[1.0, -9999.0], [f64::NAN, 0.0]], geo());
        assert!(grid.is_data(1.0));
        assert!(grid.is_data(0.0));
        assert!(!grid.is_data(-9999.0));
        assert!(!grid.is_data(f64::NAN));
    }

    #[test]
    fn test_geometry_check() {
        let mut store = MemoryRasterStore::new();
        store.insert("a.tif", Grid::new(array![[1.0, 2.0]], geo()));
        store.insert("b.tif", Grid::new(array![[3.0, 4.0]], geo()));
        store.insert("c.tif", Grid::new(array![[3.0], [4.0]], geo()));
        let mut shifted = geo();
        shifted.geo_transform[0] = 31.0;
        store.insert("d.tif", Grid::new(array![[3.0, 4.0]], shifted));

        let paths = |names: &[&'static str]| {
            names
                .iter()
                .map(|name| Path::new(*name))
                .collect::<Vec<_>>()
        };
        assert!(store.grid_geometry_matches(&paths(&["a.tif", "b.tif"])).unwrap());
        assert!(!store.grid_geometry_matches(&paths(&["a.tif", "c.tif"])).unwrap());
        assert!(!store.grid_geometry_matches(&paths(&["a.tif", "d.tif"])).unwrap());
        assert!(store.grid_geometry_matches(&paths(&["a.tif", "missing.tif"])).is_err());
    }

    #[test]
    fn test_alignment_ignores_nodata() {
        let grid = Grid::new(array![[1.0, 2.0]], geo());
        let mut mask_geo = geo();
        mask_geo.nodata = Some(0.0);
        assert!(grid.is_aligned_with(&Grid::new(array![[1.0, 0.0]], mask_geo.clone())));

        mask_geo.geo_transform[3] = 9.5;
        assert!(!grid.is_aligned_with(&Grid::new(array![[1.0, 0.0]], mask_geo)));
    }

    #[test]
    fn test_nan_nodata_values_match() {
        let mut a = geo();
        a.nodata = Some(f64::NAN);
        let b = a.clone();
        assert!(a.matches(&b));
    }

    #[test]
    fn test_stack_lookup() {
        let stack = RasterStack::new(
            "tr",
            vec![PathBuf::from("tr_2008_01.tif"), PathBuf::from("tr_2008_02.tif")],
            vec![date(1), date(2)],
        )
        .unwrap();
        assert_eq!(stack.path_for(date(2)), Some(Path::new("tr_2008_02.tif")));
        assert_eq!(stack.path_for(date(3)), None);
        assert_eq!(stack.dates().collect::<Vec<_>>(), vec![date(1), date(2)]);
    }

    #[test]
    fn test_stack_rejects_unsorted_dates() {
        let result = RasterStack::new(
            "tr",
            vec![PathBuf::from("a.tif"), PathBuf::from("b.tif")],
            vec![date(2), date(2)],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_shared_nodata_rule() {
        assert!(is_data(0.0, None));
        assert!(is_data(-9999.0, None));
        assert!(!is_data(-9999.0, Some(-9999.0)));
        assert!(!is_data(f64::INFINITY, None));
        assert!(!is_data(f64::NAN, Some(f64::NAN)));
    }

    #[test]
    fn test_stack_json_roundtrip() {
        let stack = RasterStack::new(
            "et",
            vec![PathBuf::from("et_2008_01.tif"), PathBuf::from("et_2008_02.tif")],
            vec![date(1), date(2)],
        )
        .unwrap();
        let text = serde_json::to_string(&stack).unwrap();
        let restored: RasterStack = serde_json::from_str(&text).unwrap();
        assert_eq!(restored, stack);
        assert_eq!(restored.path_for(date(1)), Some(Path::new("et_2008_01.tif")));
    }
}
