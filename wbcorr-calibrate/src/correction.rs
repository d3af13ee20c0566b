//! Propagation of a fitted factor onto the corrected variable.

use log::{debug, info};
use wbcorr_core::errors::{WbError, WbResult};
use wbcorr_core::raster::{is_data, RasterStack, RasterStore};
use wbcorr_core::timeseries::{FloatValue, TimeSeries};

fn check_factor(factor: FloatValue) -> WbResult<()> {
    if !factor.is_finite() || factor < 0.0 {
        return Err(WbError::InvalidFactor(factor));
    }
    Ok(())
}

/// Multiplies every data cell of every grid in `stack` by `factor` and
/// writes each grid back to its own path.
///
/// No-data cells and geospatial metadata are left untouched. Grids are
/// processed one at a time, in date order.
pub fn apply_factor<S>(
    store: &mut S,
    stack: &RasterStack,
    factor: FloatValue,
) -> WbResult<RasterStack>
where
    S: RasterStore + ?Sized,
{
    check_factor(factor)?;

    for entry in stack.entries() {
        let mut grid = store.open_grid(&entry.path)?;
        let nodata = grid.geo.nodata;
        grid.values.mapv_inplace(|v| if is_data(v, nodata) { v * factor } else { v });
        store.write_grid(&entry.path, &grid)?;
        debug!("Rewrote {} for {}", entry.path.display(), entry.date);
    }

    info!(
        "Applied factor {:.4} to {} rasters of {}",
        factor,
        stack.len(),
        stack.variable()
    );
    Ok(stack.clone())
}

/// The mean series of the corrected variable.
pub fn correct_series(series: &TimeSeries, factor: FloatValue) -> WbResult<TimeSeries> {
    check_factor(factor)?;
    Ok(series.scaled(factor))
}
