//! Calibration of one balance term against observed storage.
//!
//! The modeled storage is the running sum of the balance formula evaluated
//! month by month. The observation is already a storage quantity, so it is
//! compared directly against that running sum, over the dates it covers.

use crate::solver::{fit_scale_factor, SolverConfig};
use chrono::NaiveDate;
use log::{debug, info, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use wbcorr_core::errors::{WbError, WbResult};
use wbcorr_core::formula::{Formula, Scaling};
use wbcorr_core::interpolate::align;
use wbcorr_core::raster::{RasterStack, RasterStore};
use wbcorr_core::spatial::SpatialMask;
use wbcorr_core::timeseries::{FloatValue, TimeSeries, Value};
use wbcorr_core::timeseries_collection::TimeseriesCollection;

/// The fitted correction and what it was fitted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Corrected variable
    pub variable: String,
    /// Balance formula the factor was fitted with
    pub formula: String,
    /// Multiplier for the corrected variable, never negative
    pub factor: FloatValue,
    /// Positions of the model date axis where the observation is available
    pub valid_mask: Vec<bool>,
    /// First date used in the fit
    pub start: NaiveDate,
    /// Last date used in the fit
    pub end: NaiveDate,
    /// Whether the factor sits on its lower bound
    pub bound_active: bool,
    /// Objective evaluations used by the solver
    pub evaluations: usize,
    /// Sum of squared differences at the fitted factor
    pub sum_of_squares: FloatValue,
}

impl CalibrationResult {
    /// Indices of the valid positions, in date order.
    pub fn valid_indices(&self) -> Vec<usize> {
        valid_indices(&self.valid_mask)
    }
}

/// Cumulative storage of the balance before and after correction, at the valid positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageCurves {
    pub dates: Vec<NaiveDate>,
    pub original: Vec<Value>,
    pub corrected: Vec<Value>,
}

fn valid_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(index, &valid)| valid.then_some(index))
        .collect()
}

/// Computes the basin-mean time series of each requested variable.
///
/// The series share one date axis: the sorted intersection of the dates of
/// every requested stack. Grids are read one at a time.
pub fn compute_variable_means<S>(
    store: &S,
    stacks: &[RasterStack],
    mask: &SpatialMask,
    variables: &[&str],
) -> WbResult<TimeseriesCollection>
where
    S: RasterStore + ?Sized,
{
    let mut selected: Vec<&RasterStack> = Vec::new();
    for &variable in variables {
        if selected.iter().any(|stack| stack.variable() == variable) {
            continue;
        }
        let stack = stacks
            .iter()
            .find(|stack| stack.variable() == variable)
            .ok_or_else(|| WbError::UnknownVariable(variable.to_string()))?;
        selected.push(stack);
    }

    let paths: Vec<&Path> = selected.iter().copied().flat_map(RasterStack::paths).collect();
    if !store.grid_geometry_matches(&paths)? {
        return Err(WbError::InconsistentGrid(format!(
            "rasters of {:?} do not share projection, resolution, extent and no-data value",
            selected.iter().map(|stack| stack.variable()).collect::<Vec<_>>()
        )));
    }

    let common_dates: Vec<NaiveDate> = selected
        .iter()
        .map(|stack| stack.dates().collect::<BTreeSet<_>>())
        .reduce(|common, dates| common.intersection(&dates).copied().collect())
        .unwrap_or_default()
        .into_iter()
        .collect();
    if common_dates.is_empty() {
        warn!("The requested stacks have no date in common");
    } else {
        debug!(
            "{} common dates from {} to {}",
            common_dates.len(),
            common_dates[0],
            common_dates[common_dates.len() - 1]
        );
    }

    let mut collection = TimeseriesCollection::new();
    for stack in selected {
        let mut values: Vec<Value> = Vec::with_capacity(common_dates.len());
        for &date in &common_dates {
            let path = stack.path_for(date).ok_or_else(|| WbError::MissingDate {
                variable: stack.variable().to_string(),
                date,
            })?;
            let grid = store.open_grid(path)?;
            let mean = mask.aggregate_mean(&grid)?;
            if mean.is_none() {
                warn!(
                    "No data inside the mask for {} on {}",
                    stack.variable(),
                    date
                );
            }
            values.push(mean);
        }
        collection.add_timeseries(
            stack.variable(),
            TimeSeries::new(common_dates.clone(), Array1::from(values))?,
        )?;
    }
    Ok(collection)
}

/// Fits the factor for `target_variable` so that the cumulative formula
/// matches the observed storage.
///
/// The observation is aligned onto the date axis of `target_variable`, and
/// only positions where it is available take part in the fit.
pub fn fit_correction(
    formula: &Formula,
    series: &TimeseriesCollection,
    observation: &TimeSeries,
    target_variable: &str,
    config: &SolverConfig,
) -> WbResult<CalibrationResult> {
    let target = series.require(target_variable)?;
    if !formula.references(target_variable) {
        return Err(WbError::malformed(
            &formula.to_string(),
            format!("does not reference the corrected variable '{target_variable}'"),
        ));
    }

    let aligned = align(observation, target.dates())?;
    let valid_mask = aligned.present_mask();
    let indices = valid_indices(&valid_mask);
    let (start, end) = match (indices.first(), indices.last()) {
        (Some(&first), Some(&last)) => (target.dates()[first], target.dates()[last]),
        _ => return Err(WbError::EmptyOverlap),
    };
    let observed: Vec<FloatValue> = aligned.values().iter().flatten().copied().collect();
    debug!(
        "Fitting {} on {} of {} dates ({} to {})",
        target_variable,
        indices.len(),
        valid_mask.len(),
        start,
        end
    );

    // Surface lookup and axis errors before the solver hides them.
    formula.evaluate_cumulative(series, &indices)?;

    let residuals = |factor: FloatValue| -> Option<Vec<FloatValue>> {
        let scaling = Scaling {
            variable: target_variable,
            factor,
        };
        let modeled = formula
            .evaluate_cumulative_scaled(series, &indices, scaling)
            .ok()?;
        modeled
            .iter()
            .zip(&observed)
            .map(|(m, o)| m.map(|m| m - o))
            .collect()
    };
    let outcome = fit_scale_factor(residuals, config)?;

    info!(
        "Fitted {} = {:.4} x {} over {} dates (sum of squares {:.4})",
        target_variable, outcome.factor, target_variable, indices.len(), outcome.sum_of_squares
    );

    Ok(CalibrationResult {
        variable: target_variable.to_string(),
        formula: formula.to_string(),
        factor: outcome.factor,
        valid_mask,
        start,
        end,
        bound_active: outcome.bound_active,
        evaluations: outcome.evaluations,
        sum_of_squares: outcome.sum_of_squares,
    })
}

/// Cumulative storage of the original and the corrected balance.
pub fn storage_curves(
    formula: &Formula,
    series: &TimeseriesCollection,
    result: &CalibrationResult,
) -> WbResult<StorageCurves> {
    let indices = result.valid_indices();
    let axis = series.require(&result.variable)?;
    let dates = axis.select(&indices)?.dates().to_vec();
    let original = formula.evaluate_cumulative(series, &indices)?;
    let corrected = formula.evaluate_cumulative_scaled(
        series,
        &indices,
        Scaling {
            variable: &result.variable,
            factor: result.factor,
        },
    )?;
    Ok(StorageCurves {
        dates,
        original,
        corrected,
    })
}
