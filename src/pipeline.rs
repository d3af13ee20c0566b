use crate::context::RunContext;
use log::info;
use wbcorr_calibrate::calibration::{compute_variable_means, fit_correction, CalibrationResult};
use wbcorr_calibrate::correction::apply_factor;
use wbcorr_calibrate::solver::SolverConfig;
use wbcorr_core::errors::{WbError, WbResult};
use wbcorr_core::formula::Formula;
use wbcorr_core::observation::read_observation_file;
use wbcorr_core::raster::{Grid, RasterStack, RasterStore};
use wbcorr_core::spatial::SpatialMask;
use wbcorr_core::timeseries::TimeSeries;

/// Calibrates the last term of the configured formula and rewrites its rasters.
///
/// The mask grid is read through `store`, the observation feed from disk.
pub fn correct_variable<S>(
    store: &mut S,
    context: &RunContext,
    stacks: &[RasterStack],
) -> WbResult<CalibrationResult>
where
    S: RasterStore + ?Sized,
{
    let formula = context.parsed_formula()?;
    let mask_grid = store.open_grid(&context.mask_path)?;
    check_mask_alignment(&*store, &mask_grid, &formula, stacks)?;
    let mask = SpatialMask::from_grid(&mask_grid);
    let observation = read_observation_file(&context.observation_path, &context.feed)?;
    correct_with_observation(store, &formula, &mask, &observation, stacks, &context.solver)
}

/// The mask must share shape, projection and transform with the first raster
/// of every stack the formula reads. Its no-data value may differ.
fn check_mask_alignment<S>(
    store: &S,
    mask: &Grid,
    formula: &Formula,
    stacks: &[RasterStack],
) -> WbResult<()>
where
    S: RasterStore + ?Sized,
{
    let referenced = stacks
        .iter()
        .filter(|stack| formula.references(stack.variable()));
    for stack in referenced {
        let Some(path) = stack.paths().next() else {
            continue;
        };
        if !mask.is_aligned_with(&store.open_grid(path)?) {
            return Err(WbError::InconsistentGrid(format!(
                "basin mask is not aligned with {} ({})",
                stack.variable(),
                path.display()
            )));
        }
    }
    Ok(())
}

/// Same as [`correct_variable`] with the mask and observation already loaded.
pub fn correct_with_observation<S>(
    store: &mut S,
    formula: &Formula,
    mask: &SpatialMask,
    observation: &TimeSeries,
    stacks: &[RasterStack],
    solver: &SolverConfig,
) -> WbResult<CalibrationResult>
where
    S: RasterStore + ?Sized,
{
    let target = formula.corrected_variable();
    let target_stack = stacks
        .iter()
        .find(|stack| stack.variable() == target)
        .ok_or_else(|| WbError::UnknownVariable(target.to_string()))?;

    let variables = formula.variables();
    let series = compute_variable_means(&*store, stacks, mask, &variables)?;
    let result = fit_correction(formula, &series, observation, target, solver)?;

    apply_factor(store, target_stack, result.factor)?;
    info!(
        "Corrected {} with factor {:.4} ({} to {})",
        result.variable, result.factor, result.start, result.end
    );
    Ok(result)
}
