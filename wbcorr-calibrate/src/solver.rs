//! Bounded least-squares fit of a single non-negative scale factor.
//!
//! The residual function `r(a)` is minimized in the sense of `sum(r_i(a)^2)`
//! with the Levenberg-Marquardt implementation of the `levenberg-marquardt`
//! crate. The Jacobian is approximated with central finite differences.
//!
//! The lower bound `a >= 0` is enforced by projection: the problem is solved
//! unconstrained from the seed, and a negative local minimizer means the
//! bound is active, in which case the factor is `0`. For balance formulas in
//! which the corrected term only enters through `+` and `-` the objective is
//! a convex quadratic in `a`, so the projection is the exact bounded optimum.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::{debug, info};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use wbcorr_core::errors::{WbError, WbResult};
use wbcorr_core::timeseries::FloatValue;

/// Solver settings. Every setting affects the reproducibility of the fitted factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Seed of the search
    pub initial_factor: FloatValue,
    /// Relative reduction of the sum of squares below which the fit has converged
    pub ftol: FloatValue,
    /// Relative change of the factor below which the fit has converged
    pub xtol: FloatValue,
    /// Orthogonality between residuals and Jacobian below which the fit has converged
    pub gtol: FloatValue,
    /// Evaluation budget, in units of `parameters + 1` residual evaluations
    pub patience: usize,
    /// Finite-difference step, relative to `max(|a|, 1)`
    pub jacobian_step: FloatValue,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            initial_factor: 1.0,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            patience: 100,
            jacobian_step: 1e-6,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> WbResult<()> {
        if !self.initial_factor.is_finite() || self.initial_factor < 0.0 {
            return Err(WbError::Config(format!(
                "initial_factor must be finite and non-negative, got {}",
                self.initial_factor
            )));
        }
        for (name, value) in [("ftol", self.ftol), ("xtol", self.xtol), ("gtol", self.gtol)] {
            if !value.is_finite() || value < 0.0 {
                return Err(WbError::Config(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.patience == 0 {
            return Err(WbError::Config("patience must be at least 1".to_string()));
        }
        if !self.jacobian_step.is_finite() || self.jacobian_step <= 0.0 {
            return Err(WbError::Config(format!(
                "jacobian_step must be positive, got {}",
                self.jacobian_step
            )));
        }
        Ok(())
    }
}

/// Outcome of a successful fit.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutcome {
    /// Fitted factor, never negative
    pub factor: FloatValue,
    /// Whether the lower bound was active
    pub bound_active: bool,
    /// Number of residual evaluations
    pub evaluations: usize,
    /// Sum of squared residuals at `factor`
    pub sum_of_squares: FloatValue,
}

/// Least-squares problem over one scalar parameter.
///
/// `residuals` returns `None` when the residuals cannot be evaluated, which
/// stops the solver.
struct ScaleFactorProblem<F> {
    residuals: F,
    factor: FloatValue,
    step: FloatValue,
    evaluations: Cell<usize>,
}

impl<F> ScaleFactorProblem<F>
where
    F: Fn(FloatValue) -> Option<Vec<FloatValue>>,
{
    fn evaluate(&self, factor: FloatValue) -> Option<Vec<FloatValue>> {
        self.evaluations.set(self.evaluations.get() + 1);
        (self.residuals)(factor).filter(|r| r.iter().all(|v| v.is_finite()))
    }
}

impl<F> LeastSquaresProblem<f64, Dyn, Dyn> for ScaleFactorProblem<F>
where
    F: Fn(FloatValue) -> Option<Vec<FloatValue>>,
{
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.factor = x[0];
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_element(1, self.factor)
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.evaluate(self.factor).map(DVector::from_vec)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let h = self.step * self.factor.abs().max(1.0);
        let upper = self.evaluate(self.factor + h)?;
        let lower = self.evaluate(self.factor - h)?;
        let derivative: Vec<f64> = upper
            .iter()
            .zip(&lower)
            .map(|(u, l)| (u - l) / (2.0 * h))
            .collect();
        Some(DMatrix::from_vec(derivative.len(), 1, derivative))
    }
}

/// Fits `a >= 0` minimizing the sum of squares of `residuals(a)`.
pub fn fit_scale_factor<F>(residuals: F, config: &SolverConfig) -> WbResult<SolverOutcome>
where
    F: Fn(FloatValue) -> Option<Vec<FloatValue>>,
{
    config.validate()?;

    let problem = ScaleFactorProblem {
        residuals,
        factor: config.initial_factor,
        step: config.jacobian_step,
        evaluations: Cell::new(0),
    };
    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(config.ftol)
        .with_xtol(config.xtol)
        .with_gtol(config.gtol)
        .with_patience(config.patience)
        .minimize(problem);

    debug!(
        "Solver stopped after {} evaluations: {:?}",
        problem.evaluations.get(),
        report.termination
    );
    if !report.termination.was_successful() {
        return Err(WbError::Optimization(format!(
            "{:?} after {} evaluations",
            report.termination,
            problem.evaluations.get()
        )));
    }
    if !problem.factor.is_finite() {
        return Err(WbError::Optimization(format!(
            "solver returned a non-finite factor {}",
            problem.factor
        )));
    }

    let bound_active = problem.factor < 0.0;
    let factor = problem.factor.max(0.0);
    if bound_active {
        info!(
            "Unbounded optimum {} is negative, using the lower bound 0",
            problem.factor
        );
    }

    let sum_of_squares = problem
        .evaluate(factor)
        .map(|r| r.iter().map(|v| v * v).sum::<f64>())
        .ok_or_else(|| {
            WbError::Optimization(format!("residuals cannot be evaluated at factor {factor}"))
        })?;

    Ok(SolverOutcome {
        factor,
        bound_active,
        evaluations: problem.evaluations.get(),
        sum_of_squares,
    })
}
