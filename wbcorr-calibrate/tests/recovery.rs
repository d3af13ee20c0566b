//! Recovery of known correction factors from synthetic balances.
//!
//! The observed storage is generated from the balance with a known factor, so
//! the fit must return that factor and the corrected storage curve must
//! reproduce the observation.

use approx::assert_relative_eq;
use chrono::{Days, NaiveDate};
use ndarray::Array1;
use wbcorr_calibrate::calibration::{fit_correction, storage_curves};
use wbcorr_calibrate::correction::correct_series;
use wbcorr_calibrate::solver::SolverConfig;
use wbcorr_core::formula::Formula;
use wbcorr_core::timeseries::{cumulative_sum, TimeSeries};
use wbcorr_core::timeseries_collection::TimeseriesCollection;

fn model_dates(count: u64) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2003, 1, 1).unwrap();
    (0..count)
        .map(|i| start.checked_add_days(Days::new(30 * i)).unwrap())
        .collect()
}

fn series(dates: &[NaiveDate], f: impl Fn(f64) -> f64) -> TimeSeries {
    let values = Array1::from_iter((0..dates.len()).map(|i| f(i as f64)));
    TimeSeries::from_values(dates.to_vec(), values).unwrap()
}

mod additive_balance {
    use super::*;

    fn inputs() -> (Vec<NaiveDate>, TimeseriesCollection) {
        let dates = model_dates(24);
        let collection = TimeseriesCollection::new()
            .with_timeseries("p", series(&dates, |i| 80.0 + 40.0 * (i / 3.0).sin()))
            .unwrap()
            .with_timeseries("et", series(&dates, |i| 50.0 + 0.5 * i))
            .unwrap()
            .with_timeseries("q", series(&dates, |i| 12.0 + (i / 2.0).cos()))
            .unwrap();
        (dates, collection)
    }

    fn observed(dates: &[NaiveDate], collection: &TimeseriesCollection, factor: f64) -> Vec<f64> {
        let p = collection.require("p").unwrap().values();
        let et = collection.require("et").unwrap().values();
        let q = collection.require("q").unwrap().values();
        let balance = (0..dates.len()).map(|i| Some(p[i]? - et[i]? - factor * q[i]?));
        cumulative_sum(balance).into_iter().map(|v| v.unwrap()).collect()
    }

    /// Extra observation dates between model dates must not disturb the fit.
    #[test]
    fn test_recovers_factor_with_denser_observations() {
        let (dates, collection) = inputs();
        let storage = observed(&dates, &collection, 0.8);

        let mut obs_dates = Vec::new();
        let mut obs_values = Vec::new();
        for (i, (&date, &value)) in dates.iter().zip(&storage).enumerate() {
            obs_dates.push(date);
            obs_values.push(value);
            if i + 1 < dates.len() {
                obs_dates.push(date.checked_add_days(Days::new(15)).unwrap());
                obs_values.push(-1.0e3);
            }
        }
        let observation = TimeSeries::from_values(obs_dates, Array1::from(obs_values)).unwrap();

        let formula = Formula::parse("p-et-q").unwrap();
        let result =
            fit_correction(&formula, &collection, &observation, "q", &SolverConfig::default())
                .unwrap();

        assert_relative_eq!(result.factor, 0.8, epsilon = 1e-6);
        assert!(result.valid_mask.iter().all(|&valid| valid));
        assert!(result.sum_of_squares < 1e-6);

        let curves = storage_curves(&formula, &collection, &result).unwrap();
        for (corrected, expected) in curves.corrected.iter().zip(&storage) {
            assert_relative_eq!(corrected.unwrap(), *expected, epsilon = 1e-4);
        }
        assert_eq!(curves.dates, dates);
    }

    /// Fitting the same inputs twice yields the same factor.
    #[test]
    fn test_fit_is_deterministic() {
        let (dates, collection) = inputs();
        let storage = observed(&dates, &collection, 1.3);
        let observation = TimeSeries::from_values(dates, Array1::from(storage)).unwrap();
        let formula = Formula::parse("p-et-q").unwrap();

        let first =
            fit_correction(&formula, &collection, &observation, "q", &SolverConfig::default())
                .unwrap();
        let second =
            fit_correction(&formula, &collection, &observation, "q", &SolverConfig::default())
                .unwrap();
        assert_eq!(first.factor, second.factor);
        assert_eq!(first.evaluations, second.evaluations);
    }

    /// The corrected mean series of the target is the original scaled by the factor.
    #[test]
    fn test_corrected_series_matches_factor() {
        let (dates, collection) = inputs();
        let storage = observed(&dates, &collection, 1.1);
        let observation = TimeSeries::from_values(dates, Array1::from(storage)).unwrap();
        let formula = Formula::parse("p-et-q").unwrap();
        let result =
            fit_correction(&formula, &collection, &observation, "q", &SolverConfig::default())
                .unwrap();

        let q = collection.require("q").unwrap();
        let corrected = correct_series(q, result.factor).unwrap();
        for (before, after) in q.values().iter().zip(corrected.values().iter()) {
            assert_relative_eq!(after.unwrap(), 1.1 * before.unwrap(), epsilon = 1e-5);
        }
    }
}

mod multiplicative_balance {
    use super::*;

    /// With a trailing division the objective is no longer quadratic in the factor.
    #[test]
    fn test_recovers_divisor() {
        let dates = model_dates(18);
        let collection = TimeseriesCollection::new()
            .with_timeseries("p", series(&dates, |i| 60.0 + 5.0 * i))
            .unwrap()
            .with_timeseries("et", series(&dates, |i| 20.0 + i))
            .unwrap()
            .with_timeseries("area", series(&dates, |_| 4.0))
            .unwrap();

        let p = collection.require("p").unwrap().values();
        let et = collection.require("et").unwrap().values();
        let balance = (0..dates.len()).map(|i| Some((p[i]? - et[i]?) / (4.0 * 2.0)));
        let storage: Vec<f64> = cumulative_sum(balance).into_iter().map(|v| v.unwrap()).collect();
        let observation = TimeSeries::from_values(dates, Array1::from(storage)).unwrap();

        let formula = Formula::parse("p-et/area").unwrap();
        let result =
            fit_correction(&formula, &collection, &observation, "area", &SolverConfig::default())
                .unwrap();
        assert_relative_eq!(result.factor, 2.0, epsilon = 1e-6);
        assert!(!result.bound_active);
    }
}
