//! Alignment of a series onto another date axis.
//!
//! Observation products are rarely sampled on the model's monthly axis, so
//! they are linearly interpolated in ordinal-day space. Destination dates
//! outside the source's date range are missing: calibration must only use
//! the period the observation actually covers.

use crate::errors::WbResult;
use crate::timeseries::{finite, ordinal, TimeSeries, Value};
use chrono::NaiveDate;
use ndarray::Array1;

/// Piecewise-linear interpolation between consecutive points.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LinearSplineStrategy {
    extrapolate: bool,
}

impl LinearSplineStrategy {
    pub fn new(extrapolate: bool) -> Self {
        Self { extrapolate }
    }

    /// Interpolates `ys` (sampled at strictly increasing `xs`) at `x`.
    ///
    /// An exact match returns the sample itself. A segment with a missing
    /// endpoint yields a missing value.
    pub fn interpolate(&self, xs: &[i64], ys: &[Value], x: i64) -> Value {
        debug_assert_eq!(xs.len(), ys.len());
        let segment = match xs.binary_search(&x) {
            Ok(index) => return ys[index],
            Err(_) if xs.len() < 2 => return None,
            Err(0) if self.extrapolate => 0,
            Err(index) if index == xs.len() && self.extrapolate => index - 2,
            Err(index) if index == 0 || index == xs.len() => return None,
            Err(index) => index - 1,
        };

        let (x0, x1) = (xs[segment], xs[segment + 1]);
        let (y0, y1) = (ys[segment]?, ys[segment + 1]?);
        let fraction = (x - x0) as f64 / (x1 - x0) as f64;
        finite(y0 + (y1 - y0) * fraction)
    }
}

/// Interpolates `source` onto `destination_dates` without extrapolation.
pub fn align(source: &TimeSeries, destination_dates: &[NaiveDate]) -> WbResult<TimeSeries> {
    let strategy = LinearSplineStrategy::new(false);
    let xs = source.ordinals();
    let ys = source.values().to_vec();
    let values: Array1<Value> = destination_dates
        .iter()
        .map(|&date| strategy.interpolate(&xs, &ys, ordinal(date)))
        .collect();
    TimeSeries::new(destination_dates.to_vec(), values)
}
