//! Date-indexed series with an explicit missing-value marker.
//!
//! Values are stored as `Option<FloatValue>` rather than relying on NaN, so
//! that missing observations, empty spatial means and undefined arithmetic
//! (such as division by zero) all share one representation.

use crate::errors::{WbError, WbResult};
use chrono::{Datelike, NaiveDate};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

pub type FloatValue = f64;

/// A single series element. `None` marks a missing value.
pub type Value = Option<FloatValue>;

/// Converts a raw float into a [`Value`], treating non-finite numbers as missing.
pub fn finite(value: FloatValue) -> Value {
    value.is_finite().then_some(value)
}

/// Day number of a date, with 0001-01-01 as day 1.
pub fn ordinal(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce())
}

/// An ordered sequence of dates with one value per date.
///
/// Dates are strictly increasing. The series is immutable; masking and
/// rescaling produce new values sharing the same date axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    dates: Vec<NaiveDate>,
    values: Array1<Value>,
}

impl TimeSeries {
    pub fn new(dates: Vec<NaiveDate>, values: Array1<Value>) -> WbResult<Self> {
        if dates.len() != values.len() {
            return Err(WbError::InvalidTimeSeries(format!(
                "{} dates but {} values",
                dates.len(),
                values.len()
            )));
        }
        if let Some(pair) = dates.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(WbError::InvalidTimeSeries(format!(
                "dates must be strictly increasing, found {} followed by {}",
                pair[0], pair[1]
            )));
        }
        Ok(Self { dates, values })
    }

    /// Builds a series from raw floats, mapping NaN and infinities to missing.
    pub fn from_values(dates: Vec<NaiveDate>, values: Array1<FloatValue>) -> WbResult<Self> {
        Self::new(dates, values.mapv(finite))
    }

    /// A series of the given dates with every value missing.
    pub fn missing(dates: Vec<NaiveDate>) -> WbResult<Self> {
        let len = dates.len();
        Self::new(dates, Array1::from_elem(len, None))
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &Array1<Value> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Ordinal day numbers of the date axis.
    pub fn ordinals(&self) -> Vec<i64> {
        self.dates.iter().copied().map(ordinal).collect()
    }

    /// Value recorded for an exact date, if the date is on the axis.
    pub fn at_date(&self, date: NaiveDate) -> Option<Value> {
        self.dates
            .binary_search(&date)
            .ok()
            .map(|index| self.values[index])
    }

    /// Derives a series on the same axis with new values.
    pub fn with_values(&self, values: Array1<Value>) -> WbResult<Self> {
        Self::new(self.dates.clone(), values)
    }

    /// Multiplies every present value by `factor`.
    pub fn scaled(&self, factor: FloatValue) -> Self {
        Self {
            dates: self.dates.clone(),
            values: self.values.mapv(|v| v.and_then(|v| finite(v * factor))),
        }
    }

    /// Positions holding a present value.
    pub fn present_mask(&self) -> Vec<bool> {
        self.values.iter().map(Option::is_some).collect()
    }

    /// The subseries at the given positions, in the order given.
    pub fn select(&self, indices: &[usize]) -> WbResult<Self> {
        let mut dates = Vec::with_capacity(indices.len());
        let mut values = Vec::with_capacity(indices.len());
        for &index in indices {
            if index >= self.len() {
                return Err(WbError::IndexOutOfRange {
                    index,
                    len: self.len(),
                });
            }
            dates.push(self.dates[index]);
            values.push(self.values[index]);
        }
        Self::new(dates, Array1::from(values))
    }
}

/// Running sum of a value sequence.
///
/// A missing element makes that entry and every later entry missing.
pub fn cumulative_sum<I>(values: I) -> Vec<Value>
where
    I: IntoIterator<Item = Value>,
{
    let mut total = Some(0.0);
    values
        .into_iter()
        .map(|value| {
            total = match (total, value) {
                (Some(t), Some(v)) => finite(t + v),
                _ => None,
            };
            total
        })
        .collect()
}
