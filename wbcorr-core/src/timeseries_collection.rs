use crate::errors::{WbError, WbResult};
use crate::timeseries::TimeSeries;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesItem {
    pub timeseries: TimeSeries,
    pub name: String,
}

/// A collection of time series data.
/// Allows for easy access to the series of each balance variable by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesCollection {
    items: Vec<TimeseriesItem>,
}

impl TimeseriesCollection {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Add a new timeseries to the collection
    ///
    /// Fails if a timeseries with the same name already exists in the collection
    pub fn add_timeseries(
        &mut self,
        name: impl Into<String>,
        timeseries: TimeSeries,
    ) -> WbResult<()> {
        let name = name.into();
        if self.get_by_name(&name).is_some() {
            return Err(WbError::InvalidTimeSeries(format!(
                "timeseries {} already exists",
                name
            )));
        }
        self.items.push(TimeseriesItem { timeseries, name });
        Ok(())
    }

    /// Builder-style variant of [`Self::add_timeseries`].
    pub fn with_timeseries(
        mut self,
        name: impl Into<String>,
        timeseries: TimeSeries,
    ) -> WbResult<Self> {
        self.add_timeseries(name, timeseries)?;
        Ok(self)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&TimeseriesItem> {
        self.items.iter().find(|x| x.name == name)
    }

    pub fn get_timeseries_by_name(&self, name: &str) -> Option<&TimeSeries> {
        self.get_by_name(name).map(|item| &item.timeseries)
    }

    /// Like [`Self::get_timeseries_by_name`] but reports absent names as errors.
    pub fn require(&self, name: &str) -> WbResult<&TimeSeries> {
        self.get_timeseries_by_name(name)
            .ok_or_else(|| WbError::UnknownVariable(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeseriesItem> {
        self.items.iter()
    }
}

impl IntoIterator for TimeseriesCollection {
    type Item = TimeseriesItem;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
