//! Reader for external storage-anomaly observation feeds.
//!
//! A feed is a delimited text file with a header row, one column holding a
//! calendar date and one holding the storage anomaly, e.g.
//!
//! ```text
//! date,dS [mm]
//! 2002-04-17,12.3
//! 2002-05-15,8.9
//! ```

use crate::errors::{WbError, WbResult};
use crate::timeseries::{finite, TimeSeries, Value};
use chrono::NaiveDate;
use log::debug;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Column layout of an observation feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedFormat {
    /// Header of the date column
    pub date_column: String,
    /// Header of the value column
    pub value_column: String,
    /// `chrono` format string for the date column
    pub date_format: String,
    /// Field delimiter, must be a single ASCII character
    pub delimiter: char,
}

impl Default for FeedFormat {
    fn default() -> Self {
        Self {
            date_column: "date".to_string(),
            value_column: "dS [mm]".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            delimiter: ',',
        }
    }
}

/// Reads an observation feed from any byte source.
///
/// Dates must be strictly increasing in file order. Blank and `NaN` values
/// are read as missing; anything else that does not parse as a number is an
/// error.
pub fn read_observation_feed<R: Read>(reader: R, format: &FeedFormat) -> WbResult<TimeSeries> {
    if !format.delimiter.is_ascii() {
        return Err(WbError::Config(format!(
            "feed delimiter '{}' is not an ASCII character",
            format.delimiter
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(format.delimiter as u8)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| WbError::ObservationFormat {
            record: 0,
            reason: e.to_string(),
        })?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| WbError::ObservationFormat {
                record: 0,
                reason: format!("missing column '{name}'"),
            })
    };
    let date_idx = column(&format.date_column)?;
    let value_idx = column(&format.value_column)?;

    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    for (row, result) in reader.records().enumerate() {
        let record_no = row + 1;
        let record = result.map_err(|e| WbError::ObservationFormat {
            record: record_no,
            reason: e.to_string(),
        })?;

        let raw_date = record.get(date_idx).unwrap_or("");
        let date = NaiveDate::parse_from_str(raw_date, &format.date_format).map_err(|e| {
            WbError::ObservationFormat {
                record: record_no,
                reason: format!(
                    "'{raw_date}' is not a date in format '{}': {e}",
                    format.date_format
                ),
            }
        })?;

        if let Some(&previous) = dates.last() {
            if date <= previous {
                return Err(WbError::ObservationFormat {
                    record: record_no,
                    reason: format!("date {date} does not follow {previous}"),
                });
            }
        }

        let raw_value = record.get(value_idx).unwrap_or("");
        let value = if raw_value.is_empty() {
            None
        } else {
            let parsed = raw_value
                .parse::<f64>()
                .map_err(|_| WbError::ObservationFormat {
                    record: record_no,
                    reason: format!("'{raw_value}' is not a number"),
                })?;
            finite(parsed)
        };

        dates.push(date);
        values.push(value);
    }

    debug!(
        "Read {} observations ({} missing)",
        values.len(),
        values.iter().filter(|v| v.is_none()).count()
    );
    TimeSeries::new(dates, Array1::from(values))
}

/// Opens and reads an observation feed file.
pub fn read_observation_file<P: AsRef<Path>>(path: P, format: &FeedFormat) -> WbResult<TimeSeries> {
    let file = File::open(path.as_ref())?;
    read_observation_feed(file, format)
}
