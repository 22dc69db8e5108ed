//! Decoded input records and per-minute output records.

use std::fmt;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Deserialize;

use crate::error::{DetideError, Result};
use crate::traits::RecordDecoder;

/// A decoded block of samples from one source.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub source_id: String,
    pub start: DateTime<Utc>,
    /// Native sample rate in Hz.
    pub sample_rate: f64,
    pub samples: Vec<f64>,
}

/// UTC minute a bucket file covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MinuteStamp {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl MinuteStamp {
    pub fn from_datetime(ts: &DateTime<Utc>) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
            day: ts.day(),
            hour: ts.hour(),
            minute: ts.minute(),
        }
    }
}

/// `YYYYMMDDHHmm`, as used in bucket file names.
impl fmt::Display for MinuteStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}{:02}{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }
}

/// Transform output for one stream and one minute.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub source_id: String,
    pub minute: MinuteStamp,
    pub payload: String,
}

#[derive(Debug, Deserialize)]
struct JsonRecord {
    network: String,
    station: String,
    #[serde(default)]
    location: String,
    channel: String,
    start: DateTime<Utc>,
    sample_rate: f64,
    samples: Vec<f64>,
}

/// Decodes one JSON object per record:
/// `{"network":"NZ","station":"TGA","location":"40","channel":"BTT","start":"...","sample_rate":1.0,"samples":[...]}`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRecordDecoder;

impl JsonRecordDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl RecordDecoder for JsonRecordDecoder {
    fn decode(&self, raw: &[u8]) -> Result<DecodedRecord> {
        let rec: JsonRecord =
            serde_json::from_slice(raw).map_err(|e| DetideError::Decode(e.to_string()))?;

        if rec.network.is_empty() || rec.station.is_empty() || rec.channel.is_empty() {
            return Err(DetideError::Decode("missing stream identification".into()));
        }
        if !(rec.sample_rate.is_finite() && rec.sample_rate > 0.0) {
            return Err(DetideError::Decode(format!(
                "invalid sample rate {}",
                rec.sample_rate
            )));
        }

        Ok(DecodedRecord {
            source_id: format!(
                "{}_{}_{}_{}",
                rec.network, rec.station, rec.location, rec.channel
            ),
            start: rec.start,
            sample_rate: rec.sample_rate,
            samples: rec.samples,
        })
    }
}
