//! Reference harmonic tide correction.
//!
//! Samples pass through the stream's FIR decimation stages, are calibrated with
//! `alpha + beta * x`, and have a harmonic tide prediction removed. Output lines
//! are grouped by UTC minute, one [`OutputRecord`] per minute.

use std::f64::consts::PI;
use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};

use crate::error::{DetideError, Result};
use crate::record::{DecodedRecord, MinuteStamp, OutputRecord};
use crate::registry::{FilterStage, Stream};
use crate::tidal::TidalConfig;
use crate::traits::Transform;

/// Angular speeds of the standard constituents, degrees per mean solar hour.
const CONSTITUENT_SPEEDS: &[(&str, f64)] = &[
    ("M2", 28.984_104_2),
    ("S2", 30.000_000_0),
    ("N2", 28.439_729_5),
    ("K2", 30.082_137_3),
    ("K1", 15.041_068_6),
    ("O1", 13.943_035_6),
    ("P1", 14.958_931_4),
    ("Q1", 13.398_660_9),
    ("M4", 57.968_208_4),
    ("MS4", 58.984_104_2),
    ("M6", 86.952_312_7),
    ("MF", 1.098_033_1),
    ("MM", 0.544_374_7),
    ("SA", 0.041_068_6),
    ("SSA", 0.082_137_3),
];

pub fn constituent_speed(name: &str) -> Option<f64> {
    CONSTITUENT_SPEEDS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, speed)| *speed)
}

pub struct HarmonicTransform {
    /// Speeds aligned with `TidalConfig::constituents`.
    speeds: Vec<f64>,
}

impl HarmonicTransform {
    pub fn new(tidal: &TidalConfig) -> Result<Self> {
        let speeds = tidal
            .constituents
            .iter()
            .map(|c| {
                constituent_speed(&c.name).ok_or_else(|| DetideError::InvalidConstituent {
                    input: c.name.clone(),
                    reason: "unknown constituent".into(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { speeds })
    }

    /// Predicted tide at `t`, in the units of the constituent amplitudes.
    pub fn predict(&self, tidal: &TidalConfig, t: &DateTime<Utc>) -> f64 {
        let hours = epoch_seconds(t) / 3600.0 + tidal.zone;
        tidal
            .constituents
            .iter()
            .zip(&self.speeds)
            .map(|(c, speed)| c.amplitude * (2.0 * PI * (speed * hours / 360.0 - c.lag)).cos())
            .sum()
    }
}

impl Transform for HarmonicTransform {
    fn apply(
        &mut self,
        record: &DecodedRecord,
        stream: &mut Stream,
        tidal: &TidalConfig,
        emit: &mut dyn FnMut(OutputRecord),
    ) -> Result<usize> {
        let mut packed = 0;
        let mut pending: Option<(MinuteStamp, String)> = None;

        for (n, &raw) in record.samples.iter().enumerate() {
            if !raw.is_finite() {
                return Err(DetideError::Transform(format!(
                    "non-finite sample {} in {}",
                    n, record.source_id
                )));
            }

            let mut value = Some(raw);
            for stage in stream.stages.iter_mut() {
                value = value.and_then(|v| push_stage(stage, v));
            }
            let Some(value) = value else { continue };

            let offset = Duration::nanoseconds((n as f64 / record.sample_rate * 1e9).round() as i64);
            let t = record
                .start
                .checked_add_signed(offset)
                .and_then(|t| t.checked_add_signed(stream.delay))
                .ok_or_else(|| {
                    DetideError::Transform(format!(
                        "sample {} of {} is outside the representable time range",
                        n, record.source_id
                    ))
                })?;
            let height = stream.alpha + stream.beta * value;
            let residual = height - self.predict(tidal, &t);
            stream.correction.record(t.timestamp(), height, residual);

            let minute = MinuteStamp::from_datetime(&t);
            if pending.as_ref().is_some_and(|(m, _)| *m != minute) {
                if let Some((m, payload)) = pending.take() {
                    emit(OutputRecord {
                        source_id: stream.source_id.clone(),
                        minute: m,
                        payload,
                    });
                }
            }
            let (_, payload) = pending.get_or_insert_with(|| (minute, String::new()));
            if !stream.correction.tag.is_empty() {
                payload.push_str(&stream.correction.tag);
                payload.push(' ');
            }
            let _ = writeln!(
                payload,
                "{} {:.4} {:.4}",
                t.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                height,
                residual
            );
            packed += 1;
        }

        if let Some((minute, payload)) = pending {
            emit(OutputRecord {
                source_id: stream.source_id.clone(),
                minute,
                payload,
            });
        }
        Ok(packed)
    }
}

/// Feed one input into a decimating FIR stage, returning an output every `decimate` inputs
/// once the stage history is full.
fn push_stage(stage: &mut FilterStage, input: f64) -> Option<f64> {
    let taps = stage.filter.len();
    stage.history.push_back(input);
    if stage.history.len() > taps {
        stage.history.pop_front();
    }

    stage.phase += 1;
    if stage.phase < stage.filter.decimate {
        return None;
    }
    stage.phase = 0;
    if stage.history.len() < taps {
        return None;
    }

    Some(
        stage
            .filter
            .coefficients
            .iter()
            .zip(stage.history.iter().rev())
            .map(|(c, x)| c * x)
            .sum(),
    )
}

fn epoch_seconds(t: &DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + t.timestamp_subsec_nanos() as f64 * 1e-9
}
