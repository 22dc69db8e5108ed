//! Per-source stream state, created lazily on first observation.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info};

use crate::error::Result;
use crate::filter::{resolve_chain, FilterCatalog, FilterDefinition};

/// Capacity of each correction history buffer.
pub const CORRECTION_BUF_SIZE: usize = 60;

/// Sentinel stored in history slots that have not seen data.
pub const NO_DATA: f64 = -9999.0;

/// Longest tag carried in the correction state.
pub const MAX_TAG_LEN: usize = 24;

/// Correction state handed to the transform for every record of one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionState {
    pub tag: String,
    /// Epoch seconds of the last corrected sample.
    pub time: i64,
    pub temperature: f64,
    pub auto_qc: u8,
    pub manual_qc: u8,
    pub offset: i64,
    pub increment: i64,
    /// Calibrated heights, oldest first.
    pub measured: VecDeque<f64>,
    /// Heights with the tidal prediction removed, oldest first.
    pub residual: VecDeque<f64>,
}

impl CorrectionState {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.chars().take(MAX_TAG_LEN).collect(),
            time: 0,
            temperature: -1.0,
            auto_qc: 11,
            manual_qc: 7,
            offset: 0,
            increment: 1,
            measured: std::iter::repeat(NO_DATA).take(CORRECTION_BUF_SIZE).collect(),
            residual: std::iter::repeat(NO_DATA).take(CORRECTION_BUF_SIZE).collect(),
        }
    }

    /// Push a corrected sample, dropping the oldest entry of each buffer.
    pub fn record(&mut self, time: i64, measured: f64, residual: f64) {
        self.time = time;
        self.offset += self.increment;
        for (buf, value) in [(&mut self.measured, measured), (&mut self.residual, residual)] {
            if buf.len() >= CORRECTION_BUF_SIZE {
                buf.pop_front();
            }
            buf.push_back(value);
        }
    }
}

/// Runtime state of one FIR stage in a stream's decimation chain.
#[derive(Debug, Clone)]
pub struct FilterStage {
    pub filter: Arc<FilterDefinition>,
    /// Most recent inputs, newest last; at most `filter.len()` entries.
    pub history: VecDeque<f64>,
    /// Inputs seen since the last emitted output.
    pub phase: u32,
}

impl FilterStage {
    fn new(filter: Arc<FilterDefinition>) -> Self {
        let taps = filter.len();
        Self {
            filter,
            history: VecDeque::with_capacity(taps),
            phase: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stream {
    pub source_id: String,
    pub alpha: f64,
    pub beta: f64,
    pub correction: CorrectionState,
    pub stages: Vec<FilterStage>,
    pub delay: Duration,
    /// Effective sample rate after the decimation chain.
    pub rate: f64,
}

/// Configuration applied to a stream when it is first seen.
#[derive(Debug, Clone, Default)]
pub struct StreamDefaults {
    pub tag: String,
    pub alpha: f64,
    pub beta: f64,
    pub filters: Vec<String>,
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: HashMap<String, Stream>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stream for `source_id`, creating it from `defaults` if unseen.
    ///
    /// Later calls for a known source ignore `defaults` and `native_rate`.
    pub fn resolve(
        &mut self,
        source_id: &str,
        defaults: &StreamDefaults,
        native_rate: f64,
        catalog: &FilterCatalog,
    ) -> Result<&mut Stream> {
        let entry = match self.streams.entry(source_id.to_string()) {
            Entry::Occupied(entry) => {
                debug!(source = %source_id, "Existing stream");
                return Ok(entry.into_mut());
            }
            Entry::Vacant(entry) => entry,
        };

        let chain = resolve_chain(&defaults.filters, catalog, native_rate)?;
        info!(
            source = %source_id,
            filters = chain.filters.len(),
            delay_ms = chain.delay.num_milliseconds(),
            rate = chain.rate,
            "New stream"
        );

        Ok(entry.insert(Stream {
            source_id: source_id.to_string(),
            alpha: defaults.alpha,
            beta: defaults.beta,
            correction: CorrectionState::new(&defaults.tag),
            stages: chain.filters.into_iter().map(FilterStage::new).collect(),
            delay: chain.delay,
            rate: chain.rate,
        }))
    }

    pub fn get(&self, source_id: &str) -> Option<&Stream> {
        self.streams.get(source_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
