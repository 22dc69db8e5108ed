//! FIR filter catalog and decimation chain bookkeeping.
//!
//! Filter definitions are loaded once from a YAML file:
//!
//! ```yaml
//! filters:
//!   - name: fir2
//!     decimate: 2
//!     minimum: false
//!     coefficients: [0.25, 0.5, 0.25]
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use serde::Deserialize;
use tracing::debug;

use crate::error::{DetideError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct FilterDefinition {
    pub name: String,
    pub coefficients: Vec<f64>,
    pub decimate: u32,
    /// Minimum-phase filters contribute no group delay.
    pub minimum: bool,
}

impl FilterDefinition {
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct FilterFile {
    filters: Vec<FilterEntry>,
}

#[derive(Debug, Deserialize)]
struct FilterEntry {
    name: String,
    decimate: u32,
    #[serde(default)]
    minimum: bool,
    coefficients: Vec<f64>,
}

/// Named filter definitions, immutable after load.
#[derive(Debug, Default)]
pub struct FilterCatalog {
    filters: HashMap<String, Arc<FilterDefinition>>,
}

impl FilterCatalog {
    pub fn new(definitions: impl IntoIterator<Item = FilterDefinition>) -> Result<Self> {
        let mut filters = HashMap::new();
        for def in definitions {
            if def.name.is_empty() {
                return Err(DetideError::Config("filter with empty name".into()));
            }
            if def.decimate == 0 {
                return Err(DetideError::Config(format!(
                    "filter [{}] must decimate by at least 1",
                    def.name
                )));
            }
            if def.is_empty() {
                return Err(DetideError::Config(format!(
                    "filter [{}] has no coefficients",
                    def.name
                )));
            }
            let name = def.name.clone();
            if filters.insert(name.clone(), Arc::new(def)).is_some() {
                return Err(DetideError::Config(format!("duplicate filter [{}]", name)));
            }
        }
        Ok(Self { filters })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: FilterFile = serde_yaml::from_str(content)?;
        Self::new(file.filters.into_iter().map(|e| FilterDefinition {
            name: e.name,
            coefficients: e.coefficients,
            decimate: e.decimate,
            minimum: e.minimum,
        }))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let load_err = |reason: String| DetideError::FilterLoad {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let catalog = Self::from_yaml(&content).map_err(|e| load_err(e.to_string()))?;
        debug!(path = %path.display(), filters = catalog.len(), "Loaded fir filters");
        Ok(catalog)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<FilterDefinition>> {
        self.filters.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Outcome of walking a stream's filter chain.
#[derive(Debug, Clone)]
pub struct ResolvedChain {
    pub filters: Vec<Arc<FilterDefinition>>,
    /// Cumulative group delay; never positive.
    pub delay: Duration,
    /// Sample rate after every decimation stage.
    pub rate: f64,
}

/// Resolve `names` in order and accumulate delay and decimation from `native_rate`.
///
/// Each non minimum-phase stage delays by `(length/2 - 0.5)` samples at the rate
/// seen by that stage, before its own decimation is applied.
pub fn resolve_chain<S: AsRef<str>>(
    names: &[S],
    catalog: &FilterCatalog,
    native_rate: f64,
) -> Result<ResolvedChain> {
    let mut filters = Vec::with_capacity(names.len());
    let mut delay = Duration::zero();
    let mut rate = native_rate;

    for name in names {
        let name = name.as_ref();
        let filter = catalog
            .lookup(name)
            .ok_or_else(|| DetideError::FilterNotFound(name.to_string()))?;

        if !filter.minimum && rate > 0.0 {
            let seconds = (filter.len() as f64 / 2.0 - 0.5) / rate;
            delay = delay - Duration::nanoseconds((seconds * 1e9).round() as i64);
        }
        rate /= filter.decimate as f64;
        filters.push(filter);
    }

    Ok(ResolvedChain {
        filters,
        delay,
        rate,
    })
}
