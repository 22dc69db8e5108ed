//! Stream selection for live subscriptions.
//!
//! Exactly one of three sources is used: a stream list file, an explicit
//! multi-stream expression, or uni-station selectors alone.

use std::path::Path;

use crate::error::{DetideError, Result};

/// Selectors used when none are given.
pub const DEFAULT_SELECTORS: &str = "?TZ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationSelector {
    pub network: String,
    pub station: String,
    pub selectors: Vec<String>,
}

impl StationSelector {
    /// Position key, `NET_STA`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.network, self.station)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Multi(Vec<StationSelector>),
    Uni { selectors: Vec<String> },
}

impl Selection {
    /// Pick the selection from CLI options: a stream list wins over an explicit
    /// expression, which wins over plain selectors.
    pub fn from_options(
        streamlist: Option<&Path>,
        streams: Option<&str>,
        selectors: &str,
    ) -> Result<Self> {
        match (streamlist, streams) {
            (Some(path), _) => Self::read_streamlist(path, selectors),
            (None, Some(expr)) => Self::parse_streams(expr, selectors),
            (None, None) => Self::uni(selectors),
        }
    }

    pub fn uni(selectors: &str) -> Result<Self> {
        let selectors = split_selectors(selectors);
        if selectors.is_empty() {
            return Err(selection_error("selectors", "no selectors given"));
        }
        Ok(Selection::Uni { selectors })
    }

    /// Parse `NET_STA[:SEL SEL...],NET_STA...`; entries without their own
    /// selectors take `default_selectors`.
    pub fn parse_streams(expr: &str, default_selectors: &str) -> Result<Self> {
        let defaults = split_selectors(default_selectors);
        let mut stations = Vec::new();

        for entry in expr.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, sel) = match entry.split_once(':') {
                Some((name, sel)) => (name.trim(), split_selectors(sel)),
                None => (entry, defaults.clone()),
            };
            let (network, station) = name
                .split_once('_')
                .ok_or_else(|| selection_error(expr, &format!("'{}' is not NET_STA", entry)))?;
            stations.push(station_selector(expr, network, station, sel)?);
        }

        if stations.is_empty() {
            return Err(selection_error(expr, "no streams given"));
        }
        Ok(Selection::Multi(stations))
    }

    /// Read a stream list file: `NET STA [SEL...]` per line, `#` starts a comment.
    pub fn read_streamlist(path: &Path, default_selectors: &str) -> Result<Self> {
        let name = path.display().to_string();
        let content =
            std::fs::read_to_string(path).map_err(|e| selection_error(&name, &e.to_string()))?;
        let defaults = split_selectors(default_selectors);
        let mut stations = Vec::new();

        for (n, line) in content.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                return Err(selection_error(
                    &name,
                    &format!("line {}: expected NET STA [selectors]", n + 1),
                ));
            }
            let selectors = if fields.len() > 2 {
                fields[2..].iter().map(|s| s.to_string()).collect()
            } else {
                defaults.clone()
            };
            stations.push(station_selector(&name, fields[0], fields[1], selectors)?);
        }

        if stations.is_empty() {
            return Err(selection_error(&name, "no streams listed"));
        }
        Ok(Selection::Multi(stations))
    }
}

fn station_selector(
    source: &str,
    network: &str,
    station: &str,
    selectors: Vec<String>,
) -> Result<StationSelector> {
    if network.is_empty() || station.is_empty() {
        return Err(selection_error(source, "empty network or station"));
    }
    Ok(StationSelector {
        network: network.to_string(),
        station: station.to_string(),
        selectors,
    })
}

fn split_selectors(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

fn selection_error(source: &str, reason: &str) -> DetideError {
    DetideError::Selection {
        source_name: source.to_string(),
        reason: reason.to_string(),
    }
}
