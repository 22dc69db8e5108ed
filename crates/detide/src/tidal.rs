//! Tidal reference configuration shared by every stream.

use std::fmt;
use std::str::FromStr;

use crate::error::DetideError;

/// A single harmonic constituent as given on the command line (`name/amplitude/lag`).
#[derive(Debug, Clone, PartialEq)]
pub struct Constituent {
    pub name: String,
    pub amplitude: f64,
    /// Phase lag as a fraction of a full cycle (degrees / 360).
    pub lag: f64,
}

impl FromStr for Constituent {
    type Err = DetideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DetideError::InvalidConstituent {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.split('/').map(str::trim).collect();
        if parts.len() < 3 {
            return Err(invalid("expected <label>/<amplitude>/<lag>"));
        }
        if parts[0].is_empty() {
            return Err(invalid("empty label"));
        }

        let amplitude: f64 = parts[1]
            .parse()
            .map_err(|_| invalid("amplitude is not a number"))?;
        let degrees: f64 = parts[2]
            .parse()
            .map_err(|_| invalid("lag is not a number"))?;

        Ok(Self {
            name: parts[0].to_string(),
            amplitude,
            lag: degrees / 360.0,
        })
    }
}

impl fmt::Display for Constituent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({:6.3})", self.name, self.amplitude, self.lag)
    }
}

/// Process-wide tidal configuration; read-only once ingestion starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TidalConfig {
    pub latitude: f64,
    /// Reference time-zone offset in hours.
    pub zone: f64,
    pub constituents: Vec<Constituent>,
}

impl TidalConfig {
    pub fn new(latitude: f64, zone: f64, constituents: Vec<Constituent>) -> Self {
        Self {
            latitude,
            zone,
            constituents,
        }
    }
}
