//! Periodic and shutdown persistence of the live stream position.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{DetideError, Result};
use crate::traits::StreamClient;

/// Last sequence number collected per station (`NET_STA`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub positions: BTreeMap<String, u64>,
}

impl Checkpoint {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| DetideError::Checkpoint(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| DetideError::Checkpoint(format!("{}: {}", path.display(), e)))
    }

    /// Write via a hidden temporary sibling and rename, so a crash never leaves a torn file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .ok_or_else(|| DetideError::Checkpoint(format!("{}: not a file", path.display())))?;
        let tmp = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Saves the client position every `interval` processed packets and once on shutdown.
#[derive(Debug)]
pub struct CheckpointManager {
    path: Option<PathBuf>,
    interval: u32,
    pending: u32,
    saves: u64,
}

impl CheckpointManager {
    /// `interval == 0` disables periodic saves; `path == None` disables all saves.
    pub fn new(path: Option<PathBuf>, interval: u32) -> Self {
        Self {
            path,
            interval,
            pending: 0,
            saves: 0,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Successful saves so far.
    pub fn saves(&self) -> u64 {
        self.saves
    }

    /// Count one processed packet, saving when the interval is reached.
    pub fn packet_processed<C: StreamClient + ?Sized>(&mut self, client: &C) {
        if self.path.is_none() || self.interval == 0 {
            return;
        }
        self.pending += 1;
        if self.pending >= self.interval {
            self.pending = 0;
            self.save(client);
        }
    }

    /// Final save on orderly shutdown.
    pub fn finish<C: StreamClient + ?Sized>(&mut self, client: &C) {
        if self.path.is_some() {
            info!("Saving final checkpoint");
            self.save(client);
        }
    }

    fn save<C: StreamClient + ?Sized>(&mut self, client: &C) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        match client.save_checkpoint(path) {
            Ok(()) => {
                self.saves += 1;
                debug!(path = %path.display(), "Checkpoint saved");
            }
            Err(e) => error!(path = %path.display(), error = %e, "Failed to save checkpoint"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");

        let mut cp = Checkpoint::default();
        cp.positions.insert("NZ_TGA".into(), 42);
        cp.positions.insert("NZ_NCT".into(), 7);
        cp.save(&path).unwrap();

        assert_eq!(Checkpoint::load(&path).unwrap(), cp);
        assert!(!tmp.path().join(".state.json.tmp").exists());
    }

    #[test]
    fn test_load_missing_or_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        assert!(matches!(Checkpoint::load(&path), Err(DetideError::Checkpoint(_))));

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(DetideError::Checkpoint(_))));
    }
}
