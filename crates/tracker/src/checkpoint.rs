use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Durable scan progress, persisted as JSON between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_full_scan: FullScanMark,
    pub last_incremental: IncrementalMark,
    pub genesis_scan_completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullScanMark {
    pub block: u64,
    pub timestamp: String,
    pub total_users: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalMark {
    pub block: u64,
    pub timestamp: String,
}

impl Checkpoint {
    fn initial(genesis_block: u64) -> Self {
        Self {
            last_full_scan: FullScanMark {
                block: genesis_block,
                timestamp: String::new(),
                total_users: 0,
            },
            last_incremental: IncrementalMark {
                block: genesis_block,
                timestamp: String::new(),
            },
            genesis_scan_completed: false,
        }
    }

    /// Load the checkpoint file, falling back to a fresh one at the genesis
    /// block when the file is missing or unreadable.
    pub fn load_or_init(path: &Path, genesis_block: u64) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(cp) => cp,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt checkpoint, starting fresh");
                    Self::initial(genesis_block)
                }
            },
            Err(_) => Self::initial(genesis_block),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing checkpoint to {}", path.display()))
    }

    pub fn record_full_scan(&mut self, block: u64, total_users: u64) {
        self.last_full_scan = FullScanMark {
            block,
            timestamp: Utc::now().to_rfc3339(),
            total_users,
        };
        self.genesis_scan_completed = true;
        self.advance_incremental(block);
    }

    /// Move the incremental mark forward. The mark never goes backwards, so a
    /// scan that raced an earlier one cannot rewind progress.
    pub fn advance_incremental(&mut self, block: u64) {
        if block >= self.last_incremental.block {
            self.last_incremental = IncrementalMark {
                block,
                timestamp: Utc::now().to_rfc3339(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_starts_at_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Checkpoint::load_or_init(&dir.path().join("checkpoint.json"), 30_732_159);
        assert_eq!(cp.last_incremental.block, 30_732_159);
        assert!(!cp.genesis_scan_completed);
        assert_eq!(cp.last_full_scan.total_users, 0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut cp = Checkpoint::load_or_init(&path, 100);
        cp.record_full_scan(5000, 42);
        cp.save(&path).unwrap();

        let loaded = Checkpoint::load_or_init(&path, 100);
        assert!(loaded.genesis_scan_completed);
        assert_eq!(loaded.last_full_scan.block, 5000);
        assert_eq!(loaded.last_full_scan.total_users, 42);
        assert_eq!(loaded.last_incremental.block, 5000);
        assert!(!loaded.last_full_scan.timestamp.is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "{not json").unwrap();

        let cp = Checkpoint::load_or_init(&path, 777);
        assert_eq!(cp.last_incremental.block, 777);
        assert!(!cp.genesis_scan_completed);
    }

    #[test]
    fn test_incremental_mark_never_rewinds() {
        let mut cp = Checkpoint::initial(0);
        cp.advance_incremental(900);
        cp.advance_incremental(500);
        assert_eq!(cp.last_incremental.block, 900);
    }
}
