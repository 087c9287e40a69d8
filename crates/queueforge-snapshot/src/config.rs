//! Snapshot engine configuration

use crate::differ::DiffOptions;
use crate::{Result, SnapshotError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Snapshot engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory holding snapshot blobs and sidecars
    pub storage_path: PathBuf,
    /// Gzip snapshot blobs on disk
    pub compress: bool,
    /// Gzip level (0-9)
    pub compress_level: u32,
    /// Cap on jobs captured per snapshot, across all queues
    pub max_jobs_per_snapshot: usize,
    /// Environment tag recorded in the meta sidecar
    pub environment: String,
    /// Bound on a single capture
    pub capture_timeout: Duration,
    /// Default comparison options
    pub diff_options: DiffOptions,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("snapshots"),
            compress: false,
            compress_level: 6,
            max_jobs_per_snapshot: 10_000,
            environment: "development".to_string(),
            capture_timeout: Duration::from_secs(30),
            diff_options: DiffOptions::default(),
        }
    }
}

impl SnapshotConfig {
    /// Validate all fields; called at engine construction
    pub fn validate(&self) -> Result<()> {
        if self.compress_level > 9 {
            return Err(SnapshotError::Config {
                field: "compress_level",
                reason: format!("{} out of range 0-9", self.compress_level),
            });
        }
        if self.max_jobs_per_snapshot == 0 {
            return Err(SnapshotError::Config {
                field: "max_jobs_per_snapshot",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.capture_timeout.is_zero() {
            return Err(SnapshotError::Config {
                field: "capture_timeout",
                reason: "duration must be positive".to_string(),
            });
        }
        if self.storage_path.as_os_str().is_empty() {
            return Err(SnapshotError::Config {
                field: "storage_path",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
