//! Snapshot persistence
//!
//! One JSON blob per snapshot id (`<id>.json`, or `<id>.json.gz` when
//! compression is on) plus a `<id>.meta.json` sidecar that lists cheaply
//! without loading blobs. Blob content is byte-stable for identical inputs.

use crate::model::Snapshot;
use crate::{Result, SnapshotError};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sidecar metadata for a stored snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Snapshot id
    pub id: String,
    /// Operator-assigned name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Capture time
    pub created_at: DateTime<Utc>,
    /// Uncompressed blob size
    pub size_bytes: u64,
    /// Organizational tags
    pub tags: Vec<String>,
    /// Environment the capture came from
    pub environment: String,
}

/// Filesystem-backed snapshot store
pub struct SnapshotStorage {
    root: PathBuf,
    compress: bool,
    compress_level: u32,
    environment: String,
}

impl SnapshotStorage {
    /// Create a store rooted at `root`
    pub fn new(
        root: impl Into<PathBuf>,
        compress: bool,
        compress_level: u32,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            compress,
            compress_level,
            environment: environment.into(),
        }
    }

    fn blob_path(&self, id: &str, compressed: bool) -> PathBuf {
        if compressed {
            self.root.join(format!("{}.json.gz", id))
        } else {
            self.root.join(format!("{}.json", id))
        }
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", id))
    }

    /// Persist a snapshot and its sidecar; fills the `compressed` flag
    pub async fn save(&self, snapshot: &mut Snapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        snapshot.compressed = self.compress;
        let serialized = serde_json::to_vec(&snapshot)?;

        let bytes = if self.compress {
            let mut encoder =
                GzEncoder::new(Vec::new(), Compression::new(self.compress_level));
            encoder.write_all(&serialized)?;
            encoder.finish()?
        } else {
            serialized.clone()
        };

        let path = self.blob_path(&snapshot.id, self.compress);
        tokio::fs::write(&path, &bytes).await?;

        let meta = SnapshotMeta {
            id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            description: snapshot.description.clone(),
            created_at: snapshot.created_at,
            size_bytes: snapshot.size_bytes,
            tags: snapshot.tags.clone(),
            environment: self.environment.clone(),
        };
        tokio::fs::write(self.meta_path(&snapshot.id), serde_json::to_vec_pretty(&meta)?)
            .await?;

        debug!(id = %snapshot.id, path = %path.display(), "snapshot saved");
        Ok(())
    }

    /// Load a snapshot by id, verifying its checksum
    pub async fn load(&self, id: &str) -> Result<Snapshot> {
        let (bytes, compressed) = self.read_blob(id).await?;
        let serialized = if compressed {
            let mut decoder = GzDecoder::new(bytes.as_slice());
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).map_err(|e| SnapshotError::Corrupt {
                id: id.to_string(),
                reason: format!("gzip decode failed: {}", e),
            })?;
            out
        } else {
            bytes
        };

        let snapshot: Snapshot =
            serde_json::from_slice(&serialized).map_err(|e| SnapshotError::Corrupt {
                id: id.to_string(),
                reason: format!("json decode failed: {}", e),
            })?;

        if !snapshot.verify_checksum() {
            return Err(SnapshotError::Corrupt {
                id: id.to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }
        Ok(snapshot)
    }

    async fn read_blob(&self, id: &str) -> Result<(Vec<u8>, bool)> {
        let plain = self.blob_path(id, false);
        if plain.exists() {
            return Ok((tokio::fs::read(plain).await?, false));
        }
        let gz = self.blob_path(id, true);
        if gz.exists() {
            return Ok((tokio::fs::read(gz).await?, true));
        }
        Err(SnapshotError::NotFound(id.to_string()))
    }

    /// Delete a snapshot's blob and sidecar
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut found = false;
        for path in [
            self.blob_path(id, false),
            self.blob_path(id, true),
            self.meta_path(id),
        ] {
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
                found = true;
            }
        }
        if !found {
            return Err(SnapshotError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// List stored snapshots, optionally filtered by name or tag substring
    pub async fn list(&self, filter: Option<&str>) -> Result<Vec<SnapshotMeta>> {
        if !Path::new(&self.root).exists() {
            return Ok(Vec::new());
        }

        let mut metas = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(".meta.json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let Ok(meta) = serde_json::from_slice::<SnapshotMeta>(&bytes) else {
                continue;
            };
            let keep = match filter {
                None => true,
                Some(needle) => {
                    meta.name.contains(needle) || meta.tags.iter().any(|t| t.contains(needle))
                }
            };
            if keep {
                metas.push(meta);
            }
        }

        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(metas)
    }
}
