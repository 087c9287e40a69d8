//! Snapshot capture, restore, compare, and assert

use crate::config::SnapshotConfig;
use crate::differ::{DiffResult, Differ};
use crate::model::{JobState, QueueState, Snapshot, WorkerState, SNAPSHOT_VERSION};
use crate::storage::{SnapshotMeta, SnapshotStorage};
use crate::{Result, SnapshotError};
use chrono::{DateTime, Utc};
use queueforge_core::QueueStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const QUEUE_PREFIX: &str = "queue:";
const QUEUE_CONFIG_PREFIX: &str = "config:queue:";
const WORKER_PREFIX: &str = "worker:";
const METRIC_PREFIX: &str = "metrics:";

/// Result of asserting current state against a stored snapshot
#[derive(Debug)]
pub struct AssertionOutcome {
    /// Whether the current state matches the expectation
    pub passed: bool,
    /// The differences found
    pub diff: DiffResult,
}

/// Captures, restores, and compares queue state through a [`QueueStore`]
pub struct SnapshotEngine {
    config: SnapshotConfig,
    store: Arc<dyn QueueStore>,
    storage: SnapshotStorage,
}

impl SnapshotEngine {
    /// Create an engine; configuration errors are fatal here
    pub fn new(config: SnapshotConfig, store: Arc<dyn QueueStore>) -> Result<Self> {
        config.validate()?;
        let storage = SnapshotStorage::new(
            config.storage_path.clone(),
            config.compress,
            config.compress_level,
            config.environment.clone(),
        );
        Ok(Self {
            config,
            store,
            storage,
        })
    }

    /// Capture current state into a new saved snapshot
    ///
    /// Queues are read first, then jobs (capped at the configured maximum,
    /// in queue-name order), then workers, then metrics. Collections land in
    /// canonical order so identical external state captures identically.
    pub async fn capture(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        tags: Vec<String>,
    ) -> Result<Snapshot> {
        let name = name.into();
        let description = description.into();
        let capture = self.capture_inner(name, description, tags);
        let mut snapshot = tokio::time::timeout(self.config.capture_timeout, capture)
            .await
            .map_err(|_| SnapshotError::CaptureTimeout)??;
        self.storage.save(&mut snapshot).await?;
        info!(id = %snapshot.id, checksum = %snapshot.checksum, "snapshot captured");
        Ok(snapshot)
    }

    async fn capture_inner(
        &self,
        name: String,
        description: String,
        tags: Vec<String>,
    ) -> Result<Snapshot> {
        let mut queue_names: Vec<String> = self
            .store
            .scan_keys(&format!("{}*", QUEUE_PREFIX))
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(QUEUE_PREFIX).map(str::to_string))
            .collect();
        queue_names.sort();

        let mut queues = Vec::with_capacity(queue_names.len());
        for queue_name in &queue_names {
            let length = self.store.list_len(&format!("{}{}", QUEUE_PREFIX, queue_name)).await?;
            let mut config = self
                .store
                .hash_get_all(&format!("{}{}", QUEUE_CONFIG_PREFIX, queue_name))
                .await?;
            let rate_limit = config.remove("rate_limit");
            let dead_letter = config.remove("dead_letter");
            queues.push(QueueState {
                name: queue_name.clone(),
                queue_type: "list".to_string(),
                length,
                config,
                rate_limit,
                dead_letter,
            });
        }

        let mut jobs = Vec::new();
        'queues: for queue_name in &queue_names {
            let entries = self
                .store
                .list_range(&format!("{}{}", QUEUE_PREFIX, queue_name), 0, -1)
                .await?;
            for entry in entries {
                if jobs.len() >= self.config.max_jobs_per_snapshot {
                    warn!(
                        cap = self.config.max_jobs_per_snapshot,
                        "job capture cap reached, remaining jobs omitted"
                    );
                    break 'queues;
                }
                match serde_json::from_str::<JobState>(&entry) {
                    Ok(job) => jobs.push(job),
                    Err(e) => {
                        warn!(queue = %queue_name, error = %e, "skipping unparsable job entry");
                    }
                }
            }
        }

        let worker_keys = self.store.scan_keys(&format!("{}*", WORKER_PREFIX)).await?;
        let mut workers = Vec::with_capacity(worker_keys.len());
        for key in worker_keys {
            let Some(id) = key.strip_prefix(WORKER_PREFIX) else {
                continue;
            };
            let hash = self.store.hash_get_all(&key).await?;
            if hash.is_empty() {
                continue;
            }
            workers.push(worker_from_hash(id, &hash));
        }

        let metric_keys = self.store.scan_keys(&format!("{}*", METRIC_PREFIX)).await?;
        let mut metrics = BTreeMap::new();
        for key in metric_keys {
            let Some(short) = key.strip_prefix(METRIC_PREFIX) else {
                continue;
            };
            if let Some(value) = self.store.string_get(&key).await? {
                if let Ok(parsed) = value.parse::<f64>() {
                    metrics.insert(short.to_string(), parsed);
                }
            }
        }

        Ok(Snapshot::assemble(name, description, tags, queues, jobs, workers, metrics))
    }

    /// Load a stored snapshot
    pub async fn load(&self, id: &str) -> Result<Snapshot> {
        self.storage.load(id).await
    }

    /// Delete a stored snapshot
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.storage.delete(id).await
    }

    /// List stored snapshots, optionally filtered by name/tag substring
    pub async fn list(&self, filter: Option<&str>) -> Result<Vec<SnapshotMeta>> {
        self.storage.list(filter).await
    }

    /// Restore a snapshot into the store
    ///
    /// Clears queues, queue configs, and worker records, then re-applies
    /// configs, re-pushes jobs in captured order, and rewrites worker hash
    /// records. Worker liveness is NOT restored; callers must restart
    /// workers externally. Best-effort: quiesce the system first.
    pub async fn restore(&self, id: &str) -> Result<()> {
        let snapshot = self.load(id).await?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::RestoreConflict {
                id: id.to_string(),
                reason: format!(
                    "snapshot version {} does not match engine version {}",
                    snapshot.version, SNAPSHOT_VERSION
                ),
            });
        }

        for prefix in [QUEUE_PREFIX, QUEUE_CONFIG_PREFIX, WORKER_PREFIX] {
            for key in self.store.scan_keys(&format!("{}*", prefix)).await? {
                self.store.delete_key(&key).await?;
            }
        }

        for queue in &snapshot.queues {
            let mut fields: Vec<(String, String)> = queue
                .config
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if let Some(rate_limit) = &queue.rate_limit {
                fields.push(("rate_limit".to_string(), rate_limit.clone()));
            }
            if let Some(dead_letter) = &queue.dead_letter {
                fields.push(("dead_letter".to_string(), dead_letter.clone()));
            }
            if !fields.is_empty() {
                self.store
                    .hash_set(&format!("{}{}", QUEUE_CONFIG_PREFIX, queue.name), &fields)
                    .await?;
            }
        }

        for job in &snapshot.jobs {
            let entry = serde_json::to_string(job)?;
            self.store
                .right_push(&format!("{}{}", QUEUE_PREFIX, job.queue), &[entry])
                .await?;
        }

        for worker in &snapshot.workers {
            self.store
                .hash_set(&format!("{}{}", WORKER_PREFIX, worker.id), &worker_to_hash(worker))
                .await?;
        }

        info!(id, queues = snapshot.queues.len(), jobs = snapshot.jobs.len(), "snapshot restored");
        Ok(())
    }

    /// Compare two stored snapshots
    pub async fn compare(&self, left_id: &str, right_id: &str) -> Result<DiffResult> {
        let left = self.load(left_id).await?;
        let right = self.load(right_id).await?;
        Ok(Differ::new(self.config.diff_options.clone()).diff(&left, &right))
    }

    /// Assert current state matches a stored snapshot
    ///
    /// Captures into a temporary snapshot, diffs against the expectation,
    /// and deletes the temporary snapshot before returning.
    pub async fn assert_matches(&self, id: &str) -> Result<AssertionOutcome> {
        let expected = self.load(id).await?;
        let current = self
            .capture(format!("assert-{}", id), "assertion capture", vec!["assert".to_string()])
            .await?;

        let diff = Differ::new(self.config.diff_options.clone()).diff(&expected, &current);
        let passed = diff.total_changes() == 0;

        if let Err(e) = self.delete(&current.id).await {
            debug!(id = %current.id, error = %e, "failed to delete assertion snapshot");
        }

        Ok(AssertionOutcome { passed, diff })
    }
}

fn worker_from_hash(id: &str, hash: &BTreeMap<String, String>) -> WorkerState {
    WorkerState {
        id: id.to_string(),
        status: hash.get("status").cloned().unwrap_or_else(|| "unknown".to_string()),
        current_job_id: hash.get("current_job_id").cloned().filter(|v| !v.is_empty()),
        last_seen: hash
            .get("last_seen")
            .and_then(|v| v.parse::<DateTime<Utc>>().ok())
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        processed_count: hash.get("processed_count").and_then(|v| v.parse().ok()).unwrap_or(0),
        error_count: hash.get("error_count").and_then(|v| v.parse().ok()).unwrap_or(0),
    }
}

fn worker_to_hash(worker: &WorkerState) -> Vec<(String, String)> {
    let mut fields = vec![
        ("status".to_string(), worker.status.clone()),
        ("last_seen".to_string(), worker.last_seen.to_rfc3339()),
        ("processed_count".to_string(), worker.processed_count.to_string()),
        ("error_count".to_string(), worker.error_count.to_string()),
    ];
    if let Some(job_id) = &worker.current_job_id {
        fields.push(("current_job_id".to_string(), job_id.clone()));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;
    use queueforge_core::{MemoryStore, Priority};
    use tempfile::TempDir;

    fn job_entry(queue: &str, id: &str) -> String {
        serde_json::to_string(&JobState {
            id: id.to_string(),
            queue: queue.to_string(),
            payload: serde_json::json!({"task": "send"}),
            priority: Priority::Medium,
            status: JobStatus::Pending,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            attempts: 0,
            max_retries: 3,
            error: None,
        })
        .unwrap()
    }

    async fn seed(store: &MemoryStore, queue: &str, jobs: &[&str]) {
        let entries: Vec<String> = jobs.iter().map(|id| job_entry(queue, id)).collect();
        store.right_push(&format!("queue:{}", queue), &entries).await.unwrap();
    }

    fn engine(dir: &TempDir, store: Arc<MemoryStore>) -> SnapshotEngine {
        let mut config = SnapshotConfig::default();
        config.storage_path = dir.path().to_path_buf();
        SnapshotEngine::new(config, store).unwrap()
    }

    #[tokio::test]
    async fn test_identical_state_identical_checksums() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        seed(&store, "test", &["1", "2", "3"]).await;
        let engine = engine(&dir, store);

        let a = engine.capture("a", "", vec![]).await.unwrap();
        let b = engine.capture("b", "", vec![]).await.unwrap();
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[tokio::test]
    async fn test_capture_then_mutate_then_diff_and_restore() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        seed(&store, "test", &["1", "2", "3"]).await;
        seed(&store, "high", &["4", "5"]).await;
        seed(&store, "low", &["6"]).await;
        let engine = engine(&dir, store.clone());

        let s1 = engine.capture("s1", "baseline", vec![]).await.unwrap();

        // Mutate: append an unexpected job
        seed(&store, "test", &["unexpected"]).await;
        let s2 = engine.capture("s2", "drifted", vec![]).await.unwrap();

        let diff = engine.compare(&s1.id, &s2.id).await.unwrap();
        assert!(diff.total_changes() > 0);

        // Restore the baseline and verify the drift is gone
        engine.restore(&s1.id).await.unwrap();
        let s3 = engine.capture("s3", "restored", vec![]).await.unwrap();
        let diff = engine.compare(&s1.id, &s3.id).await.unwrap();
        assert_eq!(diff.total_changes(), 0, "changes: {:?}", diff);
        assert_eq!(s1.checksum, s3.checksum);
    }

    #[tokio::test]
    async fn test_assert_matches() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        seed(&store, "jobs", &["1"]).await;
        let engine = engine(&dir, store.clone());

        let baseline = engine.capture("baseline", "", vec![]).await.unwrap();

        let outcome = engine.assert_matches(&baseline.id).await.unwrap();
        assert!(outcome.passed);

        seed(&store, "jobs", &["2"]).await;
        let outcome = engine.assert_matches(&baseline.id).await.unwrap();
        assert!(!outcome.passed);
        assert!(outcome.diff.total_changes() > 0);

        // Temporary assertion snapshots are cleaned up
        let remaining = engine.list(Some("assert-")).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_job_cap_respected() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        seed(&store, "jobs", &["1", "2", "3", "4", "5"]).await;

        let mut config = SnapshotConfig::default();
        config.storage_path = dir.path().to_path_buf();
        config.max_jobs_per_snapshot = 3;
        let engine = SnapshotEngine::new(config, store).unwrap();

        let snapshot = engine.capture("capped", "", vec![]).await.unwrap();
        assert_eq!(snapshot.jobs.len(), 3);
        // Queue length still reflects the full list
        assert_eq!(snapshot.queues[0].length, 5);
    }

    #[tokio::test]
    async fn test_workers_and_metrics_captured() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .hash_set(
                "worker:w1",
                &[
                    ("status".to_string(), "busy".to_string()),
                    ("processed_count".to_string(), "17".to_string()),
                ],
            )
            .await
            .unwrap();
        store.string_set("metrics:throughput", "12.5").await.unwrap();
        let engine = engine(&dir, store);

        let snapshot = engine.capture("full", "", vec![]).await.unwrap();
        assert_eq!(snapshot.workers.len(), 1);
        assert_eq!(snapshot.workers[0].status, "busy");
        assert_eq!(snapshot.workers[0].processed_count, 17);
        assert_eq!(snapshot.metrics.get("throughput"), Some(&12.5));
    }

    #[tokio::test]
    async fn test_restore_preserves_queue_config() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        seed(&store, "jobs", &["1"]).await;
        store
            .hash_set(
                "config:queue:jobs",
                &[
                    ("max_retries".to_string(), "5".to_string()),
                    ("rate_limit".to_string(), "100/s".to_string()),
                ],
            )
            .await
            .unwrap();
        let engine = engine(&dir, store.clone());

        let snapshot = engine.capture("with-config", "", vec![]).await.unwrap();
        assert_eq!(snapshot.queues[0].rate_limit.as_deref(), Some("100/s"));

        store.delete_key("config:queue:jobs").await.unwrap();
        engine.restore(&snapshot.id).await.unwrap();

        let config = store.hash_get_all("config:queue:jobs").await.unwrap();
        assert_eq!(config.get("max_retries").map(String::as_str), Some("5"));
        assert_eq!(config.get("rate_limit").map(String::as_str), Some("100/s"));
    }
}
