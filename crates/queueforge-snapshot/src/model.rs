//! Snapshot data model and canonical serialization

use chrono::{DateTime, Utc};
use queueforge_core::Priority;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Job lifecycle state as stored in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in a queue
    Pending,
    /// Claimed by a worker
    Processing,
    /// Finished successfully
    Completed,
    /// Finished with an error, retries remain
    Failed,
    /// Exhausted retries, parked in the dead letter queue
    Dead,
}

impl JobStatus {
    /// Stable string form used in diff paths
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }
}

/// Captured state of one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    /// Queue name
    pub name: String,
    /// Underlying structure type (always "list" for now)
    pub queue_type: String,
    /// Number of entries at capture time
    pub length: u64,
    /// Configuration hash, reserved keys extracted below
    pub config: BTreeMap<String, String>,
    /// Raw rate limit setting, when configured
    pub rate_limit: Option<String>,
    /// Dead letter queue target, when configured
    pub dead_letter: Option<String>,
}

/// Captured state of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    /// Job id
    pub id: String,
    /// Queue holding the job
    pub queue: String,
    /// Opaque payload
    pub payload: serde_json::Value,
    /// Priority class
    pub priority: Priority,
    /// Lifecycle state
    pub status: JobStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last transition time
    pub updated_at: DateTime<Utc>,
    /// Attempts so far
    pub attempts: u32,
    /// Retry budget
    pub max_retries: u32,
    /// Last error, when failed
    pub error: Option<String>,
}

/// Captured state of one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerState {
    /// Worker id
    pub id: String,
    /// Reported status string
    pub status: String,
    /// Job the worker holds, if any
    pub current_job_id: Option<String>,
    /// Last heartbeat
    pub last_seen: DateTime<Utc>,
    /// Jobs completed
    pub processed_count: u64,
    /// Jobs failed
    pub error_count: u64,
}

/// Deterministic capture of queue/job/worker state plus metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot id
    pub id: String,
    /// Operator-assigned name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Format version
    pub version: u32,
    /// Capture time
    pub created_at: DateTime<Utc>,
    /// Organizational tags
    pub tags: Vec<String>,
    /// Queues, sorted by name
    pub queues: Vec<QueueState>,
    /// Jobs, sorted by (queue, id)
    pub jobs: Vec<JobState>,
    /// Workers, sorted by id
    pub workers: Vec<WorkerState>,
    /// Selected numeric metrics
    pub metrics: BTreeMap<String, f64>,
    /// SHA-256 over the canonical state serialization
    pub checksum: String,
    /// Whether the persisted blob is gzipped
    pub compressed: bool,
    /// Uncompressed serialized size
    pub size_bytes: u64,
}

/// The state content a checksum covers: everything capture-identity-free,
/// so two captures of identical external state hash identically.
#[derive(Serialize)]
struct CanonicalContent<'a> {
    version: u32,
    queues: &'a [QueueState],
    jobs: &'a [JobState],
    workers: &'a [WorkerState],
    metrics: &'a BTreeMap<String, f64>,
}

impl Snapshot {
    /// Assemble a snapshot from captured state; sorts collections and
    /// computes the checksum.
    pub fn assemble(
        name: impl Into<String>,
        description: impl Into<String>,
        tags: Vec<String>,
        mut queues: Vec<QueueState>,
        mut jobs: Vec<JobState>,
        mut workers: Vec<WorkerState>,
        metrics: BTreeMap<String, f64>,
    ) -> Self {
        queues.sort_by(|a, b| a.name.cmp(&b.name));
        jobs.sort_by(|a, b| a.queue.cmp(&b.queue).then_with(|| a.id.cmp(&b.id)));
        workers.sort_by(|a, b| a.id.cmp(&b.id));

        let mut snapshot = Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            version: SNAPSHOT_VERSION,
            created_at: Utc::now(),
            tags,
            queues,
            jobs,
            workers,
            metrics,
            checksum: String::new(),
            compressed: false,
            size_bytes: 0,
        };
        snapshot.checksum = snapshot.compute_checksum();
        snapshot.size_bytes = snapshot.canonical_bytes().len() as u64;
        snapshot
    }

    /// Canonical bytes of the state content (collections pre-sorted, fixed
    /// field order, sorted metric keys)
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let content = CanonicalContent {
            version: self.version,
            queues: &self.queues,
            jobs: &self.jobs,
            workers: &self.workers,
            metrics: &self.metrics,
        };
        serde_json::to_vec(&content).unwrap_or_default()
    }

    /// SHA-256 hex digest of the canonical bytes
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether the stored checksum matches the content
    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}
