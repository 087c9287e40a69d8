//! Snapshot comparison
//!
//! Produces a structured change list between two snapshots: queue-level,
//! job-bucket, worker, and metric changes, plus semantic changes synthesized
//! from the raw ones.

use crate::model::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Kind of change detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Present on the right only
    Added,
    /// Present on the left only
    Removed,
    /// Present on both with different values
    Modified,
    /// Same job id found in a different queue
    Moved,
}

/// How much a change matters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    /// Routine drift
    Low,
    /// Worth a look
    Medium,
    /// Likely regression
    High,
}

/// One raw change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    /// Kind of change
    pub change_type: ChangeType,
    /// Slash-separated path identifying what changed
    pub path: String,
    /// Left-side value
    pub old_value: Option<String>,
    /// Right-side value
    pub new_value: Option<String>,
    /// Human-readable summary
    pub description: String,
    /// Severity heuristic
    pub impact: Impact,
}

/// A higher-level pattern synthesized from raw changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticChange {
    /// Pattern kind (`queue_overload`, `queue_drain`, ...)
    pub kind: String,
    /// Human-readable summary
    pub description: String,
    /// Severity
    pub impact: Impact,
}

/// Comparison options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffOptions {
    /// Treat timestamp-valued fields as equal
    pub ignore_timestamps: bool,
    /// Compare workers by aggregate count instead of per id
    pub ignore_worker_ids: bool,
    /// Skip cross-queue job movement detection
    pub ignore_job_ids: bool,
    /// Substring patterns; matching keys/values are skipped
    pub custom_ignores: Vec<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            ignore_timestamps: true,
            ignore_worker_ids: false,
            ignore_job_ids: false,
            custom_ignores: Vec::new(),
        }
    }
}

/// Change counts by type
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiffTotals {
    /// Entities present on the right only
    pub added: usize,
    /// Entities present on the left only
    pub removed: usize,
    /// Entities changed in place (moves included)
    pub modified: usize,
}

/// Full comparison result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffResult {
    /// Left snapshot id
    pub left_id: String,
    /// Right snapshot id
    pub right_id: String,
    /// Change counts
    pub totals: DiffTotals,
    /// Queue-level changes
    pub queue_changes: Vec<Change>,
    /// Job status-bucket changes and moves
    pub job_changes: Vec<Change>,
    /// Worker changes
    pub worker_changes: Vec<Change>,
    /// Metric changes
    pub metric_changes: Vec<Change>,
    /// Synthesized patterns
    pub semantic_changes: Vec<SemanticChange>,
}

impl DiffResult {
    /// Total raw changes (semantic changes excluded)
    pub fn total_changes(&self) -> usize {
        self.queue_changes.len()
            + self.job_changes.len()
            + self.worker_changes.len()
            + self.metric_changes.len()
    }
}

/// Snapshot comparator
pub struct Differ {
    options: DiffOptions,
}

impl Differ {
    /// Create a comparator with the given options
    pub fn new(options: DiffOptions) -> Self {
        Self { options }
    }

    /// Compare two snapshots
    pub fn diff(&self, left: &Snapshot, right: &Snapshot) -> DiffResult {
        let queue_changes = self.diff_queues(left, right);
        let job_changes = self.diff_jobs(left, right);
        let worker_changes = self.diff_workers(left, right);
        let metric_changes = self.diff_metrics(left, right);
        let semantic_changes =
            self.synthesize(left, right, &worker_changes, &metric_changes);

        let mut totals = DiffTotals::default();
        for change in queue_changes
            .iter()
            .chain(&job_changes)
            .chain(&worker_changes)
            .chain(&metric_changes)
        {
            match change.change_type {
                ChangeType::Added => totals.added += 1,
                ChangeType::Removed => totals.removed += 1,
                ChangeType::Modified | ChangeType::Moved => totals.modified += 1,
            }
        }

        DiffResult {
            left_id: left.id.clone(),
            right_id: right.id.clone(),
            totals,
            queue_changes,
            job_changes,
            worker_changes,
            metric_changes,
            semantic_changes,
        }
    }

    fn ignored(&self, text: &str) -> bool {
        self.options.custom_ignores.iter().any(|pattern| text.contains(pattern))
    }

    fn length_impact(delta: i64) -> Impact {
        let magnitude = delta.unsigned_abs();
        if magnitude <= 10 {
            Impact::Low
        } else if magnitude <= 100 {
            Impact::Medium
        } else {
            Impact::High
        }
    }

    fn diff_queues(&self, left: &Snapshot, right: &Snapshot) -> Vec<Change> {
        let mut changes = Vec::new();
        let left_map: BTreeMap<&str, &crate::model::QueueState> =
            left.queues.iter().map(|q| (q.name.as_str(), q)).collect();
        let right_map: BTreeMap<&str, &crate::model::QueueState> =
            right.queues.iter().map(|q| (q.name.as_str(), q)).collect();

        for (name, queue) in &right_map {
            if !left_map.contains_key(name) {
                changes.push(Change {
                    change_type: ChangeType::Added,
                    path: format!("queues/{}", name),
                    old_value: None,
                    new_value: Some(queue.length.to_string()),
                    description: format!("queue {} added with {} entries", name, queue.length),
                    impact: Impact::Medium,
                });
            }
        }
        for (name, queue) in &left_map {
            if !right_map.contains_key(name) {
                changes.push(Change {
                    change_type: ChangeType::Removed,
                    path: format!("queues/{}", name),
                    old_value: Some(queue.length.to_string()),
                    new_value: None,
                    description: format!("queue {} removed", name),
                    impact: Impact::Medium,
                });
            }
        }

        for (name, left_queue) in &left_map {
            let Some(right_queue) = right_map.get(name) else {
                continue;
            };

            if left_queue.length != right_queue.length {
                let delta = right_queue.length as i64 - left_queue.length as i64;
                changes.push(Change {
                    change_type: ChangeType::Modified,
                    path: format!("queues/{}/length", name),
                    old_value: Some(left_queue.length.to_string()),
                    new_value: Some(right_queue.length.to_string()),
                    description: format!("queue {} length changed by {:+}", name, delta),
                    impact: Self::length_impact(delta),
                });
            }

            let keys: BTreeSet<&String> =
                left_queue.config.keys().chain(right_queue.config.keys()).collect();
            for key in keys {
                if self.ignored(key) {
                    continue;
                }
                let old = left_queue.config.get(key);
                let new = right_queue.config.get(key);
                if old == new {
                    continue;
                }
                if let (Some(old), Some(new)) = (old, new) {
                    if self.ignored(old) || self.ignored(new) {
                        continue;
                    }
                }
                let change_type = match (old, new) {
                    (None, Some(_)) => ChangeType::Added,
                    (Some(_), None) => ChangeType::Removed,
                    _ => ChangeType::Modified,
                };
                changes.push(Change {
                    change_type,
                    path: format!("queues/{}/config/{}", name, key),
                    old_value: old.cloned(),
                    new_value: new.cloned(),
                    description: format!("queue {} config key {} changed", name, key),
                    impact: Impact::Medium,
                });
            }
        }

        changes
    }

    fn diff_jobs(&self, left: &Snapshot, right: &Snapshot) -> Vec<Change> {
        let mut changes = Vec::new();

        // Status-bucket counts per queue
        let bucket = |snapshot: &Snapshot| -> BTreeMap<(String, &'static str), i64> {
            let mut counts = BTreeMap::new();
            for job in &snapshot.jobs {
                *counts.entry((job.queue.clone(), job.status.as_str())).or_insert(0) += 1;
            }
            counts
        };
        let left_counts = bucket(left);
        let right_counts = bucket(right);

        let keys: BTreeSet<&(String, &'static str)> =
            left_counts.keys().chain(right_counts.keys()).collect();
        for key in keys {
            let old = left_counts.get(key).copied();
            let new = right_counts.get(key).copied();
            if old == new {
                continue;
            }
            let (queue, status) = key;
            let change_type = match (old, new) {
                (None, Some(_)) => ChangeType::Added,
                (Some(_), None) => ChangeType::Removed,
                _ => ChangeType::Modified,
            };
            let delta = new.unwrap_or(0) - old.unwrap_or(0);
            changes.push(Change {
                change_type,
                path: format!("jobs/{}/{}", queue, status),
                old_value: old.map(|v| v.to_string()),
                new_value: new.map(|v| v.to_string()),
                description: format!("{} jobs in {} changed by {:+}", status, queue, delta),
                impact: Self::length_impact(delta),
            });
        }

        // Cross-queue movement for identical ids
        if !self.options.ignore_job_ids {
            let left_queues: BTreeMap<&str, &str> =
                left.jobs.iter().map(|j| (j.id.as_str(), j.queue.as_str())).collect();
            for job in &right.jobs {
                if let Some(old_queue) = left_queues.get(job.id.as_str()) {
                    if *old_queue != job.queue {
                        changes.push(Change {
                            change_type: ChangeType::Moved,
                            path: format!("jobs/{}", job.id),
                            old_value: Some((*old_queue).to_string()),
                            new_value: Some(job.queue.clone()),
                            description: format!(
                                "job {} moved from {} to {}",
                                job.id, old_queue, job.queue
                            ),
                            impact: Impact::Medium,
                        });
                    }
                }
            }
        }

        changes
    }

    fn diff_workers(&self, left: &Snapshot, right: &Snapshot) -> Vec<Change> {
        let mut changes = Vec::new();

        if self.options.ignore_worker_ids {
            let (old, new) = (left.workers.len(), right.workers.len());
            if old != new {
                changes.push(Change {
                    change_type: ChangeType::Modified,
                    path: "workers/active_count".to_string(),
                    old_value: Some(old.to_string()),
                    new_value: Some(new.to_string()),
                    description: format!("active worker count changed from {} to {}", old, new),
                    impact: Impact::Medium,
                });
            }
            return changes;
        }

        let left_map: BTreeMap<&str, &crate::model::WorkerState> =
            left.workers.iter().map(|w| (w.id.as_str(), w)).collect();
        let right_map: BTreeMap<&str, &crate::model::WorkerState> =
            right.workers.iter().map(|w| (w.id.as_str(), w)).collect();

        for (id, worker) in &right_map {
            if !left_map.contains_key(id) {
                changes.push(Change {
                    change_type: ChangeType::Added,
                    path: format!("workers/{}", id),
                    old_value: None,
                    new_value: Some(worker.status.clone()),
                    description: format!("worker {} added", id),
                    impact: Impact::Medium,
                });
            }
        }
        for (id, worker) in &left_map {
            if !right_map.contains_key(id) {
                changes.push(Change {
                    change_type: ChangeType::Removed,
                    path: format!("workers/{}", id),
                    old_value: Some(worker.status.clone()),
                    new_value: None,
                    description: format!("worker {} removed", id),
                    impact: Impact::Medium,
                });
            }
        }
        for (id, left_worker) in &left_map {
            let Some(right_worker) = right_map.get(id) else {
                continue;
            };
            if left_worker.status != right_worker.status {
                changes.push(Change {
                    change_type: ChangeType::Modified,
                    path: format!("workers/{}/status", id),
                    old_value: Some(left_worker.status.clone()),
                    new_value: Some(right_worker.status.clone()),
                    description: format!(
                        "worker {} status changed from {} to {}",
                        id, left_worker.status, right_worker.status
                    ),
                    impact: Impact::Low,
                });
            }
            if !self.options.ignore_timestamps && left_worker.last_seen != right_worker.last_seen
            {
                changes.push(Change {
                    change_type: ChangeType::Modified,
                    path: format!("workers/{}/last_seen", id),
                    old_value: Some(left_worker.last_seen.to_rfc3339()),
                    new_value: Some(right_worker.last_seen.to_rfc3339()),
                    description: format!("worker {} heartbeat changed", id),
                    impact: Impact::Low,
                });
            }
        }

        changes
    }

    fn diff_metrics(&self, left: &Snapshot, right: &Snapshot) -> Vec<Change> {
        let mut changes = Vec::new();
        let keys: BTreeSet<&String> = left.metrics.keys().chain(right.metrics.keys()).collect();

        for key in keys {
            if self.ignored(key) {
                continue;
            }
            let old = left.metrics.get(key).copied();
            let new = right.metrics.get(key).copied();
            if old == new {
                continue;
            }
            let change_type = match (old, new) {
                (None, Some(_)) => ChangeType::Added,
                (Some(_), None) => ChangeType::Removed,
                _ => ChangeType::Modified,
            };
            changes.push(Change {
                change_type,
                path: format!("metrics/{}", key),
                old_value: old.map(|v| v.to_string()),
                new_value: new.map(|v| v.to_string()),
                description: format!("metric {} changed", key),
                impact: Self::metric_impact(key),
            });
        }

        changes
    }

    fn metric_impact(key: &str) -> Impact {
        let key = key.to_ascii_lowercase();
        if key.contains("error") || key.contains("failed") {
            Impact::High
        } else if key.contains("latency") || key.contains("throughput") || key.contains("processed")
        {
            Impact::Medium
        } else {
            Impact::Low
        }
    }

    fn synthesize(
        &self,
        left: &Snapshot,
        right: &Snapshot,
        worker_changes: &[Change],
        metric_changes: &[Change],
    ) -> Vec<SemanticChange> {
        let mut semantic = Vec::new();

        let left_total: i64 = left.queues.iter().map(|q| q.length as i64).sum();
        let right_total: i64 = right.queues.iter().map(|q| q.length as i64).sum();
        let growth = right_total - left_total;
        if growth > 100 {
            semantic.push(SemanticChange {
                kind: "queue_overload".to_string(),
                description: format!("total backlog grew by {} entries", growth),
                impact: Impact::High,
            });
        } else if growth < -100 {
            semantic.push(SemanticChange {
                kind: "queue_drain".to_string(),
                description: format!("total backlog shrank by {} entries", -growth),
                impact: Impact::Medium,
            });
        }

        if worker_changes
            .iter()
            .any(|c| matches!(c.change_type, ChangeType::Added | ChangeType::Removed))
        {
            semantic.push(SemanticChange {
                kind: "worker_scaling".to_string(),
                description: "worker set changed between snapshots".to_string(),
                impact: Impact::Medium,
            });
        }

        if metric_changes.iter().any(|c| {
            let path = c.path.to_ascii_lowercase();
            path.contains("error") || path.contains("failed")
        }) {
            semantic.push(SemanticChange {
                kind: "error_rate_change".to_string(),
                description: "error-related metrics changed between snapshots".to_string(),
                impact: Impact::High,
            });
        }

        semantic
    }
}
