//! TTL cache for throttle decisions

use crate::controller::ThrottleDecision;
use parking_lot::RwLock;
use queueforge_core::Priority;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::trace;

struct CachedDecision {
    decision: ThrottleDecision,
    expires_at: Instant,
}

/// Small wall-clock-expiring memo of decisions keyed by (queue, priority)
///
/// Expired entries are dropped lazily on read and in bulk by the
/// controller's GC task.
pub struct DecisionCache {
    ttl: Duration,
    entries: RwLock<HashMap<(String, Priority), CachedDecision>>,
}

impl DecisionCache {
    /// Create a cache with the given entry TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Unexpired decision for (queue, priority), if any
    pub fn get(&self, queue: &str, priority: Priority) -> Option<ThrottleDecision> {
        let entries = self.entries.read();
        let entry = entries.get(&(queue.to_string(), priority))?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        trace!(queue, priority = %priority, "decision cache hit");
        Some(entry.decision.clone())
    }

    /// Store a decision under its (queue, priority) key
    pub fn insert(&self, decision: ThrottleDecision) {
        let key = (decision.queue.clone(), decision.priority);
        let mut entries = self.entries.write();
        entries.insert(
            key,
            CachedDecision {
                decision,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop expired entries; returns how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Remove everything
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of live entries (expired-but-unswept included)
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn decision(queue: &str, priority: Priority) -> ThrottleDecision {
        ThrottleDecision {
            priority,
            queue: queue.to_string(),
            delay: Some(Duration::from_millis(25)),
            should_shed: false,
            reason: "backlog_yellow".to_string(),
            decided_at: Utc::now(),
            backlog: 750,
        }
    }

    #[test]
    fn test_insert_and_get() {
        let cache = DecisionCache::new(Duration::from_secs(5));
        cache.insert(decision("jobs", Priority::Medium));

        let hit = cache.get("jobs", Priority::Medium).unwrap();
        assert_eq!(hit.reason, "backlog_yellow");
        assert!(cache.get("jobs", Priority::High).is_none());
        assert!(cache.get("other", Priority::Medium).is_none());
    }

    #[test]
    fn test_expiry() {
        let cache = DecisionCache::new(Duration::from_millis(1));
        cache.insert(decision("jobs", Priority::Low));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("jobs", Priority::Low).is_none());
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = DecisionCache::new(Duration::from_secs(5));
        cache.insert(decision("a", Priority::High));
        cache.insert(decision("b", Priority::Low));
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
