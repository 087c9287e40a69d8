//! Queue statistics provider trait and the in-memory test double

use crate::types::QueueStats;
use crate::{CoreError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Source of live queue load data
///
/// Production deployments back this with the Redis stats reader; tests and
/// local wiring use [`StaticStatsProvider`].
#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Stats for a single queue
    async fn queue_stats(&self, queue: &str) -> Result<QueueStats>;

    /// Stats for every known queue
    async fn all_queue_stats(&self) -> Result<HashMap<String, QueueStats>>;
}

/// In-memory stats provider with settable counts
#[derive(Clone, Default)]
pub struct StaticStatsProvider {
    inner: Arc<RwLock<StaticInner>>,
}

#[derive(Default)]
struct StaticInner {
    stats: HashMap<String, QueueStats>,
    failing: bool,
}

impl StaticStatsProvider {
    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backlog and processing counts for a queue
    pub fn set_counts(&self, queue: &str, backlog: u64, processing: u64) {
        let mut inner = self.inner.write();
        inner.stats.insert(queue.to_string(), QueueStats::new(queue, backlog, processing));
    }

    /// Simulate a provider outage; all calls fail until cleared
    pub fn set_failing(&self, failing: bool) {
        self.inner.write().failing = failing;
    }
}

#[async_trait]
impl StatsProvider for StaticStatsProvider {
    async fn queue_stats(&self, queue: &str) -> Result<QueueStats> {
        let inner = self.inner.read();
        if inner.failing {
            return Err(CoreError::ProviderUnavailable("static provider failing".to_string()));
        }
        inner
            .stats
            .get(queue)
            .cloned()
            .ok_or_else(|| CoreError::ProviderUnavailable(format!("no stats for queue {}", queue)))
    }

    async fn all_queue_stats(&self) -> Result<HashMap<String, QueueStats>> {
        let inner = self.inner.read();
        if inner.failing {
            return Err(CoreError::ProviderUnavailable("static provider failing".to_string()));
        }
        Ok(inner.stats.clone())
    }
}
