//! Bounded per-(metric, queue) time-series storage

use crate::{MetricKind, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// One observation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DataPoint {
    /// Observation time
    pub ts: DateTime<Utc>,
    /// Observed value
    pub value: f64,
}

impl DataPoint {
    /// Observation at the current instant
    pub fn now(value: f64) -> Self {
        Self {
            ts: Utc::now(),
            value,
        }
    }
}

/// Aggregation bucket widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// 1-minute buckets
    OneMinute,
    /// 5-minute buckets
    FiveMinutes,
    /// 1-hour buckets
    OneHour,
    /// 1-day buckets
    OneDay,
}

impl Aggregation {
    fn bucket_seconds(&self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::OneHour => 3_600,
            Self::OneDay => 86_400,
        }
    }
}

/// Storage limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Most points kept per series
    pub max_points: usize,
    /// Oldest point kept, by wall-clock age
    pub retention: Duration,
    /// Directory for JSON-per-series persistence, when enabled
    pub persist_dir: Option<std::path::PathBuf>,
    /// How often the background task flushes series to disk
    pub flush_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_points: 10_080, // one week of minutes
            retention: Duration::from_secs(7 * 24 * 3_600),
            persist_dir: None,
            flush_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSeries {
    metric: MetricKind,
    queue: String,
    points: Vec<DataPoint>,
}

struct Series {
    points: VecDeque<DataPoint>,
}

/// Bounded ring store of observations keyed by (metric, queue)
pub struct MetricStore {
    config: StorageConfig,
    series: RwLock<HashMap<(MetricKind, String), Series>>,
}

impl MetricStore {
    /// Create an empty store
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Append an observation
    pub fn record(&self, metric: MetricKind, queue: &str, point: DataPoint) {
        let mut series = self.series.write();
        let entry = series
            .entry((metric, queue.to_string()))
            .or_insert_with(|| Series {
                points: VecDeque::with_capacity(64),
            });
        if entry.points.len() >= self.config.max_points {
            entry.points.pop_front();
        }
        entry.points.push_back(point);
    }

    /// All points for a series, oldest first
    pub fn points(&self, metric: MetricKind, queue: &str) -> Vec<DataPoint> {
        self.series
            .read()
            .get(&(metric, queue.to_string()))
            .map(|s| s.points.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Queues with data for a metric
    pub fn queues(&self, metric: MetricKind) -> Vec<String> {
        self.series
            .read()
            .keys()
            .filter(|(m, _)| *m == metric)
            .map(|(_, q)| q.clone())
            .collect()
    }

    /// Arithmetic-mean aggregation into fixed buckets, oldest first
    pub fn aggregate(
        &self,
        metric: MetricKind,
        queue: &str,
        bucket: Aggregation,
    ) -> Vec<DataPoint> {
        let points = self.points(metric, queue);
        if points.is_empty() {
            return Vec::new();
        }

        let width = bucket.bucket_seconds();
        let mut buckets: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
        for point in points {
            let slot = point.ts.timestamp().div_euclid(width);
            let entry = buckets.entry(slot).or_insert((0.0, 0));
            entry.0 += point.value;
            entry.1 += 1;
        }

        buckets
            .into_iter()
            .map(|(slot, (sum, count))| DataPoint {
                ts: DateTime::from_timestamp(slot * width, 0).unwrap_or_else(Utc::now),
                value: sum / count as f64,
            })
            .collect()
    }

    /// Drop points older than the retention window; returns removed count
    pub fn prune(&self) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.config.retention).unwrap_or(ChronoDuration::zero());
        let mut removed = 0;
        let mut series = self.series.write();
        for entry in series.values_mut() {
            while entry.points.front().is_some_and(|p| p.ts < cutoff) {
                entry.points.pop_front();
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "pruned aged metric points");
        }
        removed
    }

    /// Write every series to its own JSON file under the persist directory
    pub async fn flush(&self) -> Result<usize> {
        let Some(dir) = &self.config.persist_dir else {
            return Ok(0);
        };
        tokio::fs::create_dir_all(dir).await?;

        let serialized: Vec<(String, Vec<u8>)> = {
            let series = self.series.read();
            series
                .iter()
                .map(|((metric, queue), s)| {
                    let persisted = PersistedSeries {
                        metric: *metric,
                        queue: queue.clone(),
                        points: s.points.iter().copied().collect(),
                    };
                    let name = format!("{}_{}.json", metric.as_str(), queue);
                    (name, serde_json::to_vec(&persisted).unwrap_or_default())
                })
                .collect()
        };

        let count = serialized.len();
        for (name, bytes) in serialized {
            tokio::fs::write(dir.join(name), bytes).await?;
        }
        Ok(count)
    }

    /// Load every persisted series from a directory
    pub async fn load_from(&self, dir: &Path) -> Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }
        let mut loaded = 0;
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<PersistedSeries>(&bytes) {
                Ok(persisted) => {
                    let mut series = self.series.write();
                    series.insert(
                        (persisted.metric, persisted.queue),
                        Series {
                            points: persisted.points.into_iter().collect(),
                        },
                    );
                    loaded += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping bad series file"),
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn point_at(secs: i64, value: f64) -> DataPoint {
        DataPoint {
            ts: DateTime::from_timestamp(secs, 0).unwrap(),
            value,
        }
    }

    #[test]
    fn test_record_and_read() {
        let store = MetricStore::new(StorageConfig::default());
        store.record(MetricKind::Backlog, "jobs", DataPoint::now(5.0));
        store.record(MetricKind::Backlog, "jobs", DataPoint::now(7.0));

        let points = store.points(MetricKind::Backlog, "jobs");
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].value, 7.0);
        assert!(store.points(MetricKind::Backlog, "other").is_empty());
    }

    #[test]
    fn test_max_points_ring() {
        let mut config = StorageConfig::default();
        config.max_points = 3;
        let store = MetricStore::new(config);
        for i in 0..5 {
            store.record(MetricKind::Throughput, "jobs", DataPoint::now(i as f64));
        }
        let points = store.points(MetricKind::Throughput, "jobs");
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].value, 2.0);
    }

    #[test]
    fn test_aggregate_means() {
        let store = MetricStore::new(StorageConfig::default());
        // Two points in the first minute, one in the next
        store.record(MetricKind::Backlog, "jobs", point_at(0, 10.0));
        store.record(MetricKind::Backlog, "jobs", point_at(30, 20.0));
        store.record(MetricKind::Backlog, "jobs", point_at(90, 40.0));

        let buckets = store.aggregate(MetricKind::Backlog, "jobs", Aggregation::OneMinute);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].value, 15.0);
        assert_eq!(buckets[1].value, 40.0);

        let hourly = store.aggregate(MetricKind::Backlog, "jobs", Aggregation::OneHour);
        assert_eq!(hourly.len(), 1);
        assert!((hourly[0].value - 70.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_prune_by_age() {
        let mut config = StorageConfig::default();
        config.retention = Duration::from_secs(60);
        let store = MetricStore::new(config);

        let old = DataPoint {
            ts: Utc::now() - ChronoDuration::seconds(3_600),
            value: 1.0,
        };
        store.record(MetricKind::Workers, "jobs", old);
        store.record(MetricKind::Workers, "jobs", DataPoint::now(2.0));

        assert_eq!(store.prune(), 1);
        let points = store.points(MetricKind::Workers, "jobs");
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 2.0);
    }

    #[tokio::test]
    async fn test_flush_and_load() {
        let dir = TempDir::new().unwrap();
        let mut config = StorageConfig::default();
        config.persist_dir = Some(dir.path().to_path_buf());
        let store = MetricStore::new(config.clone());

        store.record(MetricKind::ErrorRate, "jobs", DataPoint::now(0.05));
        store.record(MetricKind::Backlog, "jobs", DataPoint::now(100.0));
        assert_eq!(store.flush().await.unwrap(), 2);

        let fresh = MetricStore::new(config);
        assert_eq!(fresh.load_from(dir.path()).await.unwrap(), 2);
        assert_eq!(fresh.points(MetricKind::ErrorRate, "jobs").len(), 1);
    }
}
