//! Redis-like store surface consumed by the snapshot engine
//!
//! Only the small command subset the snapshot engine needs is modelled here.
//! [`MemoryStore`] is a faithful in-memory implementation used by tests and
//! local runs; production wires the real Redis client behind the same trait.

use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Minimal Redis-like command surface
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Enumerate keys matching a pattern; only `prefix*` patterns are supported
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Length of a list key (0 when absent)
    async fn list_len(&self, key: &str) -> Result<u64>;

    /// Inclusive range of list elements; negative indices count from the tail
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Append values to the tail of a list
    async fn right_push(&self, key: &str, values: &[String]) -> Result<()>;

    /// Delete a key of any type
    async fn delete_key(&self, key: &str) -> Result<()>;

    /// All fields of a hash key (empty when absent)
    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>>;

    /// Set fields on a hash key
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Read a string key
    async fn string_get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string key
    async fn string_set(&self, key: &str, value: &str) -> Result<()>;
}

#[derive(Default)]
struct StoreInner {
    lists: BTreeMap<String, Vec<String>>,
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    strings: BTreeMap<String, String>,
}

/// In-memory [`QueueStore`] implementation
///
/// Keys enumerate in lexicographic order so repeated scans over unchanged
/// state observe identical key sequences.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(pattern: &str, key: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        }
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut keys: Vec<String> = inner
            .lists
            .keys()
            .chain(inner.hashes.keys())
            .chain(inner.strings.keys())
            .filter(|k| Self::matches(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        let inner = self.inner.read();
        Ok(inner.lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as i64;
        let resolve = |idx: i64| -> i64 {
            if idx < 0 {
                (len + idx).max(0)
            } else {
                idx
            }
        };
        let start = resolve(start);
        let stop = resolve(stop).min(len - 1);
        if len == 0 || start > stop {
            return Ok(Vec::new());
        }
        Ok(list[start as usize..=(stop as usize)].to_vec())
    }

    async fn right_push(&self, key: &str, values: &[String]) -> Result<()> {
        let mut inner = self.inner.write();
        inner.lists.entry(key.to_string()).or_default().extend_from_slice(values);
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.lists.remove(key);
        inner.hashes.remove(key);
        inner.strings.remove(key);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let inner = self.inner.read();
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut inner = self.inner.write();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn string_get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.read();
        Ok(inner.strings.get(key).cloned())
    }

    async fn string_set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_operations() {
        let store = MemoryStore::new();
        store
            .right_push("queue:test", &["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();

        assert_eq!(store.list_len("queue:test").await.unwrap(), 3);

        let all = store.list_range("queue:test", 0, -1).await.unwrap();
        assert_eq!(all, vec!["a", "b", "c"]);

        let middle = store.list_range("queue:test", 1, 1).await.unwrap();
        assert_eq!(middle, vec!["b"]);
    }

    #[tokio::test]
    async fn test_scan_keys_prefix() {
        let store = MemoryStore::new();
        store.right_push("queue:alpha", &["x".to_string()]).await.unwrap();
        store.right_push("queue:beta", &["y".to_string()]).await.unwrap();
        store.hash_set("worker:1", &[("status".to_string(), "idle".to_string())]).await.unwrap();

        let queues = store.scan_keys("queue:*").await.unwrap();
        assert_eq!(queues, vec!["queue:alpha", "queue:beta"]);

        let workers = store.scan_keys("worker:*").await.unwrap();
        assert_eq!(workers, vec!["worker:1"]);
    }

    #[tokio::test]
    async fn test_hash_and_string_operations() {
        let store = MemoryStore::new();
        store
            .hash_set("worker:9", &[("status".to_string(), "busy".to_string())])
            .await
            .unwrap();
        let hash = store.hash_get_all("worker:9").await.unwrap();
        assert_eq!(hash.get("status").map(String::as_str), Some("busy"));

        store.string_set("metrics:throughput", "12.5").await.unwrap();
        assert_eq!(
            store.string_get("metrics:throughput").await.unwrap(),
            Some("12.5".to_string())
        );

        store.delete_key("worker:9").await.unwrap();
        assert!(store.hash_get_all("worker:9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_list_range() {
        let store = MemoryStore::new();
        let out = store.list_range("missing", 0, -1).await.unwrap();
        assert!(out.is_empty());
    }
}
