//! Key/value storage backends
//!
//! The hierarchy never talks to a concrete database. Everything goes through
//! the [`Memory`] trait: a namespaced key/value store with prefix listing and
//! an all-or-nothing batch write. [`InMemoryStorage`] is the shipped backend.
//!
//! Keys are `::`-separated paths. A namespace `ns` owns every key that starts
//! with `ns::`.

use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// A value held by a storage backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryValue {
    /// Plain text
    String(String),
    /// Signed integer
    Integer(i64),
    /// Floating point number
    Float(f64),
    /// Boolean flag
    Boolean(bool),
    /// Structured JSON document
    Json(serde_json::Value),
}

impl MemoryValue {
    /// Borrow as a string slice
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read as an integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Read as a float (integers are widened)
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Read as a boolean
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow as JSON
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(j) => Some(j),
            _ => None,
        }
    }
}

impl From<&str> for MemoryValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MemoryValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MemoryValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for MemoryValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MemoryValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<serde_json::Value> for MemoryValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Key listing filter
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    /// Only keys under this namespace
    pub namespace: Option<String>,

    /// Only keys containing this substring
    pub key_pattern: Option<String>,

    /// Maximum number of keys returned
    pub limit: Option<usize>,
}

impl MemoryQuery {
    /// Create an unrestricted query
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Restrict to keys containing a substring
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.key_pattern = Some(pattern.into());
        self
    }

    /// Cap the number of keys returned
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a key satisfies the namespace and pattern filters
    pub fn matches(&self, key: &str) -> bool {
        let in_namespace = self
            .namespace
            .as_ref()
            .map_or(true, |ns| in_namespace(key, ns));
        let has_pattern = self
            .key_pattern
            .as_ref()
            .map_or(true, |p| key.contains(p.as_str()));
        in_namespace && has_pattern
    }
}

fn in_namespace(key: &str, namespace: &str) -> bool {
    key.strip_prefix(namespace)
        .map_or(false, |rest| rest.starts_with("::"))
}

/// One write inside a batch
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Insert or overwrite a key
    Set(String, MemoryValue),
    /// Remove a key (no-op if absent)
    Delete(String),
}

impl BatchOp {
    fn key(&self) -> &str {
        match self {
            Self::Set(key, _) | Self::Delete(key) => key,
        }
    }
}

/// Storage backend contract
#[async_trait]
pub trait Memory: Send + Sync {
    /// Backend name for logging
    fn backend_name(&self) -> &str;

    /// Read a key
    async fn get(&self, key: &str) -> MemoryResult<Option<MemoryValue>>;

    /// Write a key
    async fn set(&self, key: &str, value: MemoryValue) -> MemoryResult<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> MemoryResult<bool>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> MemoryResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// List keys matching a query, in ascending key order
    async fn keys(&self, query: &MemoryQuery) -> MemoryResult<Vec<String>>;

    /// Count keys, optionally within a namespace
    async fn count(&self, namespace: Option<&str>) -> MemoryResult<usize> {
        let mut query = MemoryQuery::new();
        if let Some(ns) = namespace {
            query = query.with_namespace(ns);
        }
        Ok(self.keys(&query).await?.len())
    }

    /// Remove all keys, optionally only within a namespace
    async fn clear(&self, namespace: Option<&str>) -> MemoryResult<()> {
        let mut query = MemoryQuery::new();
        if let Some(ns) = namespace {
            query = query.with_namespace(ns);
        }
        for key in self.keys(&query).await? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    /// Read several keys
    async fn mget(&self, keys: &[String]) -> MemoryResult<Vec<Option<MemoryValue>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Write several keys
    async fn mset(&self, pairs: &[(String, MemoryValue)]) -> MemoryResult<()> {
        for (key, value) in pairs {
            self.set(key, value.clone()).await?;
        }
        Ok(())
    }

    /// Apply a batch of writes all-or-nothing.
    ///
    /// The default implementation snapshots every touched key, applies the
    /// ops in order, and restores the snapshots if any op fails. Backends
    /// with native transactions should override it.
    async fn apply_batch(&self, ops: Vec<BatchOp>) -> MemoryResult<()> {
        let mut snapshots: Vec<(String, Option<MemoryValue>)> = Vec::with_capacity(ops.len());

        for op in &ops {
            let key = op.key().to_string();
            let previous = match self.get(&key).await {
                Ok(previous) => previous,
                Err(e) => {
                    rollback(self, snapshots).await;
                    return Err(MemoryError::transaction(e.to_string()));
                }
            };
            snapshots.push((key, previous));

            let applied = match op {
                BatchOp::Set(key, value) => self.set(key, value.clone()).await,
                BatchOp::Delete(key) => self.delete(key).await.map(|_| ()),
            };

            if let Err(e) = applied {
                rollback(self, snapshots).await;
                return Err(MemoryError::transaction(e.to_string()));
            }
        }

        Ok(())
    }
}

async fn rollback<M: Memory + ?Sized>(storage: &M, snapshots: Vec<(String, Option<MemoryValue>)>) {
    tracing::warn!(
        backend = storage.backend_name(),
        ops = snapshots.len(),
        "Rolling back partially applied batch"
    );

    for (key, previous) in snapshots.into_iter().rev() {
        let restored = match previous {
            Some(value) => storage.set(&key, value).await,
            None => storage.delete(&key).await.map(|_| ()),
        };
        if let Err(e) = restored {
            tracing::error!(key = %key, error = %e, "Rollback could not restore key");
        }
    }
}

/// In-process storage backend.
///
/// Keys are kept in a `BTreeMap` so listings come back in a stable order.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    data: RwLock<BTreeMap<String, MemoryValue>>,
}

impl InMemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Memory for InMemoryStorage {
    fn backend_name(&self) -> &str {
        "in-memory"
    }

    async fn get(&self, key: &str) -> MemoryResult<Option<MemoryValue>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: MemoryValue) -> MemoryResult<()> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> MemoryResult<bool> {
        Ok(self.data.write().await.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> MemoryResult<bool> {
        Ok(self.data.read().await.contains_key(key))
    }

    async fn keys(&self, query: &MemoryQuery) -> MemoryResult<Vec<String>> {
        let data = self.data.read().await;
        let limit = query.limit.unwrap_or(usize::MAX);

        let keys = match &query.namespace {
            // Range scan from the namespace prefix instead of walking everything
            Some(ns) => {
                let prefix = format!("{}::", ns);
                data.range(prefix.clone()..)
                    .take_while(|(k, _)| k.starts_with(&prefix))
                    .map(|(k, _)| k)
                    .filter(|k| query.matches(k))
                    .take(limit)
                    .cloned()
                    .collect()
            }
            None => data
                .keys()
                .filter(|k| query.matches(k))
                .take(limit)
                .cloned()
                .collect(),
        };

        Ok(keys)
    }

    async fn clear(&self, namespace: Option<&str>) -> MemoryResult<()> {
        let mut data = self.data.write().await;
        match namespace {
            Some(ns) => data.retain(|k, _| !in_namespace(k, ns)),
            None => data.clear(),
        }
        Ok(())
    }

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> MemoryResult<()> {
        // Single write guard: readers see either none or all of the batch
        let mut data = self.data.write().await;
        for op in ops {
            match op {
                BatchOp::Set(key, value) => {
                    data.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend whose writes to keys containing `poison` fail
    pub(crate) struct FlakyStorage {
        inner: InMemoryStorage,
        poison: String,
        failures: AtomicUsize,
    }

    impl FlakyStorage {
        pub(crate) fn new(poison: impl Into<String>) -> Self {
            Self {
                inner: InMemoryStorage::new(),
                poison: poison.into(),
                failures: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failures(&self) -> usize {
            self.failures.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Memory for FlakyStorage {
        fn backend_name(&self) -> &str {
            "flaky"
        }

        async fn get(&self, key: &str) -> MemoryResult<Option<MemoryValue>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: MemoryValue) -> MemoryResult<()> {
            if key.contains(self.poison.as_str()) {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(MemoryError::storage(
                    "set",
                    std::io::Error::new(std::io::ErrorKind::Other, "injected failure"),
                ));
            }
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> MemoryResult<bool> {
            self.inner.delete(key).await
        }

        async fn keys(&self, query: &MemoryQuery) -> MemoryResult<Vec<String>> {
            self.inner.keys(query).await
        }
    }

    #[tokio::test]
    async fn test_in_memory_basic_operations() {
        let storage = InMemoryStorage::new();

        storage.set("a::one", MemoryValue::from(1i64)).await.unwrap();
        storage.set("a::two", MemoryValue::from("two")).await.unwrap();
        storage.set("b::one", MemoryValue::from(true)).await.unwrap();

        assert_eq!(storage.get("a::one").await.unwrap().unwrap().as_integer(), Some(1));
        assert_eq!(storage.count(Some("a")).await.unwrap(), 2);
        assert_eq!(storage.count(None).await.unwrap(), 3);

        assert!(storage.delete("a::one").await.unwrap());
        assert!(!storage.delete("a::one").await.unwrap());

        storage.clear(Some("a")).await.unwrap();
        assert_eq!(storage.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_namespace_does_not_match_sibling_prefix() {
        let storage = InMemoryStorage::new();
        storage.set("ws::record::x", MemoryValue::from(1i64)).await.unwrap();
        storage.set("ws2::record::y", MemoryValue::from(2i64)).await.unwrap();

        let keys = storage
            .keys(&MemoryQuery::new().with_namespace("ws"))
            .await
            .unwrap();
        assert_eq!(keys, vec!["ws::record::x".to_string()]);
    }

    #[tokio::test]
    async fn test_keys_pattern_and_limit() {
        let storage = InMemoryStorage::new();
        for i in 0..5 {
            storage
                .set(&format!("ns::item::{}", i), MemoryValue::from(i as i64))
                .await
                .unwrap();
        }
        storage.set("ns::other::0", MemoryValue::from(0i64)).await.unwrap();

        let query = MemoryQuery::new()
            .with_namespace("ns")
            .with_pattern("::item::")
            .with_limit(3);
        let keys = storage.keys(&query).await.unwrap();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|k| k.contains("::item::")));
    }

    #[tokio::test]
    async fn test_default_batch_rolls_back_on_failure() {
        let storage = FlakyStorage::new("new2");
        storage.set("ns::existing", MemoryValue::from("before")).await.unwrap();

        let ops = vec![
            BatchOp::Set("ns::existing".to_string(), MemoryValue::from("after")),
            BatchOp::Set("ns::new1".to_string(), MemoryValue::from(1i64)),
            BatchOp::Set("ns::new2".to_string(), MemoryValue::from(2i64)),
        ];

        let result = storage.apply_batch(ops).await;
        assert!(matches!(result, Err(MemoryError::Transaction { .. })));
        assert_eq!(storage.failures(), 1);

        let existing = storage.get("ns::existing").await.unwrap().unwrap();
        assert_eq!(existing.as_string(), Some("before"));
        assert!(storage.get("ns::new1").await.unwrap().is_none());
        assert!(storage.get("ns::new2").await.unwrap().is_none());
    }

    #[test]
    fn test_memory_value_accessors() {
        assert_eq!(MemoryValue::from(2i64).as_float(), Some(2.0));
        assert_eq!(MemoryValue::from("x").as_integer(), None);
        assert!(MemoryValue::from(serde_json::json!({"a": 1})).as_json().is_some());
    }
}
