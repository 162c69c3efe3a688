//! Memory store - persistence for the four record levels
//!
//! The store layers the hierarchy on top of any [`Memory`] backend. Every key
//! lives under `workspace::{workspace_id}`:
//!
//! - `::record::{level}::{id}` holds a [`StoredMemory`] envelope (record + access counters)
//! - `::link::{level}::{parent}::{position}` holds one join row per child id
//! - `::embedding::{id}` holds a cached embedding vector
//!
//! Join rows always mirror the owning record's id list. Saving a record
//! deletes and re-inserts its rows rather than diffing them.

use crate::error::{MemoryError, MemoryResult};
use crate::storage::{BatchOp, Memory, MemoryQuery, MemoryValue};
use crate::types::{MemoryLevel, MemoryRecord, SemanticMemory, StoredMemory, ThemeMemory};
use chrono::Utc;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Filters for substring search
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub level: Option<MemoryLevel>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            level: None,
            limit: 10,
            offset: 0,
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: MemoryLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Aggregate counters over the whole workspace
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub per_level: BTreeMap<MemoryLevel, usize>,
    pub avg_access_count: f64,
    pub avg_retention_score: f64,
}

/// Hierarchical memory store for one workspace
pub struct MemoryStore {
    /// Storage backend
    storage: Arc<dyn Memory>,

    /// Namespace for this workspace (workspace::{id})
    namespace: String,
}

impl MemoryStore {
    /// Create a store scoped to a workspace
    pub fn new(storage: Arc<dyn Memory>, workspace_id: impl AsRef<str>) -> Self {
        let namespace = format!("workspace::{}", workspace_id.as_ref());
        Self { storage, namespace }
    }

    /// Namespace all keys of this store live under
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Start a batch of writes applied all-or-nothing on commit
    pub fn begin(&self) -> StoreTransaction<'_> {
        StoreTransaction {
            store: self,
            ops: Vec::new(),
            staged: 0,
        }
    }

    /// Save a single record (its own one-record transaction)
    pub async fn save(&self, record: &MemoryRecord) -> MemoryResult<()> {
        let mut tx = self.begin();
        tx.save(record).await?;
        tx.commit().await
    }

    /// Fetch a record, bumping its access counter and last-accessed time
    pub async fn get(&self, id: &str, level: MemoryLevel) -> MemoryResult<Option<MemoryRecord>> {
        let key = self.record_key(level, id);
        let Some(mut stored) = self.read_envelope(&key).await? else {
            return Ok(None);
        };

        stored.access.access_count += 1;
        stored.access.last_accessed = Some(Utc::now());
        self.storage.set(&key, encode(&stored, "touch_record")?).await?;

        tracing::debug!(id = %id, level = %level, count = stored.access.access_count, "Record accessed");
        Ok(Some(stored.record))
    }

    /// Fetch a record with its counters, without touching them
    pub async fn peek(&self, id: &str, level: MemoryLevel) -> MemoryResult<Option<StoredMemory>> {
        self.read_envelope(&self.record_key(level, id)).await
    }

    /// Find which level holds `id`, if any
    pub async fn locate(&self, id: &str) -> MemoryResult<Option<MemoryLevel>> {
        for level in MemoryLevel::ALL {
            if self.storage.exists(&self.record_key(level, id)).await? {
                return Ok(Some(level));
            }
        }
        Ok(None)
    }

    /// Every stored record (optionally of one level), oldest first
    pub async fn list(&self, level: Option<MemoryLevel>) -> MemoryResult<Vec<StoredMemory>> {
        let namespace = match level {
            Some(level) => format!("{}::record::{}", self.namespace, level),
            None => format!("{}::record", self.namespace),
        };
        let keys = self
            .storage
            .keys(&MemoryQuery::new().with_namespace(namespace))
            .await?;

        let mut records = Vec::with_capacity(keys.len());
        for value in self.storage.mget(&keys).await?.into_iter().flatten() {
            records.push(decode(&value)?);
        }
        records.sort_by_key(|s| s.record.created_at());
        Ok(records)
    }

    /// Substring search over each record's primary text.
    ///
    /// Ordered by retention score, then access count, then creation time
    /// (all descending), so reinforced memories outrank merely recent ones.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> MemoryResult<Vec<MemoryRecord>> {
        let needle = query.trim().to_lowercase();
        let mut matches: Vec<StoredMemory> = self
            .list(options.level)
            .await?
            .into_iter()
            .filter(|s| s.record.primary_text().to_lowercase().contains(&needle))
            .collect();

        matches.sort_by(rank_order);

        Ok(matches
            .into_iter()
            .skip(options.offset)
            .take(options.limit)
            .map(|s| s.record)
            .collect())
    }

    /// Records whose primary text contains any of `keywords`, most hits first
    pub async fn search_by_keywords(
        &self,
        keywords: &[String],
        level: Option<MemoryLevel>,
        limit: usize,
    ) -> MemoryResult<Vec<MemoryRecord>> {
        let needles: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if needles.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, StoredMemory)> = self
            .list(level)
            .await?
            .into_iter()
            .filter_map(|s| {
                let text = s.record.primary_text().to_lowercase();
                let hits = needles.iter().filter(|k| text.contains(k.as_str())).count();
                (hits > 0).then_some((hits, s))
            })
            .collect();

        scored.sort_by(|(ha, a), (hb, b)| hb.cmp(ha).then_with(|| rank_order(a, b)));

        Ok(scored.into_iter().take(limit).map(|(_, s)| s.record).collect())
    }

    /// Delete a record with its join rows and embedding.
    ///
    /// Returns `false` if nothing was stored under `id`; deleting twice is safe.
    pub async fn delete(&self, id: &str) -> MemoryResult<bool> {
        let Some(level) = self.locate(id).await? else {
            return Ok(false);
        };

        let mut tx = self.begin();
        tx.delete(id, level).await?;
        tx.commit().await?;

        tracing::debug!(id = %id, level = %level, "Record deleted");
        Ok(true)
    }

    /// Number of records, optionally of one level
    pub async fn count(&self, level: Option<MemoryLevel>) -> MemoryResult<usize> {
        match level {
            Some(level) => {
                let namespace = format!("{}::record::{}", self.namespace, level);
                self.storage.count(Some(&namespace)).await
            }
            None => {
                let namespace = format!("{}::record", self.namespace);
                self.storage.count(Some(&namespace)).await
            }
        }
    }

    /// Workspace-wide counters
    pub async fn stats(&self) -> MemoryResult<StoreStats> {
        let all = self.list(None).await?;
        let mut per_level: BTreeMap<MemoryLevel, usize> =
            MemoryLevel::ALL.iter().map(|l| (*l, 0)).collect();

        let mut access_sum = 0u64;
        let mut retention_sum = 0.0;
        for stored in &all {
            *per_level.entry(stored.record.level()).or_insert(0) += 1;
            access_sum += stored.access.access_count;
            retention_sum += stored.access.retention_score;
        }

        let total = all.len();
        let (avg_access_count, avg_retention_score) = if total > 0 {
            (access_sum as f64 / total as f64, retention_sum / total as f64)
        } else {
            (0.0, 0.0)
        };

        Ok(StoreStats {
            total,
            per_level,
            avg_access_count,
            avg_retention_score,
        })
    }

    /// Persist an embedding vector for a record
    pub async fn update_embedding(&self, id: &str, vector: &[f32]) -> MemoryResult<()> {
        let json = serde_json::to_value(vector)
            .map_err(|e| MemoryError::serialization("encode_embedding", e))?;
        self.storage
            .set(&self.embedding_key(id), MemoryValue::Json(json))
            .await
    }

    /// Load a persisted embedding vector
    pub async fn get_embedding(&self, id: &str) -> MemoryResult<Option<Vec<f32>>> {
        let Some(value) = self.storage.get(&self.embedding_key(id)).await? else {
            return Ok(None);
        };
        let Some(json) = value.as_json() else {
            return Ok(None);
        };
        let vector = serde_json::from_value(json.clone())
            .map_err(|e| MemoryError::serialization("decode_embedding", e))?;
        Ok(Some(vector))
    }

    /// Child ids recorded in the join rows of `parent_id`, in order
    pub async fn children(&self, parent_id: &str, level: MemoryLevel) -> MemoryResult<Vec<String>> {
        let keys = self
            .storage
            .keys(&MemoryQuery::new().with_namespace(self.link_namespace(level, parent_id)))
            .await?;
        let values = self.storage.mget(&keys).await?;
        Ok(values
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_string().map(String::from))
            .collect())
    }

    /// Update a semantic's content and/or confidence in place
    pub async fn update_semantic(
        &self,
        id: &str,
        content: Option<String>,
        confidence: Option<f64>,
    ) -> MemoryResult<Option<SemanticMemory>> {
        let Some(stored) = self.peek(id, MemoryLevel::Semantic).await? else {
            return Ok(None);
        };
        let Some(mut semantic) = stored.record.into_semantic() else {
            return Ok(None);
        };

        if let Some(content) = content {
            semantic.content = content;
        }
        if let Some(confidence) = confidence {
            semantic.confidence = confidence.clamp(0.0, 1.0);
        }

        self.save(&MemoryRecord::Semantic(semantic.clone())).await?;
        Ok(Some(semantic))
    }

    /// Replace a theme's member list (append or merge)
    pub async fn update_theme(&self, theme: &ThemeMemory) -> MemoryResult<()> {
        self.save(&MemoryRecord::Theme(theme.clone())).await
    }

    /// Overwrite a record's retention score. Returns `false` if absent.
    pub async fn set_retention(
        &self,
        id: &str,
        level: MemoryLevel,
        score: f64,
    ) -> MemoryResult<bool> {
        let key = self.record_key(level, id);
        let Some(mut stored) = self.read_envelope(&key).await? else {
            return Ok(false);
        };
        stored.access.retention_score = score.clamp(0.0, 1.0);
        self.storage.set(&key, encode(&stored, "set_retention")?).await?;
        Ok(true)
    }

    fn record_key(&self, level: MemoryLevel, id: &str) -> String {
        format!("{}::record::{}::{}", self.namespace, level, id)
    }

    fn link_namespace(&self, level: MemoryLevel, parent_id: &str) -> String {
        format!("{}::link::{}::{}", self.namespace, level, parent_id)
    }

    fn embedding_key(&self, id: &str) -> String {
        format!("{}::embedding::{}", self.namespace, id)
    }

    async fn read_envelope(&self, key: &str) -> MemoryResult<Option<StoredMemory>> {
        match self.storage.get(key).await? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    async fn link_keys(&self, level: MemoryLevel, parent_id: &str) -> MemoryResult<Vec<String>> {
        self.storage
            .keys(&MemoryQuery::new().with_namespace(self.link_namespace(level, parent_id)))
            .await
    }
}

/// A scoped batch of writes.
///
/// Nothing reaches the backend until [`commit`](Self::commit); dropping the
/// transaction discards everything staged.
pub struct StoreTransaction<'a> {
    store: &'a MemoryStore,
    ops: Vec<BatchOp>,
    staged: usize,
}

impl<'a> StoreTransaction<'a> {
    /// Stage a record write. Existing access counters are preserved and the
    /// record's join rows are replaced, including rows staged earlier in this
    /// transaction.
    pub async fn save(&mut self, record: &MemoryRecord) -> MemoryResult<()> {
        let store = self.store;
        let level = record.level();
        let id = record.id();
        let key = store.record_key(level, id);

        let existing = match self.staged_value(&key) {
            Some(value) => Some(decode(value)?),
            None => store.read_envelope(&key).await?,
        };
        let envelope = StoredMemory {
            record: record.clone(),
            access: existing.map(|e| e.access).unwrap_or_default(),
        };
        self.ops.push(BatchOp::Set(key, encode(&envelope, "save_record")?));

        let link_ns = store.link_namespace(level, id);
        let mut stale = store.link_keys(level, id).await?;
        stale.extend(self.staged_keys_under(&link_ns));
        stale.sort();
        stale.dedup();
        for old in stale {
            self.ops.push(BatchOp::Delete(old));
        }
        for (position, child) in record.child_ids().iter().enumerate() {
            self.ops.push(BatchOp::Set(
                format!("{}::{:06}", link_ns, position),
                MemoryValue::from(child.as_str()),
            ));
        }

        self.staged += 1;
        Ok(())
    }

    /// Stage removal of a record, its join rows, and its embedding
    pub async fn delete(&mut self, id: &str, level: MemoryLevel) -> MemoryResult<()> {
        let store = self.store;
        self.ops.push(BatchOp::Delete(store.record_key(level, id)));
        self.ops.push(BatchOp::Delete(store.embedding_key(id)));
        for link in store.link_keys(level, id).await? {
            self.ops.push(BatchOp::Delete(link));
        }
        self.staged += 1;
        Ok(())
    }

    /// Latest staged value for `key`, `None` if unstaged or staged for delete
    fn staged_value(&self, key: &str) -> Option<&MemoryValue> {
        self.ops.iter().rev().find_map(|op| match op {
            BatchOp::Set(k, value) if k == key => Some(Some(value)),
            BatchOp::Delete(k) if k == key => Some(None),
            _ => None,
        })?
    }

    /// Keys staged for write under `namespace`
    fn staged_keys_under(&self, namespace: &str) -> Vec<String> {
        let prefix = format!("{}::", namespace);
        self.ops
            .iter()
            .filter_map(|op| match op {
                BatchOp::Set(k, _) if k.starts_with(&prefix) => Some(k.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of record-level operations staged so far
    pub fn len(&self) -> usize {
        self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged == 0
    }

    /// Apply every staged write, or none of them
    pub async fn commit(self) -> MemoryResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            records = self.staged,
            writes = self.ops.len(),
            backend = self.store.storage.backend_name(),
            "Committing store transaction"
        );
        self.store.storage.apply_batch(self.ops).await
    }
}

fn rank_order(a: &StoredMemory, b: &StoredMemory) -> Ordering {
    b.access
        .retention_score
        .partial_cmp(&a.access.retention_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.access.access_count.cmp(&a.access.access_count))
        .then_with(|| b.record.created_at().cmp(&a.record.created_at()))
}

fn encode(stored: &StoredMemory, operation: &str) -> MemoryResult<MemoryValue> {
    serde_json::to_value(stored)
        .map(MemoryValue::Json)
        .map_err(|e| MemoryError::serialization(operation, e))
}

fn decode(value: &MemoryValue) -> MemoryResult<StoredMemory> {
    let json = value.as_json().ok_or_else(|| {
        MemoryError::validation("record", "must be stored as JSON", format!("{:?}", value))
    })?;
    serde_json::from_value(json.clone()).map_err(|e| MemoryError::serialization("decode_record", e))
}
