//! In-memory storage backends.
//!
//! Used by tests and the demo binary. [`MemoryDatabase`] keeps one ordered map
//! per (entity kind, database shard) and can be resharded or told to misbehave.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::models::{EntityId, EntityKind};

use super::{PersistedWorkerRecord, RangeQuery, ScannedItem, ShardedDatabase, StorageError, WorkerStore};

#[derive(Debug, Default)]
struct Tables {
    num_shards: usize,
    kinds: HashMap<EntityKind, Vec<BTreeMap<String, Value>>>,
}

impl Tables {
    fn shard_of(&self, id: &EntityId) -> usize {
        // num_shards is never zero
        #[allow(clippy::cast_possible_truncation)]
        let shard = (id.value() % self.num_shards as u64) as usize;
        shard
    }

    fn insert(&mut self, id: &EntityId, payload: Value) {
        let shard = self.shard_of(id);
        let num_shards = self.num_shards;
        let shards = self
            .kinds
            .entry(id.kind().clone())
            .or_insert_with(|| vec![BTreeMap::new(); num_shards]);
        if let Some(entries) = shards.get_mut(shard) {
            entries.insert(id.to_string(), payload);
        }
    }
}

/// In-memory sharded entity database.
#[derive(Debug)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
    overfill_pages: AtomicBool,
    unavailable: AtomicBool,
    num_queries: AtomicU64,
}

impl MemoryDatabase {
    /// Creates an empty database with `num_shards` shards (at least one).
    #[must_use]
    pub fn new(num_shards: usize) -> Self {
        Self {
            tables: RwLock::new(Tables {
                num_shards: num_shards.max(1),
                kinds: HashMap::new(),
            }),
            overfill_pages: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
            num_queries: AtomicU64::new(0),
        }
    }

    /// Stores an entity on shard `value % num_shards`.
    pub async fn insert_entity(&self, id: &EntityId, payload: Value) {
        self.tables.write().await.insert(id, payload);
    }

    /// Stores one entity of `kind` for each value.
    pub async fn populate(&self, kind: &EntityKind, values: impl IntoIterator<Item = u64> + Send) {
        let mut tables = self.tables.write().await;
        for value in values {
            let id = EntityId::new(kind.clone(), value);
            tables.insert(&id, serde_json::json!({ "value": value }));
        }
    }

    /// Redistributes all entities over `num_shards` shards (at least one).
    pub async fn reshard(&self, num_shards: usize) {
        let mut tables = self.tables.write().await;
        let old = std::mem::take(&mut tables.kinds);
        tables.num_shards = num_shards.max(1);
        for (kind, shards) in old {
            for (key, payload) in shards.into_iter().flatten() {
                match EntityId::parse(&key) {
                    Ok(id) => tables.insert(&id, payload),
                    Err(e) => tracing::warn!(kind = %kind, key = %key, error = %e, "Dropping unparseable key on reshard"),
                }
            }
        }
        tracing::info!(num_shards = tables.num_shards, "Resharded in-memory database");
    }

    /// Makes range queries return one item more than the page size.
    pub fn set_overfill_pages(&self, overfill: bool) {
        self.overfill_pages.store(overfill, Ordering::SeqCst);
    }

    /// Makes every query fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of queries served so far.
    #[must_use]
    pub fn num_queries(&self) -> u64 {
        self.num_queries.load(Ordering::SeqCst)
    }

    /// Total number of stored entities of `kind`.
    pub async fn count(&self, kind: &EntityKind) -> usize {
        self.tables
            .read()
            .await
            .kinds
            .get(kind)
            .map_or(0, |shards| shards.iter().map(BTreeMap::len).sum())
    }

    fn check_available(&self) -> Result<(), StorageError> {
        self.num_queries.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("in-memory database switched off".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ShardedDatabase for MemoryDatabase {
    async fn num_active_shards(&self) -> usize {
        self.tables.read().await.num_shards
    }

    async fn try_get_item(
        &self,
        kind: &EntityKind,
        id: &EntityId,
    ) -> Result<Option<ScannedItem>, StorageError> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let shard = tables.shard_of(id);
        let key = id.to_string();
        Ok(tables
            .kinds
            .get(kind)
            .and_then(|shards| shards.get(shard))
            .and_then(|entries| entries.get(&key))
            .map(|payload| ScannedItem::new(key.clone(), payload.clone())))
    }

    async fn query_paged_range(
        &self,
        query: &RangeQuery<'_>,
    ) -> Result<Vec<ScannedItem>, StorageError> {
        self.check_available()?;
        let tables = self.tables.read().await;
        if query.shard_index >= tables.num_shards {
            return Err(StorageError::NoSuchShard {
                shard: query.shard_index,
                num_shards: tables.num_shards,
            });
        }
        let Some(entries) = tables
            .kinds
            .get(query.kind)
            .and_then(|shards| shards.get(query.shard_index))
        else {
            return Ok(Vec::new());
        };

        let first = query.range_first_key_inclusive;
        let last = query.range_last_key_inclusive;
        let start = query.start_key_exclusive;
        let lower = if start.is_empty() || start < first {
            Bound::Included(first)
        } else {
            Bound::Excluded(start)
        };
        let empty = match lower {
            Bound::Included(lo) => lo > last,
            Bound::Excluded(lo) => lo >= last,
            Bound::Unbounded => false,
        };
        if empty {
            return Ok(Vec::new());
        }

        let limit = if self.overfill_pages.load(Ordering::SeqCst) {
            query.page_size + 1
        } else {
            query.page_size
        };
        Ok(entries
            .range::<str, _>((lower, Bound::Included(last)))
            .take(limit)
            .map(|(key, payload)| ScannedItem::new(key.clone(), payload.clone()))
            .collect())
    }
}

/// In-memory worker record store.
#[derive(Debug, Default)]
pub struct MemoryWorkerStore {
    records: Mutex<HashMap<String, PersistedWorkerRecord>>,
    fail_writes: AtomicBool,
    num_writes: AtomicU64,
}

impl MemoryWorkerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write fail with `StorageError::Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful inserts and updates.
    #[must_use]
    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::SeqCst)
    }

    /// Stores a record directly, bypassing insert/update semantics.
    pub async fn put(&self, record: PersistedWorkerRecord) {
        self.records
            .lock()
            .await
            .insert(record.worker_id.clone(), record);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("in-memory worker store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerStore for MemoryWorkerStore {
    async fn try_get(&self, worker_id: &str) -> Result<Option<PersistedWorkerRecord>, StorageError> {
        Ok(self.records.lock().await.get(worker_id).cloned())
    }

    async fn insert(&self, record: PersistedWorkerRecord) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut records = self.records.lock().await;
        if records.contains_key(&record.worker_id) {
            return Err(StorageError::AlreadyExists {
                id: record.worker_id,
            });
        }
        records.insert(record.worker_id.clone(), record);
        self.num_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, record: PersistedWorkerRecord) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut records = self.records.lock().await;
        let Some(slot) = records.get_mut(&record.worker_id) else {
            return Err(StorageError::NotFound {
                id: record.worker_id,
            });
        };
        *slot = record;
        self.num_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
