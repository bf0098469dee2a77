//! Contracts of the persistence layer that the scan worker consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{EntityId, EntityKind};

use super::{PersistedWorkerRecord, StorageError};

/// An entity returned by a database query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedItem {
    /// Primary key, the canonical entity id string.
    pub key: String,
    /// Entity contents.
    pub payload: Value,
}

impl ScannedItem {
    /// Creates an item.
    #[must_use]
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }
}

/// A paged key-range query against a single database shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery<'a> {
    /// Kind of entity to query.
    pub kind: &'a EntityKind,
    /// Operation name, for the database's own bookkeeping.
    pub op_name: &'a str,
    /// Database shard to query.
    pub shard_index: usize,
    /// Only keys strictly greater than this are returned. Empty means no lower limit.
    pub start_key_exclusive: &'a str,
    /// Maximum number of items to return.
    pub page_size: usize,
    /// Smallest key of the range.
    pub range_first_key_inclusive: &'a str,
    /// Largest key of the range.
    pub range_last_key_inclusive: &'a str,
}

/// A horizontally partitioned database holding the entities to scan.
///
/// Implementations resolve the entity kind to the right table themselves, so
/// the worker never inspects entity types at runtime.
#[async_trait]
pub trait ShardedDatabase: Send + Sync {
    /// Current number of database shards.
    async fn num_active_shards(&self) -> usize;

    /// Fetches a single entity, if it exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the database cannot be queried.
    async fn try_get_item(
        &self,
        kind: &EntityKind,
        id: &EntityId,
    ) -> Result<Option<ScannedItem>, StorageError>;

    /// Runs a paged range query.
    ///
    /// Items are returned in ascending key order, and at most `page_size` of
    /// them. The worker treats a larger result as a broken contract.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the database cannot be queried.
    async fn query_paged_range(
        &self,
        query: &RangeQuery<'_>,
    ) -> Result<Vec<ScannedItem>, StorageError>;
}

/// Storage of worker records.
///
/// A record is created with `insert` the first time a worker persists and
/// written with `update` after that.
#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// Loads the record of a worker, if it has ever been persisted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn try_get(&self, worker_id: &str) -> Result<Option<PersistedWorkerRecord>, StorageError>;

    /// Creates a new record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if a record with the same id exists.
    async fn insert(&self, record: PersistedWorkerRecord) -> Result<(), StorageError>;

    /// Replaces an existing record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if there is no record with the id.
    async fn update(&self, record: PersistedWorkerRecord) -> Result<(), StorageError>;
}
