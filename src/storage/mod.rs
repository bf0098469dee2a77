//! Persistence gateway: worker records and the scanned, sharded database.
//!
//! The worker only depends on the [`WorkerStore`] and [`ShardedDatabase`]
//! traits. In-memory implementations live in [`memory`].

mod database;
mod error;
pub mod memory;
mod record;

pub use database::{RangeQuery, ScannedItem, ShardedDatabase, WorkerStore};
pub use error::StorageError;
pub use memory::{MemoryDatabase, MemoryWorkerStore};
pub use record::{PersistedWorkerRecord, CURRENT_SCHEMA_VERSION, OLDEST_SUPPORTED_SCHEMA_VERSION};
