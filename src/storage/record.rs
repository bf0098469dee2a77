//! The persisted form of a worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Oldest schema version this build can load.
pub const OLDEST_SUPPORTED_SCHEMA_VERSION: u32 = 1;

/// One row per worker, holding its serialized state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedWorkerRecord {
    /// Id of the worker that owns the record.
    pub worker_id: String,
    /// When the record was written.
    pub persisted_at: DateTime<Utc>,
    /// Serialized worker state.
    pub payload: Vec<u8>,
    /// Schema version of `payload`.
    pub schema_version: u32,
    /// Whether this was written as the worker shut down.
    pub is_final: bool,
}

impl PersistedWorkerRecord {
    /// Returns true if this build can decode the payload.
    #[must_use]
    pub const fn is_supported_schema(&self) -> bool {
        self.schema_version >= OLDEST_SUPPORTED_SCHEMA_VERSION
            && self.schema_version <= CURRENT_SCHEMA_VERSION
    }
}
