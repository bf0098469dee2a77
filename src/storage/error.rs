use thiserror::Error;

/// Errors from the worker store or the scanned database.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The requested worker record does not exist.
    #[error("Worker record not found: {id}")]
    NotFound {
        /// Id of the missing record.
        id: String,
    },

    /// Attempted to insert a worker record that already exists.
    #[error("Worker record already exists: {id}")]
    AlreadyExists {
        /// Id of the existing record.
        id: String,
    },

    /// The database shard does not exist.
    #[error("Database shard {shard} does not exist ({num_shards} active shards)")]
    NoSuchShard {
        /// Requested shard index.
        shard: usize,
        /// Number of active shards.
        num_shards: usize,
    },

    /// The backend could not be reached or timed out.
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    /// Catch-all for other backend errors.
    #[error("Database error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns a helpful suggestion for resolving this error.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => {
                "The worker record may have been deleted. A worker that never \
                 persisted must insert its first record before updating it."
            }
            Self::AlreadyExists { .. } => {
                "Another process has already created this worker record. Make sure \
                 only one worker instance runs per worker id."
            }
            Self::NoSuchShard { .. } => {
                "The database was resharded while a query was in flight. Restarting \
                 the worker adapts its cursors to the new shard count."
            }
            Self::Unavailable(_) => {
                "Check that the database is running and reachable. The worker will \
                 resume from its last persisted state when restarted."
            }
            Self::Backend(_) => {
                "An unexpected database error occurred. Check the error message for \
                 details."
            }
        }
    }

    /// Returns a richly formatted error message with context and suggestions.
    #[must_use]
    pub fn display_rich(&self) -> String {
        format!("Error: {}\n\nSuggestion:\n  {}", self, self.suggestion())
    }
}
