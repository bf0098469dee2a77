//! Resumable per-database-shard cursors.
//!
//! A job keeps one [`ShardCursor`] per database shard and reads from them in a
//! round-robin manner. [`ShardIteratorSet`] owns the cursor array together with
//! the index of the database shard to query next, and maintains the invariant:
//!
//! - `next_shard_index` is within the bounds of `cursors`.
//! - If at least one cursor is unfinished, `next_shard_index` identifies an
//!   unfinished cursor. (If all are finished it may identify any of them.)

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::job::WorkShard;

/// Cursor into one database shard's key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardCursor {
    /// Key after which the next query starts. `None` only for the end sentinel.
    pub start_key_exclusive: Option<String>,
    /// Whether this shard has been fully scanned.
    pub is_finished: bool,
}

impl ShardCursor {
    /// Cursor at the beginning of a shard.
    #[must_use]
    pub const fn start() -> Self {
        Self {
            start_key_exclusive: Some(String::new()),
            is_finished: false,
        }
    }

    /// Cursor past the end of a shard.
    #[must_use]
    pub const fn end() -> Self {
        Self {
            start_key_exclusive: None,
            is_finished: true,
        }
    }

    /// Unfinished cursor resuming after `key`.
    #[must_use]
    pub fn at_key(key: impl Into<String>) -> Self {
        Self {
            start_key_exclusive: Some(key.into()),
            is_finished: false,
        }
    }

    /// Key to pass to the range query (empty for the end sentinel).
    #[must_use]
    pub fn query_start_key(&self) -> &str {
        self.start_key_exclusive.as_deref().unwrap_or("")
    }
}

/// Single-cursor scan state written by older workers, which scanned database
/// shards one after another instead of interleaving them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyCursor {
    /// Database shard the cursor was on.
    pub shard_index: usize,
    /// Key after which scanning of `shard_index` continues.
    pub start_key_exclusive: String,
    /// Whether the whole scan had finished.
    pub is_finished: bool,
}

/// A range query returned more items than the requested page size.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("range query result exceeded page size: got {got}, page size was {page_size}")]
pub struct PageSizeExceeded {
    /// Number of items returned.
    pub got: usize,
    /// Requested page size.
    pub page_size: usize,
}

/// The legacy cursor was expected but missing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("per-shard cursors are missing and there is no legacy cursor to migrate from")]
pub struct MissingLegacyCursor;

/// Per-database-shard cursors plus the next shard to query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardIteratorSet {
    /// One cursor per database shard, indexed by database shard index.
    #[serde(default)]
    pub cursors: Vec<ShardCursor>,
    /// Database shard to query next.
    #[serde(default)]
    pub next_shard_index: usize,
    /// Old single-cursor state, present only until migrated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy: Option<LegacyCursor>,
}

impl ShardIteratorSet {
    /// Fresh cursors for a new job, starting from this worker's offset shard.
    #[must_use]
    pub fn new(work_shard: WorkShard, num_db_shards: usize) -> Self {
        Self {
            cursors: vec![ShardCursor::start(); num_db_shards],
            next_shard_index: Self::offset_starting_index(work_shard, num_db_shards),
            legacy: None,
        }
    }

    /// Starting shard for a worker, so sibling workers of a job start
    /// scanning from different database shards.
    #[must_use]
    pub fn offset_starting_index(work_shard: WorkShard, num_db_shards: usize) -> usize {
        if work_shard.num_workers == 0 {
            return 0;
        }
        work_shard.worker_index as usize * num_db_shards / work_shard.num_workers as usize
    }

    /// Returns an index satisfying the invariant.
    ///
    /// The index is wrapped into bounds. Unless all cursors are finished it is
    /// then incremented (with wraparound) until it identifies an unfinished
    /// cursor.
    #[must_use]
    pub fn valid_shard_index(index: usize, cursors: &[ShardCursor]) -> usize {
        if cursors.is_empty() {
            return 0;
        }
        let mut index = index % cursors.len();
        if cursors.iter().all(|c| c.is_finished) {
            return index;
        }
        while cursors[index].is_finished {
            index = (index + 1) % cursors.len();
        }
        index
    }

    /// Returns true if some cursor is unfinished.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.cursors.iter().any(|c| !c.is_finished)
    }

    /// Returns true if every cursor is finished.
    #[must_use]
    pub fn all_finished(&self) -> bool {
        !self.has_more()
    }

    /// Marks every cursor finished.
    pub fn finish_all(&mut self) {
        self.cursors.fill(ShardCursor::end());
    }

    /// The cursor at `next_shard_index`.
    #[must_use]
    pub fn current(&self) -> Option<&ShardCursor> {
        self.cursors.get(self.next_shard_index)
    }

    /// Records the result of a page query against the current shard and moves
    /// on to the next unfinished shard.
    ///
    /// A full page leaves the cursor at `last_key`; a short page finishes it.
    ///
    /// # Errors
    ///
    /// Returns `PageSizeExceeded` if more than `page_size` items were returned.
    /// The cursors are left untouched in that case.
    pub fn complete_page(
        &mut self,
        page_size: usize,
        returned: usize,
        last_key: Option<&str>,
    ) -> Result<(), PageSizeExceeded> {
        let cursor = match (returned.cmp(&page_size), last_key) {
            (std::cmp::Ordering::Greater, _) => {
                return Err(PageSizeExceeded {
                    got: returned,
                    page_size,
                })
            }
            (std::cmp::Ordering::Equal, Some(key)) if returned > 0 => ShardCursor::at_key(key),
            _ => ShardCursor::end(),
        };

        if let Some(slot) = self.cursors.get_mut(self.next_shard_index) {
            *slot = cursor;
        }
        self.next_shard_index = Self::valid_shard_index(self.next_shard_index + 1, &self.cursors);
        Ok(())
    }

    /// Converts a legacy single cursor into per-shard cursors, unless that was
    /// already done. Returns true if a migration happened.
    ///
    /// Shards before the legacy shard are finished, the legacy shard resumes
    /// from its key, and later shards start from the beginning.
    ///
    /// # Errors
    ///
    /// Returns `MissingLegacyCursor` if there are neither per-shard cursors nor
    /// a legacy cursor.
    pub fn ensure_migrated(
        &mut self,
        work_shard: WorkShard,
        num_db_shards: usize,
    ) -> Result<bool, MissingLegacyCursor> {
        if !self.cursors.is_empty() {
            self.legacy = None;
            return Ok(false);
        }
        let legacy = self.legacy.take().ok_or(MissingLegacyCursor)?;

        self.cursors = (0..num_db_shards)
            .map(|shard| {
                if legacy.is_finished || shard < legacy.shard_index {
                    ShardCursor::end()
                } else if shard == legacy.shard_index {
                    ShardCursor::at_key(legacy.start_key_exclusive.clone())
                } else {
                    ShardCursor::start()
                }
            })
            .collect();
        self.next_shard_index = Self::valid_shard_index(
            Self::offset_starting_index(work_shard, num_db_shards),
            &self.cursors,
        );

        tracing::info!(
            legacy = ?legacy,
            cursors = ?self.cursors,
            next_shard_index = self.next_shard_index,
            "Migrated legacy cursor to per-shard cursors"
        );
        Ok(true)
    }

    /// Adapts the cursors to a changed number of database shards. Returns true
    /// if the cursors were replaced.
    ///
    /// Items move between shards on resharding, so the rest of the scan cannot
    /// be exact. Every new cursor restarts from the lowest key among the old
    /// unfinished cursors, which may re-scan items but never skips any. If the
    /// old scan was complete, all new cursors are finished.
    pub fn ensure_consistent_with_num_shards(&mut self, num_db_shards: usize) -> bool {
        if self.cursors.len() == num_db_shards {
            return false;
        }

        let min_key = self
            .cursors
            .iter()
            .filter(|c| !c.is_finished)
            .map(ShardCursor::query_start_key)
            .min()
            .map(str::to_string);

        let new_cursors = match min_key {
            None => vec![ShardCursor::end(); num_db_shards],
            Some(key) => vec![ShardCursor::at_key(key); num_db_shards],
        };
        let next_shard_index = Self::valid_shard_index(self.next_shard_index, &new_cursors);

        tracing::info!(
            old = ?self.cursors,
            new = ?new_cursors,
            next_shard_index,
            "Updated database shard cursors due to resharding"
        );

        self.cursors = new_cursors;
        self.next_shard_index = next_shard_index;
        true
    }
}
