//! Splitting the entity id value space between the workers of a job, and
//! estimating how far a worker has come within its part.

use crate::models::{EntityId, EntityIdRange, EntityKind, ShardCursor, WorkShard};

/// Number of significant bits kept when dividing progress by range size.
const RATIO_SIGNIFICANT_BITS: u32 = 20;

/// First entity id value of piece `numerator` out of `denominator`.
///
/// Computes `numerator * upper_bound / denominator` without overflowing; the
/// product of a `u64` and a `u32` always fits in a `u128`.
fn shard_first_value(upper_bound: u64, numerator: u32, denominator: u32) -> u64 {
    if denominator == 0 {
        return 0;
    }
    let value = u128::from(numerator) * u128::from(upper_bound) / u128::from(denominator);
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// The range of entity id values owned by `work_shard`.
///
/// Worker `i` of `n` owns `[floor(i * upper / n), floor((i + 1) * upper / n) - 1]`.
/// The ranges of all workers are contiguous, disjoint and together cover
/// `[0, upper - 1]`. If there are more workers than values some of the ranges
/// are empty, and those workers get `None`.
#[must_use]
pub fn entity_id_range_from_work_shard(
    kind: &EntityKind,
    upper_bound: u64,
    work_shard: WorkShard,
) -> Option<EntityIdRange> {
    let first = shard_first_value(upper_bound, work_shard.worker_index, work_shard.num_workers);
    let next_first = shard_first_value(
        upper_bound,
        work_shard.worker_index.saturating_add(1),
        work_shard.num_workers,
    );
    if next_first <= first {
        return None;
    }
    Some(EntityIdRange::new(kind.clone(), first, next_first - 1))
}

/// Fraction of `range` that is done when everything up to and including
/// `done_value` has been scanned.
///
/// Both quantities are shifted right so that the larger one keeps only
/// [`RATIO_SIGNIFICANT_BITS`] bits before the float division. This is an
/// approximation, but progress estimates do not need to be exact.
fn done_ratio_in_range(range: &EntityIdRange, done_value: u64) -> f32 {
    let total = (range.last_inclusive - range.first_inclusive).saturating_add(1);
    let done = done_value
        .saturating_sub(range.first_inclusive)
        .saturating_add(1)
        .min(total);

    let num_bits = u64::BITS - total.leading_zeros();
    let shift = num_bits.saturating_sub(RATIO_SIGNIFICANT_BITS);

    #[allow(clippy::cast_precision_loss)]
    let ratio = (done >> shift) as f32 / (total >> shift) as f32;
    ratio
}

/// Estimates how much of `range` has been scanned, given the per-shard cursors.
///
/// Finished cursors count as fully scanned and fresh cursors as not scanned at
/// all. A cursor in the middle of its shard counts as the fraction of the range
/// before its key. The result is the average over all database shards.
#[must_use]
pub fn scanned_ratio_estimate(range: &EntityIdRange, cursors: &[ShardCursor]) -> f32 {
    if cursors.iter().all(|c| c.is_finished) {
        return 1.0;
    }

    let sum: f32 = cursors
        .iter()
        .map(|cursor| match cursor.start_key_exclusive.as_deref() {
            _ if cursor.is_finished => 1.0,
            None | Some("") => 0.0,
            Some(key) => EntityId::parse(key)
                .map(|id| done_ratio_in_range(range, id.value()))
                .unwrap_or(0.0),
        })
        .sum();

    #[allow(clippy::cast_precision_loss)]
    let count = cursors.len() as f32;
    sum / count
}

/// Ratio estimate for list mode: the share of the explicit list already visited.
#[must_use]
pub fn explicit_list_ratio(index: usize, len: usize) -> f32 {
    if len == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = index.min(len) as f32 / len as f32;
    ratio
}
