//! Fetching the next batch of items for the active job.

use crate::error::WorkerError;
use crate::metrics::ScanMetrics;
use crate::scan::{entity_id_range_from_work_shard, explicit_list_ratio, scanned_ratio_estimate};
use crate::storage::{RangeQuery, ScannedItem, ShardedDatabase};

use super::JobWorkState;

/// Fetches the next batch of items of a job and advances its scan position.
///
/// In list mode this looks up the next listed entity, giving zero or one
/// items. In range mode it queries one page from the current database shard
/// within the work shard's key range, then moves on to the next unfinished
/// shard. A work shard that owns no values finishes all of its cursors
/// without querying.
///
/// # Errors
///
/// Returns `WorkerError::PageSizeExceeded` if the database returned more than
/// a page, leaving the cursors untouched, `WorkerError::EntityId` if the
/// range reaches past the entity id values, or `WorkerError::Storage` if the
/// query failed.
pub async fn scan_next_batch(
    job: &mut JobWorkState,
    database: &dyn ShardedDatabase,
    metrics: &dyn ScanMetrics,
) -> Result<Vec<ScannedItem>, WorkerError> {
    let (items, ratio) = match &job.spec.explicit_entity_list {
        Some(list) => {
            let Some(entity_id) = list.get(job.explicit_list_index) else {
                return Ok(Vec::new());
            };
            job.explicit_list_index += 1;
            let item = database.try_get_item(&job.spec.entity_kind, entity_id).await?;
            let ratio = explicit_list_ratio(job.explicit_list_index, list.len());
            (item.into_iter().collect::<Vec<_>>(), ratio)
        }
        None => {
            let Some(range) = entity_id_range_from_work_shard(
                &job.spec.entity_kind,
                job.spec.entity_id_value_upper_bound,
                job.work_shard,
            ) else {
                job.iterators.finish_all();
                job.scan_statistics.scanned_ratio_estimate = 1.0;
                return Ok(Vec::new());
            };
            let page_size = job.processor.desired_scan_batch_size().max(1);
            let shard_index = job.iterators.next_shard_index;
            let start_key = job
                .iterators
                .current()
                .map(|cursor| cursor.query_start_key().to_string())
                .unwrap_or_default();
            let first_key = range.first_key()?;
            let last_key = range.last_key()?;

            let items = database
                .query_paged_range(&RangeQuery {
                    kind: &job.spec.entity_kind,
                    op_name: &job.spec.database_query_op_name,
                    shard_index,
                    start_key_exclusive: &start_key,
                    page_size,
                    range_first_key_inclusive: &first_key,
                    range_last_key_inclusive: &last_key,
                })
                .await?;

            job.iterators.complete_page(
                page_size,
                items.len(),
                items.last().map(|item| item.key.as_str()),
            )?;
            let ratio = scanned_ratio_estimate(&range, &job.iterators.cursors);
            (items, ratio)
        }
    };

    let count = items.len() as u64;
    job.scan_statistics.num_items_scanned += count;
    job.scan_statistics.scanned_ratio_estimate = ratio;
    metrics.items_queried(&job.spec.metrics_tag, count);

    tracing::trace!(
        job_id = %job.id,
        count,
        scanned_ratio_estimate = ratio,
        "Scanned batch"
    );
    Ok(items)
}
