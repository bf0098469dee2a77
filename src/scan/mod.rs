//! Key-space partitioning and progress estimation.

mod partition;

pub use partition::{entity_id_range_from_work_shard, explicit_list_ratio, scanned_ratio_estimate};
