//! Data model of scan jobs and their persisted worker state.

mod cursor;
mod entity_id;
mod job;
mod stats;
mod work_state;

pub use cursor::{LegacyCursor, MissingLegacyCursor, PageSizeExceeded, ShardCursor, ShardIteratorSet};
pub use entity_id::{
    EntityId, EntityIdParseError, EntityIdRange, EntityKind, ENTITY_ID_MAX_VALUE, ENTITY_ID_VALUE_BITS,
    ENTITY_ID_VALUE_LEN,
};
pub use job::{JobId, JobSpec, JobSpecError, ProcessorSpec, StopFlavor, WorkPhase, WorkShard};
pub use stats::{ProcessingStats, ScanStatistics, StatusSnapshot};
pub use work_state::{JobWorkRecord, WorkerStateRecord};
