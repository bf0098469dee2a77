//! Processors: the pluggable units that act on scanned items.
//!
//! The worker drives a [`ScanProcessor`] through its batch/tick/cancel
//! contract and asks it how fast to scan and how often to persist. Processors
//! are created and restored from persisted state by a [`ProcessorFactory`],
//! looked up by kind in a [`ProcessorRegistry`].

mod registry;
mod touch;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::ProcessingStats;
use crate::storage::ScannedItem;

pub use registry::{ProcessorFactory, ProcessorRegistry};
pub use touch::{TouchProcessor, TouchProcessorFactory, TouchProcessorParams, TOUCH_PROCESSOR_KIND};

/// Errors raised by processors and the processor registry.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// No factory is registered for the processor kind.
    #[error("No processor registered for kind '{0}'")]
    UnknownKind(String),

    /// The processor parameters or persisted state could not be decoded.
    #[error("Invalid state for processor '{kind}': {source}")]
    InvalidState {
        /// Processor kind.
        kind: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Processing items failed.
    #[error("Processing failed: {0}")]
    Failed(String),
}

/// A processor of scanned items.
///
/// All methods are called from the worker's single sequential context, so
/// implementations need no internal synchronization.
#[async_trait]
pub trait ScanProcessor: Send + Sync {
    /// Number of items to request from the database per batch.
    fn desired_scan_batch_size(&self) -> usize;

    /// Time between scans.
    fn scan_interval(&self) -> Duration;

    /// Time between ticks.
    fn tick_interval(&self) -> Duration;

    /// Time between periodic persists of the worker state.
    fn persist_interval(&self) -> Duration;

    /// Returns false to hold back further batches.
    fn can_currently_process_more_items(&self) -> bool;

    /// Returns true when every batch handed out so far has been processed.
    fn has_completed_all_work_so_far(&self) -> bool;

    /// Starts processing a non-empty batch of items.
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError` if the batch cannot be accepted.
    async fn start_process_item_batch(&mut self, items: Vec<ScannedItem>) -> Result<(), ProcessorError>;

    /// Periodic update.
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError` if processing failed.
    async fn tick(&mut self) -> Result<(), ProcessorError>;

    /// Abandons all work in progress.
    fn cancel(&mut self);

    /// Statistics to include in status reports.
    fn stats(&self) -> ProcessingStats;

    /// State to persist with the job, passed to
    /// [`ProcessorFactory::restore`] on reload.
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError` if the state cannot be serialized.
    fn persisted_state(&self) -> Result<Value, ProcessorError>;
}
