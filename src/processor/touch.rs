//! The built-in `touch` processor.
//!
//! Touching an item means visiting it without changing it. Batches are
//! accepted into an in-flight queue and completed on the next tick, with at
//! most `max_in_flight_batches` outstanding at a time.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ProcessingStats;
use crate::storage::ScannedItem;

use super::{ProcessorError, ProcessorFactory, ScanProcessor};

/// Kind name of the touch processor.
pub const TOUCH_PROCESSOR_KIND: &str = "touch";

/// Parameters of the touch processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchProcessorParams {
    /// Items per batch.
    pub batch_size: usize,
    /// Maximum number of batches waiting for a tick.
    pub max_in_flight_batches: usize,
    /// Milliseconds between scans.
    pub scan_interval_ms: u64,
    /// Milliseconds between ticks.
    pub tick_interval_ms: u64,
    /// Milliseconds between periodic persists.
    pub persist_interval_ms: u64,
}

impl Default for TouchProcessorParams {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_in_flight_batches: 4,
            scan_interval_ms: 10,
            tick_interval_ms: 50,
            persist_interval_ms: 5_000,
        }
    }
}

impl TouchProcessorParams {
    fn from_value(params: &Value) -> Result<Self, ProcessorError> {
        if params.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(params.clone()).map_err(|source| ProcessorError::InvalidState {
            kind: TOUCH_PROCESSOR_KIND.to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct TouchStats {
    items_touched: u64,
    batches_completed: u64,
    batches_cancelled: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct TouchState {
    stats: TouchStats,
    in_flight: VecDeque<usize>,
}

/// Processor that counts the items it is given.
#[derive(Debug)]
pub struct TouchProcessor {
    params: TouchProcessorParams,
    stats: TouchStats,
    in_flight: VecDeque<usize>,
}

impl TouchProcessor {
    /// Creates a processor with no work in flight.
    #[must_use]
    pub fn new(params: TouchProcessorParams) -> Self {
        Self {
            params,
            stats: TouchStats::default(),
            in_flight: VecDeque::new(),
        }
    }

    /// Number of items touched so far.
    #[must_use]
    pub const fn items_touched(&self) -> u64 {
        self.stats.items_touched
    }

    /// Number of batches waiting for a tick.
    #[must_use]
    pub fn batches_in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[async_trait]
impl ScanProcessor for TouchProcessor {
    fn desired_scan_batch_size(&self) -> usize {
        self.params.batch_size.max(1)
    }

    fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.params.scan_interval_ms)
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.params.tick_interval_ms)
    }

    fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.params.persist_interval_ms)
    }

    fn can_currently_process_more_items(&self) -> bool {
        self.in_flight.len() < self.params.max_in_flight_batches.max(1)
    }

    fn has_completed_all_work_so_far(&self) -> bool {
        self.in_flight.is_empty()
    }

    async fn start_process_item_batch(&mut self, items: Vec<ScannedItem>) -> Result<(), ProcessorError> {
        tracing::debug!(num_items = items.len(), "Touch batch accepted");
        self.in_flight.push_back(items.len());
        Ok(())
    }

    async fn tick(&mut self) -> Result<(), ProcessorError> {
        while let Some(count) = self.in_flight.pop_front() {
            self.stats.items_touched += count as u64;
            self.stats.batches_completed += 1;
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.stats.batches_cancelled += self.in_flight.len() as u64;
        self.in_flight.clear();
    }

    fn stats(&self) -> ProcessingStats {
        serde_json::to_value(&self.stats).unwrap_or(Value::Null)
    }

    fn persisted_state(&self) -> Result<Value, ProcessorError> {
        let state = TouchState {
            stats: self.stats.clone(),
            in_flight: self.in_flight.clone(),
        };
        serde_json::to_value(state).map_err(|source| ProcessorError::InvalidState {
            kind: TOUCH_PROCESSOR_KIND.to_string(),
            source,
        })
    }
}

/// Factory for [`TouchProcessor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TouchProcessorFactory;

impl ProcessorFactory for TouchProcessorFactory {
    fn processor_kind(&self) -> &str {
        TOUCH_PROCESSOR_KIND
    }

    fn create(
        &self,
        params: &Value,
        prior_stats: Option<&ProcessingStats>,
    ) -> Result<Box<dyn ScanProcessor>, ProcessorError> {
        let mut processor = TouchProcessor::new(TouchProcessorParams::from_value(params)?);
        if let Some(prior) = prior_stats {
            match serde_json::from_value::<TouchStats>(prior.clone()) {
                Ok(stats) => processor.stats = stats,
                Err(e) => tracing::warn!(error = %e, "Ignoring unreadable prior touch stats"),
            }
        }
        Ok(Box::new(processor))
    }

    fn restore(&self, params: &Value, state: Value) -> Result<Box<dyn ScanProcessor>, ProcessorError> {
        let state: TouchState =
            serde_json::from_value(state).map_err(|source| ProcessorError::InvalidState {
                kind: TOUCH_PROCESSOR_KIND.to_string(),
                source,
            })?;
        Ok(Box::new(TouchProcessor {
            params: TouchProcessorParams::from_value(params)?,
            stats: state.stats,
            in_flight: state.in_flight,
        }))
    }
}
