use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::models::{ProcessingStats, ProcessorSpec};

use super::{ProcessorError, ScanProcessor, TouchProcessorFactory};

/// Creates processors of one kind.
///
/// # Example
///
/// ```ignore
/// use serde_json::Value;
/// use shardscan::models::ProcessingStats;
/// use shardscan::processor::{ProcessorError, ProcessorFactory, ScanProcessor};
///
/// struct AuditFactory;
///
/// impl ProcessorFactory for AuditFactory {
///     fn processor_kind(&self) -> &str {
///         "audit"
///     }
///
///     fn create(
///         &self,
///         params: &Value,
///         prior_stats: Option<&ProcessingStats>,
///     ) -> Result<Box<dyn ScanProcessor>, ProcessorError> {
///         Ok(Box::new(AuditProcessor::new(params, prior_stats)?))
///     }
///
///     fn restore(&self, params: &Value, state: Value) -> Result<Box<dyn ScanProcessor>, ProcessorError> {
///         Ok(Box::new(AuditProcessor::from_state(params, state)?))
///     }
/// }
/// ```
pub trait ProcessorFactory: Send + Sync {
    /// The processor kind this factory creates.
    ///
    /// Must match [`ProcessorSpec::kind`] of the jobs that use it.
    fn processor_kind(&self) -> &str;

    /// Creates a fresh processor.
    ///
    /// `prior_stats` is set when a processor replaces an earlier one of the
    /// same job, so that its statistics carry over.
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError` if the parameters are invalid.
    fn create(
        &self,
        params: &Value,
        prior_stats: Option<&ProcessingStats>,
    ) -> Result<Box<dyn ScanProcessor>, ProcessorError>;

    /// Recreates a processor from [`ScanProcessor::persisted_state`].
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError` if the state cannot be decoded.
    fn restore(&self, params: &Value, state: Value) -> Result<Box<dyn ScanProcessor>, ProcessorError>;
}

/// Registry of processor factories.
///
/// Maps processor kinds to their factories, built once at startup.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    factories: HashMap<String, Arc<dyn ProcessorFactory>>,
}

impl ProcessorRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in processors registered.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TouchProcessorFactory));
        registry
    }

    /// Registers a factory. Replaces any factory of the same kind.
    pub fn register(&mut self, factory: Arc<dyn ProcessorFactory>) {
        self.factories
            .insert(factory.processor_kind().to_string(), factory);
    }

    /// Gets the factory for a kind.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&dyn ProcessorFactory> {
        self.factories.get(kind).map(AsRef::as_ref)
    }

    /// Returns true if a factory is registered for the kind.
    #[must_use]
    pub fn has_factory(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Returns all registered kinds.
    #[must_use]
    pub fn processor_kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Creates a processor for a job.
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError::UnknownKind` if no factory is registered for
    /// the kind, or the factory's error.
    pub fn create(
        &self,
        spec: &ProcessorSpec,
        prior_stats: Option<&ProcessingStats>,
    ) -> Result<Box<dyn ScanProcessor>, ProcessorError> {
        self.factory(&spec.kind)?.create(&spec.params, prior_stats)
    }

    /// Restores a persisted processor of a job.
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError::UnknownKind` if no factory is registered for
    /// the kind, or the factory's error.
    pub fn restore(
        &self,
        spec: &ProcessorSpec,
        state: Value,
    ) -> Result<Box<dyn ScanProcessor>, ProcessorError> {
        self.factory(&spec.kind)?.restore(&spec.params, state)
    }

    fn factory(&self, kind: &str) -> Result<&dyn ProcessorFactory, ProcessorError> {
        self.get(kind)
            .ok_or_else(|| ProcessorError::UnknownKind(kind.to_string()))
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("kinds", &self.processor_kinds())
            .finish()
    }
}
