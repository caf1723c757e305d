use crate::error::{PipelineError, Result};
use std::time::Duration;

/// Capacity used by `PipelineBuilder::connect` when none is given
pub const DEFAULT_CAPACITY: usize = 1024;

/// Engine-wide settings applied by the builder and the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Buffer capacity for connections made without an explicit capacity
    pub default_capacity: usize,
    /// Stage threads are named `<prefix>-<stage name>`
    pub thread_name_prefix: String,
    /// Upper bound on `RunningPipeline::join`; `None` waits indefinitely
    pub join_timeout: Option<Duration>,
    /// Number of iteration latencies kept for percentile calculation
    pub latency_window: usize,
}

impl PipelineConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            default_capacity: DEFAULT_CAPACITY,
            thread_name_prefix: "stage".to_string(),
            join_timeout: None,
            latency_window: 1000,
        }
    }

    /// Set the default buffer capacity
    pub fn with_default_capacity(mut self, capacity: usize) -> Self {
        self.default_capacity = capacity;
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Bound the time `join()` waits before forcing an interrupt
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = Some(timeout);
        self
    }

    /// Set the latency sliding window size
    pub fn with_latency_window(mut self, window: usize) -> Self {
        self.latency_window = window;
        self
    }

    /// Check that every setting is usable
    pub fn validate(&self) -> Result<()> {
        if self.default_capacity == 0 {
            return Err(PipelineError::ConfigError(
                "default_capacity must be at least 1".into(),
            ));
        }
        if self.latency_window == 0 {
            return Err(PipelineError::ConfigError(
                "latency_window must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}
