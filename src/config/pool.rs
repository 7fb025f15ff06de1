//! Scheduler and worker-pool configuration structures.

use serde::{Deserialize, Serialize};

fn default_worker_count() -> usize {
    num_cpus::get().max(1)
}

fn default_duplicate_allowed() -> bool {
    true
}

/// Configuration for a [`Scheduler`](crate::core::Scheduler) and its pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. Clamped to `[1, available parallelism]`
    /// when the pool starts.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Optional stack size in bytes for worker threads.
    #[serde(default)]
    pub worker_stack_size: Option<usize>,
    /// Whether two pending/executing tasks may share an identity.
    #[serde(default = "default_duplicate_allowed")]
    pub duplicate_allowed: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    /// Configuration with platform defaults: one worker per logical CPU,
    /// default thread stacks, duplicates allowed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            worker_count: default_worker_count(),
            worker_stack_size: None,
            duplicate_allowed: default_duplicate_allowed(),
        }
    }

    /// Set the worker thread count.
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the worker thread stack size in bytes.
    #[must_use]
    pub fn with_worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }

    /// Set the duplicate-identity policy.
    #[must_use]
    pub fn with_duplicate_allowed(mut self, allowed: bool) -> Self {
        self.duplicate_allowed = allowed;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if let Some(bytes) = self.worker_stack_size {
            if bytes < 64 * 1024 {
                return Err("worker_stack_size must be at least 64 KiB".into());
            }
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate it.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error description.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: SchedulerConfig =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
