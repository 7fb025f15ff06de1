//! Builder to construct a scheduler from configuration.

use crate::config::SchedulerConfig;
use crate::core::{Scheduler, SchedulerError};

/// Fluent builder producing a validated, not-yet-started [`Scheduler`].
///
/// ```rust,no_run
/// use prometheus_chronos::builders::SchedulerBuilder;
///
/// # fn main() -> Result<(), prometheus_chronos::core::SchedulerError> {
/// let scheduler = SchedulerBuilder::new()
///     .worker_count(4)
///     .duplicate_allowed(false)
///     .build()?;
/// scheduler.start()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    /// Builder seeded with platform defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::new(),
        }
    }

    /// Builder seeded from an existing configuration.
    #[must_use]
    pub fn from_config(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Set the worker thread count.
    #[must_use]
    pub fn worker_count(mut self, worker_count: usize) -> Self {
        self.config.worker_count = worker_count;
        self
    }

    /// Set the worker thread stack size in bytes.
    #[must_use]
    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.config.worker_stack_size = Some(bytes);
        self
    }

    /// Set the duplicate-identity policy.
    #[must_use]
    pub fn duplicate_allowed(mut self, allowed: bool) -> Self {
        self.config.duplicate_allowed = allowed;
        self
    }

    /// Validate the configuration and construct the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] or
    /// [`SchedulerError::ThreadSpawn`].
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        Scheduler::with_config(&self.config)
    }
}
