//! Error types for scheduler components.

use thiserror::Error;

/// Errors produced while constructing or starting scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// An OS thread could not be spawned. Any partially started workers have
    /// already been stopped and joined when this is returned.
    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Task outcomes surfaced through a [`TaskHandle`](crate::core::TaskHandle).
///
/// Management operations never produce these; they report failure via `bool`
/// return values so the scheduler's internal loops stay crash-free.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The task's callable panicked; the payload message is captured here.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was dropped before it could execute: duplicate-identity
    /// conflict, submission after stop, or discarded by `Scheduler::stop`.
    #[error("task was rejected before execution")]
    Rejected,
    /// The wait deadline elapsed before the task produced an outcome.
    #[error("timed out waiting for task result")]
    Timeout,
    /// The task's result was already taken by an earlier wait.
    #[error("task result already consumed")]
    Consumed,
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
