//! # Prometheus Chronos
//!
//! An embeddable, timer-driven task scheduling engine.
//!
//! This library lets a host process submit closures to run once at an
//! absolute time, after a delay, or repeatedly on a fixed interval. A single
//! dispatcher thread watches a time-ordered registry of pending entries and
//! hands due work to a bounded pool of worker threads. It is a linkable
//! component, not a service: no wire protocol, no persistence, no CLI.
//!
//! ## Core Problem Solved
//!
//! Long-lived processes accumulate ad-hoc timer threads: cache refreshers,
//! heartbeats, deferred cleanups, retry timers. Each hand-rolled loop is
//! another thread to shut down, another panic that can silently kill a
//! background job. Chronos centralizes them:
//!
//! - **One dispatcher, one pool**: all timed work shares a fixed set of
//!   worker threads instead of a thread per timer.
//! - **Panic isolation**: a panicking task settles its result handle and is
//!   logged; the worker keeps serving.
//! - **Managed lifecycles**: tasks submitted under a string identity can be
//!   queried, disabled, re-paced, and removed after submission.
//! - **Drift-corrected recurrence**: a stalled process produces at most one
//!   catch-up execution per recurring task, never a burst of missed ticks.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::{Duration, Instant};
//!
//! use prometheus_chronos::core::{AppResult, Scheduler};
//!
//! fn main() -> AppResult<()> {
//!     let scheduler = Scheduler::new(4)?;
//!     scheduler.start()?;
//!
//!     // One-shot work with a result handle.
//!     let handle = scheduler.after(Duration::from_millis(50), || 2 + 2);
//!
//!     // Absolute-time scheduling under a manageable identity.
//!     scheduler.at_with_id("cleanup", Instant::now() + Duration::from_secs(60), || {
//!         tracing::info!("cleaning up");
//!     });
//!
//!     // Recurring work, fire-and-forget.
//!     scheduler.every_with_id("heartbeat", Duration::from_secs(30), || {
//!         tracing::info!("still alive");
//!     });
//!
//!     assert_eq!(handle.wait()?, 4);
//!     assert!(scheduler.is_scheduled("heartbeat"));
//!     scheduler.remove_task("cleanup");
//!
//!     scheduler.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees and Non-Guarantees
//!
//! Entries are handed to the pool in non-decreasing due-time order and never
//! before their due time. Execution order across workers is not guaranteed:
//! workers run in parallel and a later, shorter task may finish first.
//! Removal prevents future dispatches but never interrupts an execution
//! already on a worker. Stopping the scheduler discards all pending entries
//! un-run; their handles resolve as rejected rather than hanging.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

/// Core scheduling abstractions: task pool, scheduler, and task handles.
pub mod core;
/// Configuration models for the scheduler and its worker pool.
pub mod config;
/// Builders to construct schedulers from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;
