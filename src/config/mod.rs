//! Configuration models for the scheduler and its worker pool.

pub mod pool;

pub use pool::SchedulerConfig;
