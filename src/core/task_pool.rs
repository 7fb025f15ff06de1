//! Worker pool executing type-erased jobs on dedicated OS threads.
//!
//! The pool owns a FIFO work queue and a fixed set of worker threads that
//! block on it. Shutdown drops the queue sender: workers drain whatever is
//! still queued, then their `recv` disconnects and they exit.
//!
//! # Design
//!
//! - **No polling**: workers block on channel `recv`; result handles use a
//!   condvar slot.
//! - **Panic isolation**: a panicking job settles its handle and is counted
//!   as failed; the worker keeps running.
//! - **Duplicate suppression**: an optional policy that drops a submission
//!   whose identity is already queued or executing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::error::SchedulerError;
use super::job::{package, Job, TaskHandle};
use crate::config::SchedulerConfig;

/// A queued unit of work, tagged with the identity it was submitted under.
struct PooledJob {
    identity: Option<String>,
    job: Job,
}

/// Internal counters for pool statistics (lock-free atomics).
#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    queued: AtomicU64,
    active: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pool utilization and throughput.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Jobs accepted into the queue.
    pub submitted: u64,
    /// Jobs that ran to completion.
    pub completed: u64,
    /// Jobs whose callable panicked.
    pub failed: u64,
    /// Jobs dropped without executing (duplicate identity or stopped pool).
    pub rejected: u64,
    /// Jobs currently waiting in the queue.
    pub queued: u64,
    /// Jobs currently executing.
    pub active: u64,
}

/// State shared between the pool handle and its worker threads.
struct PoolShared {
    /// Identities queued or executing, with multiplicity. Maintained always,
    /// consulted only when duplicate suppression is enabled.
    active_ids: Mutex<HashMap<String, usize>>,
    duplicate_allowed: AtomicBool,
    counters: PoolCounters,
}

impl PoolShared {
    fn release_identity(&self, identity: &str) {
        let mut active = self.active_ids.lock();
        if let Some(count) = active.get_mut(identity) {
            *count -= 1;
            if *count == 0 {
                active.remove(identity);
            }
        }
    }
}

/// Fixed-size pool of worker threads draining a FIFO job queue.
///
/// Each submission returns a [`TaskHandle`] that resolves to the closure's
/// value, the panic it raised, or [`TaskError::Rejected`] if the job was
/// dropped before it could run.
///
/// [`TaskError::Rejected`]: super::error::TaskError::Rejected
pub struct TaskPool {
    shared: Arc<PoolShared>,
    /// Queue sender. `None` after stop; dropping it unblocks idle workers.
    queue_tx: Mutex<Option<Sender<PooledJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopping: AtomicBool,
    worker_count: usize,
}

impl TaskPool {
    /// Create a pool with `worker_count` threads, clamped to
    /// `[1, available parallelism]`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ThreadSpawn`] if a worker thread cannot be
    /// started; partially started workers are joined before returning.
    pub fn new(worker_count: usize) -> Result<Self, SchedulerError> {
        Self::spawn_workers(worker_count, None, true)
    }

    /// Create a pool from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] if validation fails, or
    /// [`SchedulerError::ThreadSpawn`] if a worker thread cannot be started.
    pub fn with_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        Self::spawn_workers(
            config.worker_count,
            config.worker_stack_size,
            config.duplicate_allowed,
        )
    }

    fn spawn_workers(
        requested: usize,
        stack_size: Option<usize>,
        duplicate_allowed: bool,
    ) -> Result<Self, SchedulerError> {
        let parallelism = num_cpus::get().max(1);
        let worker_count = requested.clamp(1, parallelism);

        let (queue_tx, queue_rx) = unbounded::<PooledJob>();
        let shared = Arc::new(PoolShared {
            active_ids: Mutex::new(HashMap::new()),
            duplicate_allowed: AtomicBool::new(duplicate_allowed),
            counters: PoolCounters::default(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let mut builder = thread::Builder::new().name(format!("chronos-worker-{worker_id}"));
            if let Some(bytes) = stack_size {
                builder = builder.stack_size(bytes);
            }
            let worker_rx = queue_rx.clone();
            let worker_shared = Arc::clone(&shared);
            match builder.spawn(move || worker_loop(worker_id, &worker_rx, &worker_shared)) {
                Ok(handle) => workers.push(handle),
                Err(spawn_err) => {
                    // Unwind partially started workers before propagating.
                    drop(queue_tx);
                    drop(queue_rx);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(SchedulerError::ThreadSpawn(spawn_err));
                }
            }
        }

        info!(worker_count, requested, "task pool started");

        Ok(Self {
            shared,
            queue_tx: Mutex::new(Some(queue_tx)),
            workers: Mutex::new(workers),
            stopping: AtomicBool::new(false),
            worker_count,
        })
    }

    /// Submit a closure for execution on the next free worker.
    pub fn run<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, handle) = package(f);
        self.submit(None, job);
        handle
    }

    /// Submit a closure under an identity.
    ///
    /// With duplicate suppression enabled, the submission is dropped (handle
    /// resolves rejected) if `identity` is already queued or executing.
    pub fn run_tagged<F, T>(&self, identity: impl Into<String>, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, handle) = package(f);
        self.submit(Some(identity.into()), job);
        handle
    }

    /// Enqueue a packaged job. Returns whether it was accepted; a refused
    /// job is dropped here, which settles its handle as rejected.
    pub(crate) fn submit(&self, identity: Option<String>, job: Job) -> bool {
        let tx_guard = self.queue_tx.lock();
        let Some(queue_tx) = tx_guard.as_ref() else {
            self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!("job dropped: pool stopped");
            return false;
        };
        if self.stopping.load(Ordering::Acquire) {
            self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!("job dropped: pool stopping");
            return false;
        }

        if let Some(id) = identity.as_deref() {
            let mut active = self.shared.active_ids.lock();
            if !self.shared.duplicate_allowed.load(Ordering::Relaxed)
                && active.contains_key(id)
            {
                drop(active);
                self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(identity = id, "job dropped: duplicate identity");
                return false;
            }
            *active.entry(id.to_string()).or_insert(0) += 1;
        }

        match queue_tx.send(PooledJob { identity, job }) {
            Ok(()) => {
                self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
                self.shared.counters.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(send_err) => {
                // Disconnected: every worker has exited. Roll back the
                // identity reservation; the job inside the error settles
                // its handle as rejected when dropped.
                let refused = send_err.0;
                if let Some(id) = refused.identity.as_deref() {
                    self.shared.release_identity(id);
                }
                self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Whether `identity` is currently queued or executing.
    #[must_use]
    pub fn is_identity_active(&self, identity: &str) -> bool {
        self.shared.active_ids.lock().contains_key(identity)
    }

    /// Set whether two pending/executing jobs may share an identity.
    pub fn set_duplicate_allowed(&self, allowed: bool) {
        self.shared
            .duplicate_allowed
            .store(allowed, Ordering::Relaxed);
    }

    /// Whether duplicate identities are currently allowed.
    #[must_use]
    pub fn duplicate_allowed(&self) -> bool {
        self.shared.duplicate_allowed.load(Ordering::Relaxed)
    }

    /// Number of worker threads serving the queue.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Snapshot of the pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot(self.worker_count)
    }

    /// Stop the pool: refuse new work, drain the queue, join all workers.
    ///
    /// Idempotent; later calls return immediately.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("stopping task pool");
        {
            *self.queue_tx.lock() = None;
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
        debug!("task pool stopped");
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(worker_id: usize, queue: &Receiver<PooledJob>, shared: &PoolShared) {
    debug!(worker_id, "worker thread started");
    while let Ok(pooled) = queue.recv() {
        shared.counters.queued.fetch_sub(1, Ordering::Relaxed);
        shared.counters.active.fetch_add(1, Ordering::Relaxed);

        let PooledJob { identity, job } = pooled;
        match job.invoke() {
            None => {
                shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Some(message) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker_id, panic = %message, "job panicked; worker continuing");
            }
        }

        shared.counters.active.fetch_sub(1, Ordering::Relaxed);
        if let Some(id) = identity.as_deref() {
            shared.release_identity(id);
        }
    }
    debug!(worker_id, "worker thread exiting");
}
