//! Timer-driven scheduler: a time-ordered registry of pending entries and a
//! single dispatcher thread that hands due work to the task pool.
//!
//! The registry is an ordered multimap keyed by due time, guarded by one
//! mutex. The dispatcher sleeps on a condvar until the earliest due time (or
//! indefinitely while the registry is empty) and is woken early by new
//! submissions and by shutdown. A dispatch pass pops every bucket with
//! `due <= now`, submits the enabled entries to the pool tagged with their
//! identity, and reinserts recurring entries at their next occurrence.
//!
//! Recurring entries reschedule drift-correctingly: the next due time is
//! found by stepping the interval from the original due time until it
//! exceeds `now`, so a stall produces at most one catch-up execution rather
//! than a burst of missed ticks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::error::SchedulerError;
use super::job::{package, package_repeating, Job, TaskHandle};
use super::task_pool::{PoolStats, TaskPool};
use crate::config::SchedulerConfig;

/// Scheduler lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

/// The callable owned by a registry entry.
enum Work {
    /// One-shot job, packaged with its handle at submission time. Moved out
    /// on dispatch.
    Once(Job),
    /// Recurring callable; each dispatch packages a fresh occurrence.
    Every(Arc<dyn Fn() + Send + Sync>),
}

/// A pending registry entry: callable plus the metadata needed to manage it
/// and to build its next occurrence.
struct Entry {
    work: Work,
    identity: Option<String>,
    enabled: bool,
    interval: Option<Duration>,
    /// First due time; preserves recurrence phase for `update_interval`.
    anchor: Instant,
}

struct RegistryState {
    entries: BTreeMap<Instant, Vec<Entry>>,
    phase: Phase,
}

impl RegistryState {
    fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    fn find(&self, identity: &str) -> Option<&Entry> {
        self.entries
            .values()
            .flat_map(|bucket| bucket.iter())
            .find(|entry| entry.identity.as_deref() == Some(identity))
    }

    fn find_mut(&mut self, identity: &str) -> Option<&mut Entry> {
        self.entries
            .values_mut()
            .flat_map(|bucket| bucket.iter_mut())
            .find(|entry| entry.identity.as_deref() == Some(identity))
    }

    /// Locate the first entry with `identity` as `(due, index)`.
    fn locate(&self, identity: &str) -> Option<(Instant, usize)> {
        self.entries.iter().find_map(|(due, bucket)| {
            bucket
                .iter()
                .position(|entry| entry.identity.as_deref() == Some(identity))
                .map(|index| (*due, index))
        })
    }

    /// Remove the entry at `(due, index)`, dropping its bucket if emptied.
    fn take(&mut self, due: Instant, index: usize) -> Option<Entry> {
        let bucket = self.entries.get_mut(&due)?;
        if index >= bucket.len() {
            return None;
        }
        let entry = bucket.remove(index);
        if bucket.is_empty() {
            self.entries.remove(&due);
        }
        Some(entry)
    }

    fn insert(&mut self, due: Instant, entry: Entry) {
        self.entries.entry(due).or_default().push(entry);
    }
}

struct SchedulerInner {
    state: Mutex<RegistryState>,
    wakeup: Condvar,
}

/// Embeddable task scheduler: submit closures to run at an absolute time,
/// after a delay, or on a fixed interval.
///
/// Lifecycle: created idle, `start()` spawns the dispatcher thread, `stop()`
/// discards all pending entries and joins every thread (terminal; dropping a
/// running scheduler stops it). Submissions made before `start()` are held in
/// the registry and dispatched once running; submissions after `stop()` are
/// silently dropped and their handles resolve rejected.
///
/// Tasks that reschedule themselves should capture a shared handle to the
/// scheduler rather than reaching for ambient state:
///
/// ```rust,ignore
/// let scheduler = Arc::new(Scheduler::new(2)?);
/// scheduler.start()?;
/// let again = Arc::clone(&scheduler);
/// scheduler.after(Duration::from_secs(1), move || {
///     again.after(Duration::from_secs(1), || tracing::info!("and again"));
/// });
/// ```
pub struct Scheduler {
    pool: Arc<TaskPool>,
    inner: Arc<SchedulerInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler backed by a pool of `worker_count` threads
    /// (clamped to `[1, available parallelism]`). The dispatcher does not
    /// run until [`start`](Self::start) is called.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ThreadSpawn`] if a worker thread cannot be
    /// started.
    pub fn new(worker_count: usize) -> Result<Self, SchedulerError> {
        Ok(Self::from_pool(TaskPool::new(worker_count)?))
    }

    /// Create a scheduler from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] or
    /// [`SchedulerError::ThreadSpawn`].
    pub fn with_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        Ok(Self::from_pool(TaskPool::with_config(config)?))
    }

    fn from_pool(pool: TaskPool) -> Self {
        Self {
            pool: Arc::new(pool),
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(RegistryState {
                    entries: BTreeMap::new(),
                    phase: Phase::Created,
                }),
                wakeup: Condvar::new(),
            }),
            dispatcher: Mutex::new(None),
        }
    }

    /// Start the dispatcher thread. A no-op if already running or stopped.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ThreadSpawn`] if the dispatcher thread
    /// cannot be started; the scheduler stays in its created state.
    pub fn start(&self) -> Result<(), SchedulerError> {
        {
            let mut state = self.inner.state.lock();
            match state.phase {
                Phase::Created => state.phase = Phase::Running,
                Phase::Running | Phase::Stopped => return Ok(()),
            }
        }

        let inner = Arc::clone(&self.inner);
        let pool = Arc::clone(&self.pool);
        let spawned = thread::Builder::new()
            .name("chronos-dispatcher".into())
            .spawn(move || dispatcher_loop(&inner, &pool));
        match spawned {
            Ok(handle) => {
                *self.dispatcher.lock() = Some(handle);
                info!("scheduler started");
                Ok(())
            }
            Err(spawn_err) => {
                self.inner.state.lock().phase = Phase::Created;
                Err(SchedulerError::ThreadSpawn(spawn_err))
            }
        }
    }

    /// Stop the scheduler: discard every pending entry un-run, join the
    /// dispatcher, then stop the pool (draining already-queued jobs).
    ///
    /// Terminal and idempotent. Pending one-shot handles resolve rejected.
    pub fn stop(&self) {
        let (newly_stopped, discarded) = {
            let mut state = self.inner.state.lock();
            let first = state.phase != Phase::Stopped;
            state.phase = Phase::Stopped;
            let drained = std::mem::take(&mut state.entries);
            (first, drained)
        };
        self.inner.wakeup.notify_all();

        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked during shutdown");
            }
        }
        self.pool.stop();

        let discarded_count: usize = discarded.values().map(Vec::len).sum();
        // Dropping the entries settles their handles outside the registry lock.
        drop(discarded);
        if newly_stopped {
            info!(discarded = discarded_count, "scheduler stopped");
        }
    }

    /// Schedule a one-shot closure at an absolute time.
    pub fn at<F, T>(&self, when: Instant, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, handle) = package(f);
        self.insert_entry(when, Entry {
            work: Work::Once(job),
            identity: None,
            enabled: true,
            interval: None,
            anchor: when,
        });
        handle
    }

    /// Schedule a one-shot closure at an absolute time, under an identity.
    pub fn at_with_id<F, T>(
        &self,
        identity: impl Into<String>,
        when: Instant,
        f: F,
    ) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (job, handle) = package(f);
        self.insert_entry(when, Entry {
            work: Work::Once(job),
            identity: Some(identity.into()),
            enabled: true,
            interval: None,
            anchor: when,
        });
        handle
    }

    /// Schedule a one-shot closure after a delay.
    pub fn after<F, T>(&self, delay: Duration, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.at(Instant::now() + delay, f)
    }

    /// Schedule a one-shot closure after a delay, under an identity.
    pub fn after_with_id<F, T>(
        &self,
        identity: impl Into<String>,
        delay: Duration,
        f: F,
    ) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.at_with_id(identity, Instant::now() + delay, f)
    }

    /// Schedule a recurring closure. Fire-and-forget: no handle.
    ///
    /// The first fire is one interval after submission. Zero intervals are
    /// refused.
    pub fn every<F>(&self, interval: Duration, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.submit_recurring(None, interval, Arc::new(f));
    }

    /// Schedule a recurring closure under an identity, making it manageable
    /// via [`set_enabled`](Self::set_enabled),
    /// [`update_interval`](Self::update_interval), and
    /// [`remove_task`](Self::remove_task).
    pub fn every_with_id<F>(&self, identity: impl Into<String>, interval: Duration, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.submit_recurring(Some(identity.into()), interval, Arc::new(f));
    }

    fn submit_recurring(
        &self,
        identity: Option<String>,
        interval: Duration,
        callable: Arc<dyn Fn() + Send + Sync>,
    ) {
        if interval.is_zero() {
            warn!("recurring submission dropped: zero interval");
            return;
        }
        let first = Instant::now() + interval;
        self.insert_entry(first, Entry {
            work: Work::Every(callable),
            identity,
            enabled: true,
            interval: Some(interval),
            anchor: first,
        });
    }

    fn insert_entry(&self, due: Instant, entry: Entry) {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Stopped {
            debug!("submission dropped: scheduler stopped");
            return;
        }
        if let Some(id) = entry.identity.as_deref() {
            if !self.pool.duplicate_allowed()
                && (state.find(id).is_some() || self.pool.is_identity_active(id))
            {
                debug!(identity = id, "submission dropped: duplicate identity");
                return;
            }
        }
        state.insert(due, entry);
        drop(state);
        self.inner.wakeup.notify_one();
    }

    /// Whether an entry with `identity` exists in the registry.
    #[must_use]
    pub fn is_scheduled(&self, identity: &str) -> bool {
        self.inner.state.lock().find(identity).is_some()
    }

    /// Whether the entry with `identity` is enabled. `false` if not found.
    #[must_use]
    pub fn is_enabled(&self, identity: &str) -> bool {
        self.inner
            .state
            .lock()
            .find(identity)
            .is_some_and(|entry| entry.enabled)
    }

    /// Enable or disable the entry with `identity`.
    ///
    /// A disabled entry reaching its due time is skipped, not executed; if
    /// recurring it still advances to its next occurrence. Returns `false`
    /// if the identity is not found.
    pub fn set_enabled(&self, identity: &str, enabled: bool) -> bool {
        match self.inner.state.lock().find_mut(identity) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Remove the first entry with `identity` from the registry.
    ///
    /// Prevents every future dispatch; an execution already handed to a
    /// worker still completes. Returns `false` if the identity is not found.
    pub fn remove_task(&self, identity: &str) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            let Some((due, index)) = state.locate(identity) else {
                return false;
            };
            state.take(due, index)
        };
        // Dropped outside the lock; a pending one-shot handle resolves rejected.
        drop(removed);
        debug!(identity, "task removed");
        true
    }

    /// Change the recurrence interval of the entry with `identity`.
    ///
    /// The next fire time is re-phased from the entry's first due time: the
    /// first `anchor + k * interval` strictly in the future. Never executes
    /// the task as a side effect. Returns `false` for unknown identities,
    /// one-shot entries, and zero intervals.
    pub fn update_interval(&self, identity: &str, interval: Duration) -> bool {
        if interval.is_zero() {
            return false;
        }
        let mut state = self.inner.state.lock();
        let Some((due, index)) = state.locate(identity) else {
            return false;
        };
        let recurring = state
            .entries
            .get(&due)
            .and_then(|bucket| bucket.get(index))
            .is_some_and(|entry| entry.interval.is_some());
        if !recurring {
            return false;
        }
        let Some(mut entry) = state.take(due, index) else {
            return false;
        };
        entry.interval = Some(interval);
        let now = Instant::now();
        let mut next = entry.anchor;
        while next <= now {
            next += interval;
        }
        state.insert(next, entry);
        drop(state);
        // The new due time may be earlier than the one the dispatcher is
        // sleeping toward.
        self.inner.wakeup.notify_one();
        debug!(identity, interval_ms = interval.as_millis() as u64, "interval updated");
        true
    }

    /// Number of entries currently in the registry.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.state.lock().len()
    }

    /// Set whether two pending/executing tasks may share an identity.
    ///
    /// With duplicates disallowed, a submission whose identity is already in
    /// the registry or active in the pool is silently rejected, and the pool
    /// drops a dispatched occurrence whose identity is still executing.
    pub fn set_duplicate_allowed(&self, allowed: bool) {
        self.pool.set_duplicate_allowed(allowed);
    }

    /// Snapshot of the underlying pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatcher_loop(inner: &SchedulerInner, pool: &TaskPool) {
    debug!("dispatcher thread started");
    let mut state = inner.state.lock();
    loop {
        if state.phase != Phase::Running {
            break;
        }
        let now = Instant::now();
        match state.entries.keys().next().copied() {
            None => inner.wakeup.wait(&mut state),
            Some(due) if due > now => {
                let _ = inner.wakeup.wait_until(&mut state, due);
            }
            Some(_) => dispatch_ready(&mut state, pool, now),
        }
    }
    debug!("dispatcher thread exiting");
}

/// One dispatch pass: pop every bucket due at or before `now`, hand enabled
/// entries to the pool, reinsert recurring entries at their next occurrence.
///
/// Runs under the registry lock; the pool enqueue is non-blocking.
fn dispatch_ready(state: &mut RegistryState, pool: &TaskPool, now: Instant) {
    let mut ready = Vec::new();
    while let Some((due, _)) = state.entries.first_key_value() {
        if *due > now {
            break;
        }
        if let Some((due, bucket)) = state.entries.pop_first() {
            ready.extend(bucket.into_iter().map(|entry| (due, entry)));
        }
    }

    let dispatched = ready.len();
    for (due, entry) in ready {
        let Entry {
            work,
            identity,
            enabled,
            interval,
            anchor,
        } = entry;
        match work {
            Work::Once(job) => {
                if enabled {
                    pool.submit(identity, job);
                }
                // A disabled one-shot is discarded; dropping the job settles
                // its handle as rejected.
            }
            Work::Every(callable) => {
                if enabled {
                    pool.submit(identity.clone(), package_repeating(&callable));
                }
                if let Some(interval) = interval {
                    // Drift correction: step from the original due time past
                    // `now`; missed ticks are skipped, not queued.
                    let mut next = due;
                    while next <= now {
                        next += interval;
                    }
                    state.insert(next, Entry {
                        work: Work::Every(callable),
                        identity,
                        enabled,
                        interval: Some(interval),
                        anchor,
                    });
                }
            }
        }
    }
    if dispatched > 0 {
        debug!(dispatched, "dispatch pass complete");
    }
}
