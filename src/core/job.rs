//! Type-erased units of work and the handles used to observe their outcomes.
//!
//! A [`Job`] is the atom of execution: a move-only, boxed nullary callable
//! invoked at most once on a worker thread. Packaging a user closure pairs it
//! with a completion slot so the closure's return value, or the panic it
//! raised, is captured into the caller's [`TaskHandle`].
//!
//! The slot is a `parking_lot` mutex + condvar pair: waiters block without
//! polling and are notified exactly when the outcome lands. A packaged job
//! that is dropped without ever running settles its slot with
//! [`TaskError::Rejected`], so no handle can be left pending forever.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::error::TaskError;

/// Outcome slot state.
enum Slot<T> {
    /// No outcome yet; the job is queued or executing.
    Pending,
    /// Outcome available, not yet taken by a waiter.
    Ready(Result<T, TaskError>),
    /// Outcome already consumed.
    Taken,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Caller-facing handle to the outcome of a submitted unit of work.
///
/// The outcome is consumed at most once: the first successful `wait`/`try_take`
/// takes it, later calls report [`TaskError::Consumed`]. A handle whose job is
/// dropped before executing resolves to [`TaskError::Rejected`].
pub struct TaskHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> TaskHandle<T> {
    /// Whether an outcome has been produced (or the job was rejected).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !matches!(*self.shared.slot.lock(), Slot::Pending)
    }

    /// Take the outcome if it is already available, without blocking.
    ///
    /// Returns `None` while the job is still queued or executing.
    pub fn try_take(&self) -> Option<Result<T, TaskError>> {
        let mut slot = self.shared.slot.lock();
        match *slot {
            Slot::Pending => None,
            Slot::Taken => Some(Err(TaskError::Consumed)),
            Slot::Ready(_) => match std::mem::replace(&mut *slot, Slot::Taken) {
                Slot::Ready(outcome) => Some(outcome),
                _ => Some(Err(TaskError::Consumed)),
            },
        }
    }

    /// Block until the job produces an outcome, then take it.
    pub fn wait(&self) -> Result<T, TaskError> {
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.shared.ready.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(outcome) => outcome,
            _ => Err(TaskError::Consumed),
        }
    }

    /// Block until the job produces an outcome or `timeout` elapses.
    ///
    /// Returns [`TaskError::Timeout`] if the deadline passes first; the job
    /// keeps running and a later wait can still observe its outcome.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if self.shared.ready.wait_until(&mut slot, deadline).timed_out()
                && matches!(*slot, Slot::Pending)
            {
                return Err(TaskError::Timeout);
            }
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(outcome) => outcome,
            _ => Err(TaskError::Consumed),
        }
    }
}

#[cfg(feature = "tokio-runtime")]
impl<T: Send + 'static> TaskHandle<T> {
    /// Await the job's outcome from an async context.
    ///
    /// The blocking wait runs on tokio's blocking thread pool so the async
    /// runtime is never stalled.
    pub async fn wait_timeout_async(self, timeout: Duration) -> Result<T, TaskError> {
        match tokio::task::spawn_blocking(move || self.wait_timeout(timeout)).await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(TaskError::Panicked(join_err.to_string())),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Completion side of a handle. Settling is one-shot; dropping an unsettled
/// completion resolves the handle as rejected.
struct Completion<T> {
    shared: Arc<Shared<T>>,
    settled: bool,
}

impl<T> Completion<T> {
    fn settle(&mut self, outcome: Result<T, TaskError>) {
        if self.settled {
            return;
        }
        self.settled = true;
        let mut slot = self.shared.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Ready(outcome);
            self.shared.ready.notify_all();
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        self.settle(Err(TaskError::Rejected));
    }
}

fn handle_pair<T>() -> (Completion<T>, TaskHandle<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Pending),
        ready: Condvar::new(),
    });
    (
        Completion {
            shared: Arc::clone(&shared),
            settled: false,
        },
        TaskHandle { shared },
    )
}

/// A move-only, type-erased unit of work. Invoked at most once.
pub(crate) struct Job {
    run: Box<dyn FnOnce() -> Option<String> + Send>,
}

impl Job {
    /// Run the job. Returns the panic message if the callable panicked;
    /// the panic never escapes into the calling worker.
    pub(crate) fn invoke(self) -> Option<String> {
        (self.run)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Job")
    }
}

/// Package a one-shot closure with a fresh handle.
///
/// The returned job captures the closure's value or panic into the handle.
pub(crate) fn package<F, T>(f: F) -> (Job, TaskHandle<T>)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (mut completion, handle) = handle_pair();
    let run = Box::new(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => {
            completion.settle(Ok(value));
            None
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            completion.settle(Err(TaskError::Panicked(message.clone())));
            Some(message)
        }
    });
    (Job { run }, handle)
}

/// Package one occurrence of a recurring callable. No handle: recurring
/// submissions are fire-and-forget.
pub(crate) fn package_repeating(callable: &Arc<dyn Fn() + Send + Sync>) -> Job {
    let callable = Arc::clone(callable);
    let run = Box::new(
        move || match panic::catch_unwind(AssertUnwindSafe(move || callable())) {
            Ok(()) => None,
            Err(payload) => Some(panic_message(payload.as_ref())),
        },
    );
    Job { run }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
