//! Integration tests for `Scheduler`.
//!
//! Scenario coverage:
//! - Timing lower bound for one-shot work
//! - Recurrence, re-pacing, and drift behavior
//! - Identity-based management: query, enable/disable, removal
//! - Duplicate suppression at submission and at dispatch
//! - Lifecycle: submissions before start, stop discarding pending work,
//!   idempotent stop
//!
//! Timings use generous margins; assertions bound counts loosely enough to
//! survive slow CI machines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use prometheus_chronos::core::{Scheduler, TaskError};

/// Scheduling-resolution slack for lower-bound assertions.
const EPSILON: Duration = Duration::from_millis(5);

fn started(workers: usize) -> Scheduler {
    let scheduler = Scheduler::new(workers).expect("scheduler starts");
    scheduler.start().expect("dispatcher starts");
    scheduler
}

fn counting() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + Clone + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let probe = Arc::clone(&count);
    (count, move || {
        probe.fetch_add(1, Ordering::SeqCst);
    })
}

fn sleep(duration: Duration) {
    std::thread::sleep(duration);
}

#[test]
fn at_with_id_fires_exactly_once() {
    let scheduler = started(2);
    let (count, task) = counting();

    scheduler.at_with_id("t1", Instant::now() + Duration::from_millis(200), task);

    sleep(Duration::from_millis(80));
    assert!(scheduler.is_scheduled("t1"));
    assert_eq!(count.load(Ordering::SeqCst), 0, "fired before due time");

    sleep(Duration::from_millis(420));
    assert!(!scheduler.is_scheduled("t1"));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    scheduler.stop();
}

#[test]
fn after_respects_timing_lower_bound() {
    let scheduler = started(2);
    let delay = Duration::from_millis(150);

    let submitted_at = Instant::now();
    let handle = scheduler.after(delay, Instant::now);
    let fired_at = handle
        .wait_timeout(Duration::from_secs(5))
        .expect("task fired");

    assert!(
        fired_at.duration_since(submitted_at) + EPSILON >= delay,
        "fired {:?} after submission, expected at least {:?}",
        fired_at.duration_since(submitted_at),
        delay
    );
    scheduler.stop();
}

#[test]
fn every_recurs_until_stopped() {
    let scheduler = started(2);
    let (count, task) = counting();

    scheduler.every_with_id("t2", Duration::from_millis(50), task);

    sleep(Duration::from_millis(280));
    assert!(count.load(Ordering::SeqCst) >= 3);
    assert!(scheduler.is_scheduled("t2"));
    scheduler.stop();
}

#[test]
fn recurring_count_is_bounded_by_elapsed_time() {
    let scheduler = started(2);
    let (count, task) = counting();

    scheduler.every_with_id("bounded", Duration::from_millis(50), task);
    sleep(Duration::from_millis(520));
    scheduler.stop();

    // 520ms at a 50ms cadence can produce at most ~10 fires; drift
    // correction must never produce a catch-up burst beyond that.
    let fired = count.load(Ordering::SeqCst);
    println!("fires observed: {fired}");
    assert!(fired <= 12, "burst detected: {fired} fires");
    assert!(fired >= 5, "too few fires: {fired}");
}

#[test]
fn remove_pending_task_prevents_execution() {
    let scheduler = started(2);
    let (count, task) = counting();

    let handle = scheduler.after_with_id("t3", Duration::from_millis(300), task);
    assert!(scheduler.is_scheduled("t3"));

    assert!(scheduler.remove_task("t3"));
    assert!(!scheduler.is_scheduled("t3"));

    // The discarded entry resolves its handle instead of leaving it pending.
    assert_eq!(
        handle.wait_timeout(Duration::from_secs(2)),
        Err(TaskError::Rejected)
    );

    sleep(Duration::from_millis(400));
    assert_eq!(count.load(Ordering::SeqCst), 0, "removed task executed");
    scheduler.stop();
}

#[test]
fn remove_recurring_task_stops_future_fires() {
    let scheduler = started(2);
    let (count, task) = counting();

    scheduler.every_with_id("t2", Duration::from_millis(40), task);
    sleep(Duration::from_millis(150));

    assert!(scheduler.remove_task("t2"));
    assert!(!scheduler.is_scheduled("t2"));

    // Let any already-dispatched occurrence settle, then snapshot.
    sleep(Duration::from_millis(80));
    let after_removal = count.load(Ordering::SeqCst);
    sleep(Duration::from_millis(250));
    assert_eq!(count.load(Ordering::SeqCst), after_removal);
    scheduler.stop();
}

#[test]
fn enable_disable_round_trip() {
    let scheduler = started(2);
    let (count, task) = counting();

    scheduler.every_with_id("beat", Duration::from_millis(80), task);

    assert!(scheduler.set_enabled("beat", false));
    assert!(!scheduler.is_enabled("beat"));

    // Disabled entries are skipped at their due time but keep advancing.
    sleep(Duration::from_millis(300));
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(scheduler.is_scheduled("beat"));

    assert!(scheduler.set_enabled("beat", true));
    assert!(scheduler.is_enabled("beat"));
    sleep(Duration::from_millis(300));
    assert!(count.load(Ordering::SeqCst) >= 1);
    scheduler.stop();
}

#[test]
fn disabled_one_shot_is_skipped_and_discarded() {
    let scheduler = started(2);
    let (count, task) = counting();

    let handle = scheduler.after_with_id("once", Duration::from_millis(100), task);
    assert!(scheduler.set_enabled("once", false));

    sleep(Duration::from_millis(300));
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(!scheduler.is_scheduled("once"));
    assert_eq!(
        handle.wait_timeout(Duration::from_secs(2)),
        Err(TaskError::Rejected)
    );
    scheduler.stop();
}

#[test]
fn duplicate_suppression_keeps_single_entry() {
    let scheduler = started(2);
    let (count, task) = counting();
    scheduler.set_duplicate_allowed(false);

    let due = Instant::now() + Duration::from_millis(250);
    let first = scheduler.at_with_id("dup", due, task.clone());
    let second = scheduler.at_with_id("dup", due, task);

    assert_eq!(scheduler.size(), 1);
    assert!(scheduler.is_scheduled("dup"));
    assert_eq!(
        second.wait_timeout(Duration::from_secs(2)),
        Err(TaskError::Rejected)
    );

    first
        .wait_timeout(Duration::from_secs(5))
        .expect("surviving entry fired");
    assert_eq!(count.load(Ordering::SeqCst), 1);
    scheduler.stop();
}

#[test]
fn update_interval_changes_pacing() {
    let scheduler = started(2);
    let (count, task) = counting();

    scheduler.every_with_id("pace", Duration::from_millis(40), task);
    sleep(Duration::from_millis(150));
    assert!(count.load(Ordering::SeqCst) >= 2);

    assert!(scheduler.update_interval("pace", Duration::from_millis(200)));
    count.store(0, Ordering::SeqCst);

    sleep(Duration::from_millis(500));
    let repaced = count.load(Ordering::SeqCst);
    println!("fires after re-pacing: {repaced}");
    assert!((1..=4).contains(&repaced), "unexpected cadence: {repaced}");
    scheduler.stop();
}

#[test]
fn update_interval_rejects_ineligible_entries() {
    let scheduler = started(2);
    let (_count, task) = counting();

    assert!(!scheduler.update_interval("missing", Duration::from_millis(100)));

    scheduler.after_with_id("one_shot", Duration::from_secs(5), task.clone());
    assert!(!scheduler.update_interval("one_shot", Duration::from_millis(100)));

    scheduler.every_with_id("recurring", Duration::from_secs(5), task);
    assert!(!scheduler.update_interval("recurring", Duration::ZERO));
    assert!(scheduler.update_interval("recurring", Duration::from_secs(2)));
    scheduler.stop();
}

#[test]
fn stop_discards_pending_entries() {
    let scheduler = started(2);
    let (count, task) = counting();

    let handles: Vec<_> = (0..5)
        .map(|n| {
            scheduler.after_with_id(format!("far-{n}"), Duration::from_secs(10), task.clone())
        })
        .collect();
    assert_eq!(scheduler.size(), 5);

    scheduler.stop();
    assert_eq!(scheduler.size(), 0);
    assert_eq!(count.load(Ordering::SeqCst), 0, "discarded entry executed");
    for handle in handles {
        assert_eq!(
            handle.wait_timeout(Duration::from_secs(2)),
            Err(TaskError::Rejected)
        );
    }
}

#[test]
fn stop_is_idempotent() {
    let scheduler = started(2);
    scheduler.every_with_id("beat", Duration::from_millis(20), || {});
    sleep(Duration::from_millis(60));
    scheduler.stop();
    scheduler.stop();
    drop(scheduler);
}

#[test]
fn submissions_after_stop_are_dropped() {
    let scheduler = started(2);
    let (count, task) = counting();
    scheduler.stop();

    let handle = scheduler.after_with_id("late", Duration::from_millis(20), task);
    scheduler.every_with_id("late_recurring", Duration::from_millis(20), || {});

    assert_eq!(scheduler.size(), 0);
    assert!(!scheduler.is_scheduled("late"));
    assert!(!scheduler.is_scheduled("late_recurring"));
    assert_eq!(handle.wait(), Err(TaskError::Rejected));
    sleep(Duration::from_millis(100));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn submissions_before_start_are_held() {
    let scheduler = Scheduler::new(2).expect("scheduler starts");
    let (count, task) = counting();

    scheduler.after_with_id("early", Duration::from_millis(50), task);
    sleep(Duration::from_millis(200));
    assert!(scheduler.is_scheduled("early"));
    assert_eq!(count.load(Ordering::SeqCst), 0, "fired without a dispatcher");

    scheduler.start().expect("dispatcher starts");
    sleep(Duration::from_millis(250));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    scheduler.stop();
}

#[test]
fn overlapping_occurrences_suppressed_when_duplicates_disallowed() {
    let scheduler = started(2);
    let (count, task) = counting();
    scheduler.set_duplicate_allowed(false);

    // Each occurrence outlives several intervals; suppression must keep a
    // single execution in flight instead of stacking them up.
    scheduler.every_with_id("busy", Duration::from_millis(40), move || {
        task();
        sleep(Duration::from_millis(300));
    });

    sleep(Duration::from_millis(650));
    scheduler.stop();

    let fired = count.load(Ordering::SeqCst);
    println!("overlapping fires observed: {fired}");
    assert!((1..=3).contains(&fired), "suppression failed: {fired}");
}

#[test]
fn management_ops_on_missing_identity_return_false() {
    let scheduler = started(2);
    assert!(!scheduler.is_scheduled("missing"));
    assert!(!scheduler.is_enabled("missing"));
    assert!(!scheduler.set_enabled("missing", true));
    assert!(!scheduler.remove_task("missing"));
    scheduler.stop();
}

#[test]
fn anonymous_entries_are_invisible_to_management() {
    let scheduler = started(2);
    let (_count, task) = counting();

    scheduler.after(Duration::from_secs(5), task);
    assert_eq!(scheduler.size(), 1);
    assert!(!scheduler.is_scheduled(""));
    scheduler.stop();
}

#[test]
fn tasks_can_reschedule_themselves_via_shared_handle() {
    fn schedule_chain(scheduler: &Arc<Scheduler>, count: &Arc<AtomicUsize>, remaining: usize) {
        if remaining == 0 {
            return;
        }
        let next_scheduler = Arc::clone(scheduler);
        let next_count = Arc::clone(count);
        scheduler.after(Duration::from_millis(30), move || {
            next_count.fetch_add(1, Ordering::SeqCst);
            schedule_chain(&next_scheduler, &next_count, remaining - 1);
        });
    }

    let scheduler = Arc::new(started(2));
    let count = Arc::new(AtomicUsize::new(0));

    schedule_chain(&scheduler, &count, 3);
    sleep(Duration::from_millis(500));
    assert_eq!(count.load(Ordering::SeqCst), 3);
    scheduler.stop();
}

#[cfg(feature = "tokio-runtime")]
#[tokio::test]
async fn handles_awaitable_from_async_context() {
    let scheduler = started(2);
    let handles = vec![
        scheduler.after(Duration::from_millis(30), || 1),
        scheduler.after(Duration::from_millis(60), || 2),
    ];

    let outcomes = futures::future::join_all(
        handles
            .into_iter()
            .map(|handle| handle.wait_timeout_async(Duration::from_secs(5))),
    )
    .await;

    assert_eq!(outcomes, vec![Ok(1), Ok(2)]);
    scheduler.stop();
}
