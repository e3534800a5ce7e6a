//! Scheduling rules of the priority-mode limiter: class precedence,
//! upgrades of pending items, repeat discards and the double-run contract.

use slotq::{Admission, Priority, PriorityLimiter, WorkItem, create_priority_limiter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

fn recording(log: &Log, label: &str) -> WorkItem {
    let log = Arc::clone(log);
    let label = label.to_string();
    WorkItem::new(move || log.lock().unwrap().push(label.clone()))
}

fn ran(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn drain(done: &slotq::Completion, limiter: &PriorityLimiter) {
    while limiter.stats().running > 0 {
        done.done();
    }
}

// ---------------------------------------------------------------------------
// Class precedence
// ---------------------------------------------------------------------------

#[test]
fn high_queue_drains_before_low_queue() {
    let (limiter, done) = create_priority_limiter(1);
    let log = Log::default();

    for n in 0..3 {
        limiter.enqueue_low(recording(&log, &format!("low-{n}")));
    }
    for n in 0..3 {
        limiter.enqueue_high(recording(&log, &format!("high-{n}")));
    }

    // The first low item took the slot and is not preempted.
    assert_eq!(ran(&log), ["low-0"]);
    let stats = limiter.stats();
    assert_eq!(stats.pending_low, 2);
    assert_eq!(stats.pending_high, 3);

    drain(&done, &limiter);

    assert_eq!(
        ran(&log),
        ["low-0", "high-0", "high-1", "high-2", "low-1", "low-2"]
    );
}

#[test]
fn high_item_with_free_slot_starts_immediately() {
    let (limiter, _done) = create_priority_limiter(2);
    let log = Log::default();

    assert_eq!(limiter.enqueue_low(recording(&log, "low")), Admission::Started);
    assert_eq!(
        limiter.enqueue_high(recording(&log, "high")),
        Admission::Started
    );
    assert_eq!(ran(&log), ["low", "high"]);
}

#[test]
fn enqueue_accepts_bool_style_priority() {
    let (limiter, done) = create_priority_limiter(1);
    let log = Log::default();

    limiter.enqueue(recording(&log, "first"), false.into());
    limiter.enqueue(recording(&log, "low"), Priority::from(false));
    limiter.enqueue(recording(&log, "high"), Priority::from(true));
    drain(&done, &limiter);

    assert_eq!(ran(&log), ["first", "high", "low"]);
}

// ---------------------------------------------------------------------------
// Upgrades
// ---------------------------------------------------------------------------

#[test]
fn upgrade_moves_pending_item_ahead() {
    let (limiter, done) = create_priority_limiter(1);
    let log = Log::default();

    let items: Vec<WorkItem> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|label| recording(&log, label))
        .collect();
    for item in &items {
        limiter.enqueue_low(item.clone());
    }

    assert_eq!(limiter.enqueue_high(items[4].clone()), Admission::Queued);
    let stats = limiter.stats();
    assert_eq!(stats.pending_low, 3);
    assert_eq!(stats.pending_high, 1);

    drain(&done, &limiter);

    // Every item ran exactly once, "e" straight after the running one.
    assert_eq!(ran(&log), ["a", "e", "b", "c", "d"]);
}

#[test]
fn upgraded_item_joins_back_of_high_queue() {
    let (limiter, done) = create_priority_limiter(1);
    let log = Log::default();

    limiter.enqueue_low(recording(&log, "running"));
    let late = recording(&log, "upgraded");
    limiter.enqueue_low(recording(&log, "low"));
    limiter.enqueue_low(late.clone());
    limiter.enqueue_high(recording(&log, "high"));
    limiter.enqueue_high(late);

    drain(&done, &limiter);

    assert_eq!(ran(&log), ["running", "high", "upgraded", "low"]);
}

#[test]
fn unseen_high_item_is_scheduled_as_new_work() {
    let (limiter, done) = create_priority_limiter(1);
    let log = Log::default();

    for label in ["a", "b", "c"] {
        limiter.enqueue_low(recording(&log, label));
    }
    assert_eq!(
        limiter.enqueue_high(recording(&log, "custom")),
        Admission::Queued
    );
    assert_eq!(limiter.stats().pending_low, 2);

    drain(&done, &limiter);

    assert_eq!(ran(&log), ["a", "custom", "b", "c"]);
}

#[test]
fn upgrading_a_running_item_runs_it_again() {
    let (limiter, done) = create_priority_limiter(1);
    let log = Log::default();
    let item = recording(&log, "task");

    assert_eq!(limiter.enqueue_low(item.clone()), Admission::Started);
    // Already running: nothing to pull from the low queue, so this is a
    // second, independent submission.
    assert_eq!(limiter.enqueue_high(item), Admission::Queued);

    drain(&done, &limiter);

    assert_eq!(ran(&log), ["task", "task"]);
}

// ---------------------------------------------------------------------------
// Repeat submissions
// ---------------------------------------------------------------------------

#[test]
fn repeated_low_submissions_are_discarded() {
    let (limiter, done) = create_priority_limiter(1);
    let log = Log::default();
    let item = recording(&log, "demo");

    assert_eq!(limiter.enqueue_low(item.clone()), Admission::Started);
    for _ in 0..4 {
        assert_eq!(limiter.enqueue_low(item.clone()), Admission::Discarded);
    }
    assert_eq!(limiter.stats().pending(), 0);

    drain(&done, &limiter);
    assert_eq!(ran(&log), ["demo"]);

    // Still known after it ran.
    assert_eq!(limiter.enqueue_low(item), Admission::Discarded);
}

#[test]
fn repeated_high_submissions_are_not_discarded() {
    let (limiter, done) = create_priority_limiter(1);
    let log = Log::default();
    let item = recording(&log, "urgent");

    assert_eq!(limiter.enqueue_high(item.clone()), Admission::Started);
    assert_eq!(limiter.enqueue_high(item.clone()), Admission::Queued);
    // High-only submissions do not make an item known.
    assert_eq!(limiter.enqueue_low(item), Admission::Queued);

    drain(&done, &limiter);
    assert_eq!(ran(&log), ["urgent", "urgent", "urgent"]);
}

#[test]
fn distinct_wrappers_of_one_closure_are_distinct_items() {
    let (limiter, done) = create_priority_limiter(1);
    let log = Log::default();

    for _ in 0..3 {
        assert_ne!(
            limiter.enqueue_low(recording(&log, "fresh")),
            Admission::Discarded
        );
    }
    drain(&done, &limiter);
    assert_eq!(ran(&log).len(), 3);
}

/// Counts how many closures holding one of these have been dropped.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn finished_low_items_are_not_retained_by_the_limiter() {
    const ITEMS: usize = 10_000;
    let (limiter, done) = create_priority_limiter(4);
    let dropped = Arc::new(AtomicUsize::new(0));

    for _ in 0..ITEMS {
        let counter = DropCounter(Arc::clone(&dropped));
        limiter.enqueue_low(WorkItem::new(move || {
            let _held = &counter;
        }));
    }
    drain(&done, &limiter);

    // Every closure, and the repeat mark stored next to it, is gone.
    assert_eq!(dropped.load(Ordering::SeqCst), ITEMS);
    assert_eq!(limiter.stats().pending(), 0);

    // The limiter keeps working and still discards repeats of live items.
    let log = Log::default();
    let item = recording(&log, "after");
    assert_eq!(limiter.enqueue_low(item.clone()), Admission::Started);
    assert_eq!(limiter.enqueue_low(item), Admission::Discarded);
}

#[test]
fn long_chain_of_synchronous_completions_does_not_overflow() {
    const CHAIN: usize = 200_000;
    let (limiter, done) = create_priority_limiter(1);
    let count = Arc::new(AtomicUsize::new(0));

    limiter.enqueue_low(WorkItem::new(|| {}));
    for n in 0..CHAIN {
        let count = Arc::clone(&count);
        let done = done.clone();
        let item = WorkItem::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
            done.done();
        });
        limiter.enqueue(item, Priority::from(n % 2 == 0));
    }

    done.done();

    assert_eq!(count.load(Ordering::SeqCst), CHAIN);
    let stats = limiter.stats();
    assert_eq!(stats.running, 0);
    assert_eq!(stats.pending(), 0);
}

// ---------------------------------------------------------------------------
// Exhaustion and isolation
// ---------------------------------------------------------------------------

#[test]
fn done_with_empty_queues_frees_a_slot() {
    let (limiter, done) = create_priority_limiter(2);
    let log = Log::default();

    done.done();
    assert_eq!(limiter.stats().running, 0);

    limiter.enqueue_low(recording(&log, "a"));
    limiter.enqueue_low(recording(&log, "b"));
    assert_eq!(limiter.stats().running, 2);

    done.done();
    done.done();
    done.done();
    let stats = limiter.stats();
    assert_eq!(stats.running, 0);
    assert_eq!(stats.limit, 2);
}

#[test]
fn instances_do_not_share_state() {
    let (first, _first_done) = create_priority_limiter(1);
    let (second, _second_done) = create_priority_limiter(1);
    let log = Log::default();
    let item = recording(&log, "shared");

    assert_eq!(first.enqueue_low(item.clone()), Admission::Started);
    assert_eq!(second.enqueue_low(item), Admission::Started);
    assert_eq!(ran(&log), ["shared", "shared"]);
}

#[test]
fn non_positive_limit_becomes_one() {
    let (limiter, _done) = create_priority_limiter(-2);
    assert_eq!(limiter.limit().get(), 1);
}
