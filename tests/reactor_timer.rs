//! Host-run tests for the reactor, the timer wheel and the arbiter
//!
//! The runtime state is process-wide, so every test takes the same
//! lock and resets it first.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};

use reactor_rt::pending::Arbiter;
use reactor_rt::{reactor, timer, Arg, Prio};

static LOCK: Mutex<()> = Mutex::new(());

/// Order of handler invocations, recorded as small tags
static TRACE: Mutex<Vec<(u8, Arg)>> = Mutex::new(Vec::new());

fn setup() -> MutexGuard<'static, ()> {
    let guard = LOCK.lock().unwrap_or_else(|e| e.into_inner());
    reactor::reset();
    timer::reset();
    TRACE.lock().unwrap().clear();
    guard
}

fn record(tag: u8, arg: Arg) {
    TRACE.lock().unwrap().push((tag, arg));
}

fn trace() -> Vec<(u8, Arg)> {
    TRACE.lock().unwrap().clone()
}

/// Drain the pending set completely
fn drain() {
    while reactor::poll() {}
}

/// Advance the simulated tick, dispatching after every tick
fn advance(ticks: u32) {
    for _ in 0..ticks {
        timer::on_tick_isr();
        drain();
    }
}

fn tag0(arg: Arg) {
    record(0, arg);
}
fn tag1(arg: Arg) {
    record(1, arg);
}
fn tag2(arg: Arg) {
    record(2, arg);
}
fn tag3(arg: Arg) {
    record(3, arg);
}

// ---------------------------------------------------------------------
// Reactor
// ---------------------------------------------------------------------

#[test]
fn high_priority_runs_before_low() {
    let _guard = setup();

    let hi = reactor::register(tag0, Prio::High);
    let lo = reactor::register(tag1, Prio::Low);

    // Notified "from an ISR", low first for good measure
    reactor::notify_from_isr(lo);
    reactor::notify_from_isr(hi);
    drain();

    assert_eq!(trace(), vec![(0, 0), (1, 0)]);
}

#[test]
fn registration_order_within_classes() {
    let _guard = setup();

    // High class: first registered runs first.
    // Low class: first registered runs last.
    let hi_a = reactor::register(tag0, Prio::High);
    let hi_b = reactor::register(tag1, Prio::High);
    let lo_a = reactor::register(tag2, Prio::Low);
    let lo_b = reactor::register(tag3, Prio::Low);

    for handle in [lo_a, lo_b, hi_b, hi_a] {
        reactor::notify_from_isr(handle);
    }
    drain();

    let order: Vec<u8> = trace().iter().map(|&(tag, _)| tag).collect();
    assert_eq!(order, vec![0, 1, 3, 2]);
}

#[test]
fn later_notification_overwrites_argument() {
    let _guard = setup();

    let handle = reactor::register(tag0, Prio::High);
    handle.notify(7);
    handle.notify(42);
    drain();

    // One bit transition, one invocation, freshest argument
    assert_eq!(trace(), vec![(0, 42)]);
}

#[test]
fn isr_notification_reads_as_null_argument() {
    let _guard = setup();

    let handle = reactor::register(tag0, Prio::High);
    handle.notify(99);
    drain();

    reactor::notify_from_isr(handle);
    drain();

    assert_eq!(trace(), vec![(0, 99), (0, 0)]);
}

#[test]
fn clear_cancels_pending_invocation() {
    let _guard = setup();

    let handle = reactor::register(tag0, Prio::High);
    handle.notify(1);
    handle.clear();

    assert!(!reactor::poll());
    assert!(trace().is_empty());
}

#[test]
fn poll_is_idle_when_nothing_pends() {
    let _guard = setup();

    let handle = reactor::register(tag0, Prio::High);
    assert!(!reactor::poll());

    handle.notify(0);
    assert!(reactor::poll());
    assert!(!reactor::poll());
}

fn yielder(arg: Arg) {
    record(9, arg);
    if arg < 3 {
        reactor::yield_now(arg + 1);
    }
}

#[test]
fn yield_reschedules_with_new_argument() {
    let _guard = setup();

    let handle = reactor::register(yielder, Prio::Low);
    handle.notify(1);
    drain();

    assert_eq!(trace(), vec![(9, 1), (9, 2), (9, 3)]);
}

#[test]
fn handle_table_exhaustion_is_fatal() {
    let _guard = setup();

    for _ in 0..reactor_rt::CFG_REACTOR_HANDLERS {
        reactor::register(tag0, Prio::High);
    }

    let result = catch_unwind(AssertUnwindSafe(|| {
        reactor::register(tag0, Prio::High);
    }));
    assert!(result.is_err());

    reactor::reset();
}

// ---------------------------------------------------------------------
// Timer wheel
// ---------------------------------------------------------------------

fn count_now(_arg: Arg) {
    record(5, timer::now() as Arg);
}

#[test]
fn repeating_timer_blinks_ten_times() {
    let _guard = setup();

    timer::init();
    let blink = reactor::register(tag0, Prio::Low);
    let instance = blink.repeat(1_000);

    advance(10_000);

    assert_eq!(trace().len(), 10);
    // The instance stays valid across firings
    assert!(instance.cancel());

    advance(2_000);
    assert_eq!(trace().len(), 10);
}

#[test]
fn deadlines_fire_in_order() {
    let _guard = setup();

    timer::init();
    let late = reactor::register(tag1, Prio::Low);
    let early = reactor::register(tag2, Prio::Low);

    // Armed out of order on purpose
    timer::arm(late, timer::now() + 10, 0, 0);
    timer::arm(early, timer::now() + 5, 0, 0);

    advance(20);

    let order: Vec<u8> = trace().iter().map(|&(tag, _)| tag).collect();
    assert_eq!(order, vec![2, 1]);
}

#[test]
fn equal_deadlines_fire_in_arm_order() {
    let _guard = setup();

    timer::init();
    // High priority so bit order equals registration order
    let first = reactor::register(tag1, Prio::High);
    let second = reactor::register(tag2, Prio::High);

    let deadline = timer::now() + 3;
    timer::arm(first, deadline, 0, 0);
    timer::arm(second, deadline, 0, 0);

    advance(5);

    let order: Vec<u8> = trace().iter().map(|&(tag, _)| tag).collect();
    assert_eq!(order, vec![1, 2]);
}

#[test]
fn timer_argument_is_delivered_every_firing() {
    let _guard = setup();

    timer::init();
    let handle = reactor::register(tag0, Prio::Low);
    handle.repeat_arg(2, 2, 0xAB);

    advance(6);

    assert_eq!(trace(), vec![(0, 0xAB), (0, 0xAB), (0, 0xAB)]);
}

#[test]
fn deadline_across_wraparound() {
    let _guard = setup();

    timer::init();
    timer::set_count(0xFFFF_FFF0);

    let handle = reactor::register(count_now, Prio::Low);
    timer::arm(handle, timer::now().wrapping_add(32), 0, 0);

    // Well past the wrap
    advance(64);

    assert_eq!(trace(), vec![(5, 0x10)]);
}

#[test]
fn cancelled_one_shot_never_fires() {
    let _guard = setup();

    timer::init();
    let handle = reactor::register(tag0, Prio::Low);
    let instance = handle.delay(10);

    assert!(timer::cancel(instance));
    advance(20);

    assert!(trace().is_empty());
    // Second cancel is safe and reports nothing pending
    assert!(!timer::cancel(instance));
}

#[test]
fn cancelling_middle_entry_keeps_order() {
    let _guard = setup();

    timer::init();
    let a = reactor::register(tag1, Prio::Low);
    let b = reactor::register(tag2, Prio::Low);
    let c = reactor::register(tag3, Prio::Low);

    timer::arm(a, timer::now() + 5, 0, 0);
    let middle = timer::arm(b, timer::now() + 10, 0, 0);
    timer::arm(c, timer::now() + 15, 0, 0);

    assert!(timer::cancel(middle));
    advance(20);

    let order: Vec<u8> = trace().iter().map(|&(tag, _)| tag).collect();
    assert_eq!(order, vec![1, 3]);
}

#[test]
fn ring_exhaustion_is_fatal() {
    let _guard = setup();

    timer::init();
    let handle = reactor::register(tag0, Prio::Low);

    for offset in 0..reactor_rt::CFG_TIMER_SLOTS as u32 {
        timer::arm(handle, timer::now() + 100 + offset, 0, 0);
    }

    let result = catch_unwind(AssertUnwindSafe(|| {
        timer::arm(handle, timer::now() + 500, 0, 0);
    }));
    assert!(result.is_err());

    timer::reset();
}

#[test]
fn overdue_repeat_snaps_to_now() {
    let _guard = setup();

    timer::init();
    let handle = reactor::register(tag0, Prio::Low);
    handle.repeat(2);

    // Starve the dispatcher: ticks pass without polling
    for _ in 0..10 {
        timer::on_tick_isr();
    }
    drain();

    // One backlog firing, then the schedule recovers from now
    let fired = trace().len();
    assert_eq!(fired, 1);

    advance(4);
    assert_eq!(trace().len(), fired + 2);
}

// ---------------------------------------------------------------------
// Pending-request arbiter
// ---------------------------------------------------------------------

#[test]
fn arbiter_grants_one_at_a_time_in_priority_order() {
    let _guard = setup();

    let a = reactor::register(tag0, Prio::High);
    let b = reactor::register(tag1, Prio::High);
    let c = reactor::register(tag2, Prio::Low);

    let mut bus = Arbiter::new();

    // Idle resource: the first request is granted at once
    bus.request(c);
    drain();
    assert_eq!(trace(), vec![(2, 0)]);
    assert!(!bus.is_idle());

    // Queued while busy, lowest priority first
    bus.request(b);
    bus.request(a);
    drain();
    assert_eq!(trace(), vec![(2, 0)]);

    // Served strictly by priority as the resource frees up
    bus.complete(0);
    drain();
    assert_eq!(trace(), vec![(2, 0), (0, 0)]);

    bus.complete(0);
    drain();
    assert_eq!(trace(), vec![(2, 0), (0, 0), (1, 0)]);

    bus.complete(0);
    assert!(bus.is_idle());
}

#[test]
fn arbiter_serves_every_requestor_under_churn() {
    let _guard = setup();

    let a = reactor::register(tag0, Prio::High);
    let b = reactor::register(tag1, Prio::High);
    let c = reactor::register(tag2, Prio::Low);

    let mut bus = Arbiter::new();
    for _ in 0..4 {
        bus.request(c);
        bus.request(b);
        bus.request(a);
        drain();
        bus.complete(0);
        drain();
        bus.complete(0);
        drain();
        bus.complete(0);
        drain();
    }

    let mut served = [0u32; 4];
    for (tag, _) in trace() {
        served[tag as usize] += 1;
    }
    assert_eq!(served[0], 4);
    assert_eq!(served[1], 4);
    assert_eq!(served[2], 4);
}

#[test]
fn arbiter_requeue_while_pending_is_idempotent() {
    let _guard = setup();

    let a = reactor::register(tag0, Prio::High);
    let b = reactor::register(tag1, Prio::High);

    let mut bus = Arbiter::new();
    bus.request(a);
    drain();

    bus.request(b);
    bus.request(b);
    bus.request(b);
    drain();
    // b queued once, still waiting for completion
    assert_eq!(trace(), vec![(0, 0)]);

    bus.complete(0);
    drain();
    bus.complete(0);
    drain();

    assert_eq!(trace(), vec![(0, 0), (1, 0)]);
}

#[test]
fn arbiter_delivers_completion_status() {
    let _guard = setup();

    let requestor = reactor::register(tag0, Prio::High);
    let done = reactor::register(tag3, Prio::Low);

    let mut bus = Arbiter::new();
    bus.request(requestor);
    drain();

    bus.set_completion(done);
    bus.complete(0x2A);
    drain();

    assert_eq!(trace(), vec![(0, 0), (3, 0x2A)]);
}
