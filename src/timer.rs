//! Software timer wheel
//!
//! A fixed ring of deferred and repeating reactor notifications, kept
//! sorted by deadline so the periodic tick handler only ever looks at
//! the head. Deadlines are absolute tick counts compared with signed
//! distance arithmetic, which stays correct across counter wraparound
//! as long as nothing is armed more than half the counter range ahead.
//!
//! Timers never fire in interrupt context. The tick ISR increments the
//! counter and notifies the dispatch handle; expiry notifications are
//! posted from that handler, in main context, in deadline order.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::alert::{self, Fault};
use crate::config::CFG_TIMER_SLOTS;
use crate::critical::critical_section;
use crate::cs_cell::CsCell;
use crate::reactor::{self, Handle};
use crate::types::{Arg, Prio, Tick};

/// Identifier of a single arming of a timer entry.
///
/// Distinct from [`Handle`]: a handle names a callback, an instance
/// names one scheduled firing. Repeating timers keep their instance
/// across re-arms, so the value returned by `repeat` stays valid until
/// cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instance(u32);

impl Instance {
    /// Cancel this instance. See [`cancel`].
    #[inline]
    pub fn cancel(self) -> bool {
        cancel(self)
    }
}

#[derive(Clone, Copy)]
struct Entry {
    target: Option<Handle>,
    instance: u32,
    deadline: Tick,
    repeat: Tick,
    arg: Arg,
}

impl Entry {
    const VACANT: Entry = Entry {
        target: None,
        instance: 0,
        deadline: 0,
        repeat: 0,
        arg: 0,
    };
}

struct Wheel {
    slots: [Entry; CFG_TIMER_SLOTS],
    /// Head of the sorted active segment
    active: usize,
    /// One past the tail of the active segment
    avail: usize,
    last_instance: u32,
}

impl Wheel {
    const fn new() -> Self {
        Self {
            slots: [Entry::VACANT; CFG_TIMER_SLOTS],
            active: 0,
            avail: 0,
            last_instance: 0,
        }
    }
}

static WHEEL: CsCell<Wheel> = CsCell::new(Wheel::new());

/// Free-running tick counter, incremented by the tick ISR
static TICKS: AtomicU32 = AtomicU32::new(0);

/// Reactor handle of the dispatch handler, readable from the tick ISR
static DISPATCH: AtomicU8 = AtomicU8::new(NO_DISPATCH);

const NO_DISPATCH: u8 = u8::MAX;

#[inline]
const fn right_of(index: usize) -> usize {
    if index == CFG_TIMER_SLOTS - 1 {
        0
    } else {
        index + 1
    }
}

#[inline]
const fn left_of(index: usize) -> usize {
    if index == 0 {
        CFG_TIMER_SLOTS - 1
    } else {
        index - 1
    }
}

/// Signed tick distance, correct across wraparound
#[inline]
const fn distance(from: Tick, to: Tick) -> i32 {
    to.wrapping_sub(from) as i32
}

/// Register the dispatch handler with the reactor.
///
/// Call once before [`reactor::run`]. The handler runs at low priority
/// so event sources (UART bytes, bus completions) win the same pass.
pub fn init() {
    let handle = reactor::register(dispatch, Prio::Low);
    DISPATCH.store(handle.index() as u8, Ordering::Relaxed);
}

/// Current tick count, atomically read
#[inline]
pub fn now() -> Tick {
    TICKS.load(Ordering::Relaxed)
}

/// Tick ISR hook: increments the counter and notifies the dispatch
/// handler. Wire this to the board's periodic interrupt (nominally
/// 1 ms).
pub fn on_tick_isr() {
    TICKS.fetch_add(1, Ordering::Relaxed);

    let dispatch = DISPATCH.load(Ordering::Relaxed);
    if dispatch != NO_DISPATCH {
        reactor::notify_from_isr(Handle::from_index(dispatch));
    }
}

/// Arm a timer: notify `target` with `arg` once the counter reaches
/// `deadline`. A `repeat` of 0 is one-shot; otherwise the entry
/// re-arms itself every `repeat` ticks, retaining its instance and
/// argument.
///
/// A deadline equal to the current count fires on the next dispatch
/// pass, not immediately. A full ring is a fatal fault. Must not be
/// called from interrupt context.
pub fn arm(target: Handle, deadline: Tick, repeat: Tick, arg: Arg) -> Instance {
    arm_entry(target, deadline, repeat, None, arg)
}

fn arm_entry(
    target: Handle,
    deadline: Tick,
    repeat: Tick,
    reuse: Option<u32>,
    arg: Arg,
) -> Instance {
    let now = now();

    critical_section(|cs| {
        let wheel = WHEEL.get(cs);

        // active == avail is either an empty segment or a full ring;
        // an occupied head slot means full
        alert::stop_if(
            wheel.active == wheel.avail && wheel.slots[wheel.active].target.is_some(),
            Fault::TimerRingFull,
        );

        // Sorted position: first entry strictly later than ours
        let mut insert = wheel.active;
        while insert != wheel.avail {
            if distance(now, deadline) < distance(now, wheel.slots[insert].deadline) {
                break;
            }
            insert = right_of(insert);
        }

        // Shift the tail right to open the slot
        let mut index = wheel.avail;
        while index != insert {
            let left = left_of(index);
            wheel.slots[index] = wheel.slots[left];
            index = left;
        }

        let instance = match reuse {
            Some(instance) => instance,
            None => {
                wheel.last_instance = wheel.last_instance.wrapping_add(1);
                wheel.last_instance
            }
        };

        wheel.slots[insert] = Entry {
            target: Some(target),
            instance,
            deadline,
            repeat,
            arg,
        };
        wheel.avail = right_of(wheel.avail);

        Instance(instance)
    })
}

/// Cancel a pending instance, reclaiming its slot.
///
/// Returns `true` iff the instance was still pending; a repeating
/// timer stops for good. Returns `false` for expired or unknown
/// instances, which is always safe: an expiry already posted to the
/// reactor is not recalled, so restart-heavy callers should check the
/// instance in their handler.
pub fn cancel(instance: Instance) -> bool {
    critical_section(|cs| {
        let wheel = WHEEL.get(cs);

        let mut index = wheel.active;
        while index != wheel.avail {
            if wheel.slots[index].instance == instance.0 {
                // Shift the rest of the segment left over the hole
                let mut hole = index;
                loop {
                    let right = right_of(hole);
                    if right == wheel.avail {
                        break;
                    }
                    wheel.slots[hole] = wheel.slots[right];
                    hole = right;
                }

                wheel.avail = left_of(wheel.avail);
                wheel.slots[wheel.avail].target = None;
                return true;
            }

            index = right_of(index);
        }

        false
    })
}

/// Reactor handler: pop and notify every expired head entry, re-arming
/// repeats
fn dispatch(_arg: Arg) {
    let now = now();

    loop {
        let expired = critical_section(|cs| {
            let wheel = WHEEL.get(cs);

            if wheel.active == wheel.avail && wheel.slots[wheel.active].target.is_none() {
                return None;
            }

            let entry = wheel.slots[wheel.active];
            if distance(now, entry.deadline) > 0 {
                return None;
            }

            wheel.slots[wheel.active].target = None;
            wheel.active = right_of(wheel.active);
            Some(entry)
        });

        let Some(entry) = expired else { break };
        let Some(target) = entry.target else { break };

        reactor::notify(target, entry.arg);

        if entry.repeat != 0 {
            let mut next = entry.deadline.wrapping_add(entry.repeat);
            // Under heavy load the next deadline may already be in the
            // past; snap it to now rather than replaying the backlog
            if distance(now, next) < 0 {
                next = now;
            }
            arm_entry(target, next, entry.repeat, Some(entry.instance), entry.arg);
        }
    }
}

impl Handle {
    /// One-shot notification `after` ticks from now
    #[inline]
    pub fn delay(self, after: Tick) -> Instance {
        arm(self, now().wrapping_add(after), 0, 0)
    }

    /// One-shot notification with an argument
    #[inline]
    pub fn delay_arg(self, after: Tick, arg: Arg) -> Instance {
        arm(self, now().wrapping_add(after), 0, arg)
    }

    /// One-shot notification at an absolute deadline
    #[inline]
    pub fn at(self, deadline: Tick) -> Instance {
        arm(self, deadline, 0, 0)
    }

    /// Repeating notification every `every` ticks, first firing one
    /// period from now
    #[inline]
    pub fn repeat(self, every: Tick) -> Instance {
        arm(self, now().wrapping_add(every), every, 0)
    }

    /// Repeating notification with a distinct initial delay
    #[inline]
    pub fn repeat_after(self, after: Tick, every: Tick) -> Instance {
        arm(self, now().wrapping_add(after), every, 0)
    }

    /// Repeating notification carrying an argument on every firing
    #[inline]
    pub fn repeat_arg(self, after: Tick, every: Tick, arg: Arg) -> Instance {
        arm(self, now().wrapping_add(after), every, arg)
    }
}

/// Force the tick counter, for simulators and host tests
#[doc(hidden)]
pub fn set_count(count: Tick) {
    TICKS.store(count, Ordering::Relaxed);
}

/// Tear down all timer state. Host test support.
#[doc(hidden)]
pub fn reset() {
    critical_section(|cs| {
        *WHEEL.get(cs) = Wheel::new();
    });
    TICKS.store(0, Ordering::Relaxed);
    DISPATCH.store(NO_DISPATCH, Ordering::Relaxed);
}
