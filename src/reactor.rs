//! The reactor: a priority-ordered, bit-pending dispatcher
//!
//! Interrupt handlers do not do work; they notify. Each registered
//! callback owns one bit of a process-wide pending bitset, and the
//! dispatch loop drains that bitset lowest-bit-first in main context,
//! sleeping the CPU when it is empty. All application work therefore
//! runs on one stack, in one context, and races against nothing but
//! the notification primitive itself.
//!
//! Registration order matters: within the high-priority class the
//! first registered handler is served first, within the low-priority
//! class the first registered handler is served *last*. Sequencers can
//! be built from that asymmetry.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::alert::{self, Fault};
use crate::config::CFG_REACTOR_HANDLERS;
use crate::critical::{critical_section, is_isr_context, CriticalSection};
use crate::cs_cell::CsCell;
use crate::mask::Mask;
use crate::types::{pack, Arg, Handler, Prio};

/// Identifier of a registered handler: a bit index into the pending
/// set. Stable from registration until reset; never recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handle(u8);

impl Handle {
    #[inline]
    pub(crate) const fn from_index(index: u8) -> Self {
        Handle(index)
    }

    /// Bit index of this handle
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Post this handle with an argument
    #[inline]
    pub fn notify(self, arg: Arg) {
        notify(self, arg);
    }

    /// Post this handle with two bytes packed into the argument
    #[inline]
    pub fn notify2(self, a: u8, b: u8) {
        notify(self, pack(a, b));
    }

    /// Call the handler synchronously, bypassing the pending set.
    /// Forbidden from interrupt context.
    #[inline]
    pub fn invoke(self, arg: Arg) {
        invoke(self, arg);
    }

    /// Drop any pending notification of this handle
    #[inline]
    pub fn clear(self) {
        clear(Mask::of(self));
    }

    /// Mask containing only this handle
    #[inline]
    pub const fn mask(self) -> Mask {
        Mask::of(self)
    }
}

#[derive(Clone, Copy)]
struct HandlerRecord {
    callback: Option<Handler>,
    arg: Arg,
}

impl HandlerRecord {
    const EMPTY: HandlerRecord = HandlerRecord {
        callback: None,
        arg: 0,
    };
}

struct ReactorState {
    handlers: [HandlerRecord; CFG_REACTOR_HANDLERS],
    /// Next slot for a high-priority handle, growing up from 0
    high_next: i16,
    /// Next slot for a low-priority handle, growing down from the top
    low_next: i16,
    /// Registration is locked once the loop runs
    started: bool,
    /// Handle currently being dispatched, for `yield_now`
    current: Option<Handle>,
    idle_hook: Option<fn()>,
    watchdog_kick: Option<fn()>,
}

impl ReactorState {
    const fn new() -> Self {
        Self {
            handlers: [HandlerRecord::EMPTY; CFG_REACTOR_HANDLERS],
            high_next: 0,
            low_next: CFG_REACTOR_HANDLERS as i16 - 1,
            started: false,
            current: None,
            idle_hook: None,
            watchdog_kick: None,
        }
    }
}

static STATE: CsCell<ReactorState> = CsCell::new(ReactorState::new());

/// Pending notification bits, one per handle. Set from ISRs, drained by
/// the dispatch loop. The argument store in `notify` happens before the
/// bit store (release) and the dispatch loop reads the bit before the
/// argument (acquire), so a handler always observes the argument of the
/// notification that made its bit visible.
static PENDING: AtomicU32 = AtomicU32::new(0);

/// Register a handler and allocate its handle.
///
/// High-priority handles are packed from the low end of the table, low
/// priority from the high end. Registering after [`run`] has started,
/// or once the two ends meet, is a fatal fault.
pub fn register(callback: Handler, priority: Prio) -> Handle {
    critical_section(|cs| {
        let state = STATE.get(cs);

        alert::stop_if(state.started, Fault::RegisterAfterStart);
        alert::stop_if(state.high_next > state.low_next, Fault::HandleTableFull);

        let index = match priority {
            Prio::High => {
                let index = state.high_next;
                state.high_next += 1;
                index
            }
            Prio::Low => {
                let index = state.low_next;
                state.low_next -= 1;
                index
            }
        };

        state.handlers[index as usize] = HandlerRecord {
            callback: Some(callback),
            arg: 0,
        };

        Handle(index as u8)
    })
}

/// Post a notification: store the argument, then set the pending bit.
///
/// Interrupt-safe. Posting a handle whose bit is already set overwrites
/// the stored argument; no queue of arguments is kept.
pub fn notify(handle: Handle, arg: Arg) {
    critical_section(|cs| {
        STATE.get(cs).handlers[handle.index()].arg = arg;
        PENDING.fetch_or(Mask::of(handle).bits(), Ordering::Release);
    });
}

/// Fastest notification from interrupt context: sets the bit only.
/// The handler observes an argument of 0.
#[inline]
pub fn notify_from_isr(handle: Handle) {
    PENDING.fetch_or(Mask::of(handle).bits(), Ordering::Release);
}

/// Call a handler directly from the current context, bypassing the
/// pending set. Fatal fault from interrupt context.
pub fn invoke(handle: Handle, arg: Arg) {
    alert::stop_if(is_isr_context(), Fault::InvokeFromIsr);

    // Main context only, per the check above
    let callback = unsafe { STATE.get_unchecked() }.handlers[handle.index()].callback;

    if let Some(callback) = callback {
        callback(arg);
    }
}

/// Clear pending notifications for every handle in the mask.
///
/// Used by drivers to purge stale events, e.g. after restarting a
/// hardware timer whose old compare interrupts may already have been
/// posted.
pub fn clear(mask: Mask) {
    critical_section(|_cs| {
        PENDING.fetch_and(!mask.bits(), Ordering::AcqRel);
    });
}

/// Re-post the currently running handler with a new argument and
/// return to the dispatch loop.
///
/// The only way to slice long work: higher-priority handles get a
/// chance to run before the caller is re-entered. Outside a handler
/// this is a no-op.
pub fn yield_now(arg: Arg) {
    let current = critical_section(|cs| STATE.get(cs).current);

    if let Some(handle) = current {
        notify(handle, arg);
    }
}

/// Install a hook invoked once before each sleep. Must be non-blocking
/// and idempotent; used downstream to flush log queues.
pub fn set_idle_hook(hook: fn()) {
    critical_section(|cs| STATE.get(cs).idle_hook = Some(hook));
}

/// Install the watchdog kick, invoked after every dispatched handler.
/// A handler that never returns stops the kicking and the watchdog
/// resets the device.
pub fn set_watchdog_kick(kick: fn()) {
    critical_section(|cs| STATE.get(cs).watchdog_kick = Some(kick));
}

/// One dispatch pass: find the lowest pending bit, clear it, run its
/// handler with the most recently stored argument. Returns `false`
/// when nothing was pending.
///
/// [`run`] drives this forever; hosts and simulators may call it
/// directly.
pub fn poll() -> bool {
    let (callback, arg) = {
        let cs = CriticalSection::enter();

        let bits = PENDING.load(Ordering::Acquire);
        if bits == 0 {
            return false;
        }

        let index = bits.trailing_zeros() as usize;
        PENDING.store(bits & !(1 << index), Ordering::Relaxed);

        let state = STATE.get(&cs);
        state.current = Some(Handle(index as u8));
        let record = state.handlers[index];
        // Consume the argument with the bit: a later bit-only
        // notification from an ISR reads as 0, not as this leftover
        state.handlers[index].arg = 0;
        (record.callback, record.arg)
    };

    // Pending bit set implies a registered callback; a None here means
    // a bit was forged outside `register`/`notify`.
    if let Some(callback) = callback {
        callback(arg);
    }

    let kick = critical_section(|cs| {
        let state = STATE.get(cs);
        state.current = None;
        state.watchdog_kick
    });

    if let Some(kick) = kick {
        kick();
    }

    true
}

/// The main loop. Locks registration, then dispatches forever,
/// sleeping the CPU whenever the pending set is empty. Never returns.
pub fn run() -> ! {
    critical_section(|cs| STATE.get(cs).started = true);

    loop {
        if poll() {
            continue;
        }

        let idle = critical_section(|cs| STATE.get(cs).idle_hook);
        if let Some(idle) = idle {
            idle();
        }

        // The empty check and the sleep share one critical section: an
        // interrupt arriving in between pends and wakes the WFI, it
        // cannot be lost.
        let cs = CriticalSection::enter();
        if PENDING.load(Ordering::Acquire) == 0 {
            crate::port::sleep_until_interrupt();
        }
        drop(cs);
    }
}

/// Tear down all reactor state. Host test support; not part of the
/// target API surface.
#[doc(hidden)]
pub fn reset() {
    critical_section(|cs| {
        *STATE.get(cs) = ReactorState::new();
        PENDING.store(0, Ordering::Relaxed);
    });
}
