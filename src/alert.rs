//! Alert facility for programmer bugs
//!
//! The runtime never returns errors from its own operations; conditions
//! that can only arise from misuse raise an alert instead. A fatal
//! alert halts so the hardware watchdog resets the device (on the host
//! it panics, which is what the test suite asserts on). A recoverable
//! alert is recorded and execution continues.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// What went wrong. Kinds, not payloads: the audience is a trace port
/// and a watchdog log, not a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Fault {
    /// No fault recorded
    None = 0,
    /// `register` called after the dispatch loop started
    RegisterAfterStart = 1,
    /// Both ends of the handle table met
    HandleTableFull = 2,
    /// `invoke` called from interrupt context
    InvokeFromIsr = 3,
    /// Timer ring exhausted on `arm`
    TimerRingFull = 4,
    /// EEPROM operation queue exhausted
    EepromQueueFull = 5,
    /// Transfer started while the shared bus is owned by another
    /// requestor
    BusNotIdle = 6,
}

/// Count of recoverable alerts since boot
static FAULT_COUNT: AtomicU32 = AtomicU32::new(0);

/// Most recent fault code, for post-mortem inspection
static LAST_FAULT: AtomicU8 = AtomicU8::new(Fault::None as u8);

/// Record a recoverable fault and continue
pub fn record(fault: Fault) {
    crate::error!("alert: {}", fault);
    LAST_FAULT.store(fault as u8, Ordering::Relaxed);
    FAULT_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Number of recoverable faults recorded since boot
#[inline]
pub fn fault_count() -> u32 {
    FAULT_COUNT.load(Ordering::Relaxed)
}

/// Raise a fatal fault and halt.
///
/// On the target the halt is a spin loop: the watchdog is left running
/// and resets the device. On the host this panics.
pub fn stop(fault: Fault) -> ! {
    crate::error!("alert and stop: {}", fault);
    LAST_FAULT.store(fault as u8, Ordering::Relaxed);

    #[cfg(target_arch = "arm")]
    loop {
        cortex_m::asm::nop();
    }

    #[cfg(not(target_arch = "arm"))]
    panic!("alert and stop: {:?}", fault);
}

/// Raise a fatal fault when the condition holds
#[inline]
pub fn stop_if(condition: bool, fault: Fault) {
    if condition {
        stop(fault);
    }
}
