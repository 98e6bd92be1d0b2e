//! Cooperative reactor runtime for tiny single-core microcontrollers
//!
//! Interrupt-driven events are handled in the main execution context,
//! not inside interrupt service routines:
//! - ISRs post one-word notifications to a priority-ordered bitset
//! - A dispatch loop drains the set, lowest bit first, and sleeps the
//!   CPU when it is empty
//! - A software timer wheel turns a 1 ms tick into deferred and
//!   repeating notifications
//! - Shared peripherals arbitrate multiple requestors through handle
//!   masks
//! - A Modbus RTU arbiter sequences the T1.5/T3.5/T4.0 silence
//!   discipline for master and slave roles
//!
//! There is no preemption, no allocation and no locking beyond
//! interrupt masking; all application work shares one stack.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod alert;
pub mod config;
pub mod critical;
pub mod cs_cell;
pub mod eeprom;
pub mod hw_timer;
pub mod mask;
pub mod modbus;
pub mod pending;
pub mod port;
pub mod reactor;
pub mod timer;
pub mod types;
pub mod uart;

// ============ Re-exports ============

pub use config::*;
pub use mask::Mask;
pub use pending::Arbiter;
pub use reactor::{
    clear, invoke, notify, notify_from_isr, poll, register, run, yield_now, Handle,
};
pub use timer::{arm, cancel, now, Instance};
pub use types::{pack, unpack, Arg, Handler, Prio, Tick};
