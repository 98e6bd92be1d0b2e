//! Interrupt-masking critical sections
//!
//! The runtime's only locking primitive. A critical section masks
//! interrupts for its lifetime and restores the previous mask state on
//! drop, so sections nest correctly.

/// RAII guard for a critical section.
///
/// Interrupts are disabled while the guard lives; the previous mask
/// state is restored when it is dropped.
pub struct CriticalSection {
    #[cfg(target_arch = "arm")]
    was_active: bool,
    #[cfg(not(target_arch = "arm"))]
    _private: (),
}

impl CriticalSection {
    /// Enter a critical section by disabling interrupts
    #[inline(always)]
    pub fn enter() -> Self {
        #[cfg(target_arch = "arm")]
        {
            let was_active = cortex_m::register::primask::read().is_active();
            cortex_m::interrupt::disable();
            return CriticalSection { was_active };
        }

        #[cfg(not(target_arch = "arm"))]
        CriticalSection { _private: () }
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        #[cfg(target_arch = "arm")]
        if self.was_active {
            unsafe { cortex_m::interrupt::enable() };
        }
    }
}

/// Execute a closure with interrupts disabled.
///
/// The guard reference unlocks [`CsCell`](crate::cs_cell::CsCell)
/// protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    #[cfg(target_arch = "arm")]
    {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr != 0
    }

    #[cfg(not(target_arch = "arm"))]
    {
        false
    }
}
