//! Port layer: the few CPU-specific operations the runtime needs
//!
//! Everything else in the crate is portable. Non-ARM builds get inert
//! stubs so the full logic runs on the host under `cargo test`.

/// Halt the CPU until an interrupt pends.
///
/// Called by the dispatch loop with interrupts masked: WFI still wakes
/// on a pended interrupt, and the ISR runs once the caller unmasks.
/// The wake-up is therefore race-free — a notification arriving
/// between the empty check and the sleep pends the interrupt and the
/// sleep falls straight through.
#[inline]
pub fn sleep_until_interrupt() {
    #[cfg(target_arch = "arm")]
    cortex_m::asm::wfi();
}

/// Spin for one cycle; the idle body of demos and stubs
#[inline]
pub fn nop() {
    #[cfg(target_arch = "arm")]
    cortex_m::asm::nop();
}
