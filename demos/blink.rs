//! Blink — a repeating software timer toggling an LED
//!
//! The SysTick exception is the periodic tick source; the toggle
//! handler runs in main context through the reactor.

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

#[cfg(target_arch = "arm")]
mod demo {
    use cortex_m::peripheral::syst::SystClkSource;
    use cortex_m_rt::{entry, exception};
    use reactor_rt::{reactor, timer, Arg, Prio};

    /// Board hook: drive the LED pin here
    fn led_toggle() {
        reactor_rt::port::nop();
    }

    fn on_blink(_: Arg) {
        led_toggle();
        reactor_rt::info!("blink");
    }

    #[exception]
    fn SysTick() {
        timer::on_tick_isr();
    }

    #[entry]
    fn main() -> ! {
        let p = cortex_m::Peripherals::take().unwrap();
        let mut syst = p.SYST;

        // 1 ms tick from the core clock (adjust the reload for the
        // board's clock tree)
        syst.set_clock_source(SystClkSource::Core);
        syst.set_reload(16_000 - 1);
        syst.clear_current();
        syst.enable_counter();
        syst.enable_interrupt();

        timer::init();

        let blink = reactor::register(on_blink, Prio::Low);
        blink.repeat(1_000);

        reactor::run();
    }
}

#[cfg(not(target_arch = "arm"))]
fn main() {}
