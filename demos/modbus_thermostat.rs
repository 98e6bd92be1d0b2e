//! Modbus master wiring — poll a thermostat at address 0x11
//!
//! Shows the three capabilities the master needs (UART channel,
//! compare timer, datagram) and the request/error plumbing. The
//! channel and timer bodies are board hooks: wire them to the real
//! USART and TCA-class peripheral ISRs.

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

#[cfg(target_arch = "arm")]
mod demo {
    use cortex_m_rt::{entry, exception};
    use reactor_rt::critical::critical_section;
    use reactor_rt::cs_cell::CsCell;
    use reactor_rt::hw_timer::CompareTimer;
    use reactor_rt::modbus::crc::crc16;
    use reactor_rt::modbus::datagram::{Datagram, Status};
    use reactor_rt::modbus::master::Master;
    use reactor_rt::modbus::Error;
    use reactor_rt::uart::{options, Channel, Config, Parity, StopBits, Width};
    use reactor_rt::{reactor, timer, unpack, Arg, Handle, Prio};

    // ---- UART channel (board hooks) -------------------------------

    struct Rs485;

    static RX_HANDLE: CsCell<Option<Handle>> = CsCell::new(None);
    static TX_HANDLE: CsCell<Option<Handle>> = CsCell::new(None);

    impl Channel for Rs485 {
        const CONFIG: Config =
            Config::new(19200, Width::Eight, Parity::None, StopBits::One)
                .with_options(options::RS485);

        fn init() { /* program USART registers per CONFIG */ }

        fn send(_frame: &'static [u8]) {
            // Start the DRE-driven transmit; the TX-complete ISR must
            // notify the handle registered below
        }

        fn enable_rx() {}
        fn disable_rx() {}

        fn react_on_character_received(handle: Handle) {
            critical_section(|cs| *RX_HANDLE.get(cs) = Some(handle));
        }

        fn react_on_send_complete(handle: Handle) {
            critical_section(|cs| *TX_HANDLE.get(cs) = Some(handle));
        }
    }

    // ---- Silence timer (board hooks) ------------------------------

    struct SilenceTimer;

    impl CompareTimer for SilenceTimer {
        fn init(_period_us: u32) {}
        fn set_compare(_c0_us: u32, _c1_us: u32) {}
        fn start() { /* stop, clear flags, reactor::clear, zero, enable */ }
        fn stop() {}
        fn react_on_compare(_h0: Handle, _h1: Handle) {}
        fn react_on_overflow(_handle: Handle) {}
    }

    // ---- Datagram --------------------------------------------------

    const THERMOSTAT: u8 = 0x11;

    struct Frame {
        buf: [u8; 32],
        len: usize,
    }

    static FRAME: CsCell<Frame> = CsCell::new(Frame {
        buf: [0; 32],
        len: 0,
    });

    struct Poll;

    impl Datagram for Poll {
        fn reset() {
            critical_section(|cs| FRAME.get(cs).len = 0);
        }

        fn process_char(byte: u8) {
            critical_section(|cs| {
                let frame = FRAME.get(cs);
                if frame.len < frame.buf.len() {
                    frame.buf[frame.len] = byte;
                    frame.len += 1;
                }
            });
        }

        fn process_reply() -> Error {
            critical_section(|cs| {
                let frame = FRAME.get(cs);
                let reply = &frame.buf[..frame.len];

                if reply.len() < 5 {
                    return Error::BadCrc;
                }
                let (payload, tail) = reply.split_at(reply.len() - 2);
                if crc16(payload) != u16::from_le_bytes([tail[0], tail[1]]) {
                    return Error::BadCrc;
                }
                if payload[0] != THERMOSTAT {
                    return Error::IgnoreFrame;
                }

                // payload[3..5] carries the temperature register
                Error::Ok
            })
        }

        fn ready_request() {
            critical_section(|cs| {
                let frame = FRAME.get(cs);
                let crc = crc16(&frame.buf[..frame.len]);
                let len = frame.len;
                frame.buf[len..len + 2].copy_from_slice(&crc.to_le_bytes());
                frame.len += 2;
            });
        }

        fn ready_reply() {}

        fn status() -> Status {
            Status::InProgress
        }

        fn buffer() -> &'static [u8] {
            critical_section(|cs| {
                let frame = FRAME.get(cs);
                // Static storage; the arbiter only reads it
                unsafe {
                    core::slice::from_raw_parts(frame.buf.as_ptr(), frame.len)
                }
            })
        }
    }

    type Bus = Master<Poll, Rs485, SilenceTimer>;

    // ---- Application -----------------------------------------------

    /// Invoked by the arbiter when the bus is ours: build the request
    fn build_poll_request(_: Arg) {
        critical_section(|cs| {
            let frame = FRAME.get(cs);
            // Read one holding register at 0x0000
            frame.buf[..6]
                .copy_from_slice(&[THERMOSTAT, 0x03, 0x00, 0x00, 0x00, 0x01]);
            frame.len = 6;
        });
    }

    fn on_bus_error(arg: Arg) {
        let (address, code) = unpack(arg);
        reactor_rt::warn!("station {=u8}: error {=u8}", address, code);
    }

    fn on_poll_tick(_: Arg) {
        Bus::request_to_send(BUILD.handle());
    }

    struct BuildHandle(CsCell<Option<Handle>>);
    impl BuildHandle {
        fn handle(&self) -> Handle {
            critical_section(|cs| self.0.get(cs).unwrap())
        }
    }
    static BUILD: BuildHandle = BuildHandle(CsCell::new(None));

    #[exception]
    fn SysTick() {
        timer::on_tick_isr();
    }

    #[entry]
    fn main() -> ! {
        timer::init();

        let build = reactor::register(build_poll_request, Prio::High);
        critical_section(|cs| *BUILD.0.get(cs) = Some(build));

        let on_error = reactor::register(on_bus_error, Prio::Low);
        Bus::init(Some(on_error));

        // Poll the thermostat twice a second
        let poll = reactor::register(on_poll_tick, Prio::Low);
        poll.repeat(500);

        reactor::run();
    }
}

#[cfg(not(target_arch = "arm"))]
fn main() {}
