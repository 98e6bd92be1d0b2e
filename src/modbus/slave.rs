//! Modbus RTU slave arbiter
//!
//! Accumulates a request between T1.5 silences, judges it at T3.5 and
//! answers only after T4.0, so the bus has seen a full inter-frame gap
//! before the reply's first byte. Broadcast frames (address byte 0)
//! are executed but never answered; frames with a bad CRC or another
//! station's address fall silently back to idle.
//!
//! The reply buffer is prepared when entering `reply`, strictly after
//! the frame has been judged good; transmission starts on entering
//! `emission`. One slave per build, like the master.

use core::marker::PhantomData;

use super::datagram::{Datagram, Status};
use super::{Event, Timing};
use crate::critical::critical_section;
use crate::cs_cell::CsCell;
use crate::hw_timer::CompareTimer;
use crate::reactor;
use crate::types::{Arg, Prio};
use crate::uart::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    Cold,
    Initial,
    Idle,
    Reception,
    ControlAndWaiting,
    Reply,
    Emission,
}

static STATE: CsCell<State> = CsCell::new(State::Cold);

/// The slave arbiter over a datagram codec, a UART and the silence
/// timer
pub struct Slave<D: Datagram, C: Channel, T: CompareTimer> {
    _caps: PhantomData<(D, C, T)>,
}

impl<D: Datagram, C: Channel, T: CompareTimer> Slave<D, C, T> {
    /// Wire the capabilities to the reactor and start the machine.
    /// Call once, before [`reactor::run`](crate::reactor::run).
    pub fn init() {
        let timing = Timing::from_config(&C::CONFIG);

        T::init(timing.t40_us);
        C::init();
        T::set_compare(timing.t15_us, timing.t35_us);

        // Character reception outranks the timeouts of the same pass
        C::react_on_character_received(reactor::register(Self::on_char, Prio::High));

        T::react_on_compare(
            reactor::register(Self::on_t15, Prio::High),
            reactor::register(Self::on_t35, Prio::High),
        );
        T::react_on_overflow(reactor::register(Self::on_t40, Prio::Low));

        C::react_on_send_complete(reactor::register(Self::on_frame_sent, Prio::High));

        critical_section(|cs| *STATE.get(cs) = State::Cold);
        Self::process(Event::CanStart);
    }

    // -- reactor handlers ---------------------------------------------

    fn on_char(arg: Arg) {
        Self::process(Event::CharReceived(arg as u8));
    }

    fn on_t15(_: Arg) {
        Self::process(Event::T15Timeout);
    }

    fn on_t35(_: Arg) {
        Self::process(Event::T35Timeout);
    }

    fn on_t40(_: Arg) {
        Self::process(Event::T40Timeout);
    }

    fn on_frame_sent(_: Arg) {
        Self::process(Event::FrameSent);
    }

    // -- state machine ------------------------------------------------

    fn process(event: Event) {
        use Event::*;
        use State::*;

        let from = critical_section(|cs| *STATE.get(cs));

        let to = match (from, event) {
            (Cold, CanStart) => Some(Initial),

            (Initial, T35Timeout) => Some(Idle),
            (Initial, CharReceived(_)) => {
                T::start();
                None
            }

            (Idle, CharReceived(byte)) => {
                Self::handle_char(byte);
                Some(Reception)
            }

            (Reception, T15Timeout) => Some(ControlAndWaiting),
            (Reception, CharReceived(byte)) => {
                Self::handle_char(byte);
                None
            }

            (ControlAndWaiting, T35Timeout) => {
                if Self::must_reply() {
                    Some(Reply)
                } else {
                    Some(Idle)
                }
            }
            (ControlAndWaiting, CharReceived(_)) => Some(Initial),

            // A character here is unlikely, but the bus is shared
            (Reply, CharReceived(_)) => Some(Initial),
            (Reply, T40Timeout) => {
                if Self::broadcast() {
                    // Broadcasts are executed, never answered
                    Some(Idle)
                } else {
                    Some(Emission)
                }
            }

            (Emission, FrameSent) => {
                C::enable_rx();
                Some(Initial)
            }

            _ => None,
        };

        if let Some(to) = to {
            crate::trace!("modbus slave: {} -> {}", from, to);
            critical_section(|cs| *STATE.get(cs) = to);
            Self::enter(to);
        }
    }

    fn enter(state: State) {
        match state {
            State::Initial => T::start(),
            State::Idle => D::reset(),
            State::Reply => D::ready_reply(),
            State::Emission => {
                C::disable_rx();
                C::send(D::buffer());
            }
            _ => {}
        }
    }

    // -- guards and actions -------------------------------------------

    fn handle_char(byte: u8) {
        // Every character restarts the silence thresholds
        T::start();
        D::process_char(byte);
    }

    fn must_reply() -> bool {
        match D::status() {
            Status::GoodFrame => true,
            Status::NotForMe => {
                crate::trace!("modbus slave: frame is not for me");
                false
            }
            Status::BadCrc => {
                crate::warn!("modbus slave: bad CRC");
                false
            }
            Status::InProgress => false,
        }
    }

    fn broadcast() -> bool {
        D::buffer().first().copied() == Some(0)
    }

    /// Tear down the machine. Host test support.
    #[doc(hidden)]
    pub fn reset() {
        critical_section(|cs| *STATE.get(cs) = State::Cold);
    }
}
