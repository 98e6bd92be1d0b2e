//! Modbus RTU master arbiter
//!
//! Requestors queue transmit requests by reactor handle; whenever the
//! bus goes idle the highest-priority one is invoked to build a
//! request, which is sent after one reactor hop. The reply is
//! accumulated between T1.5 silences and decoded after T3.5; T4.0
//! then guards the bus before the next request so a straggling
//! tail-of-frame character cannot collide with it.
//!
//! One master per build: the state machine lives in module statics,
//! parameterized at compile time by the three capabilities.

use core::marker::PhantomData;

use super::datagram::Datagram;
use super::{Error, Event, Timing};
use crate::config::CFG_MODBUS_REPLY_TIMEOUT;
use crate::critical::critical_section;
use crate::cs_cell::CsCell;
use crate::hw_timer::CompareTimer;
use crate::mask::Mask;
use crate::reactor::{self, Handle};
use crate::timer::Instance;
use crate::types::{Arg, Prio};
use crate::uart::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    Cold,
    Initial,
    Idle,
    Sending,
    WaitingForReply,
    Reception,
    ControlAndWaiting,
    PreventRace,
}

struct MasterState {
    state: State,
    /// Queued transmit requestors, served in priority order
    pending: Mask,
    /// Armed reply timeout, cancelled on first reply character
    timeout: Option<Instance>,
    /// A request frame is built and waiting for the `Rts` hop
    staged: bool,
    /// Station addressed by the exchange in flight, for error reports
    address: u8,
    on_error: Option<Handle>,
    on_reply_timeout: Option<Handle>,
    on_ready_to_send: Option<Handle>,
}

static STATE: CsCell<MasterState> = CsCell::new(MasterState {
    state: State::Cold,
    pending: Mask::EMPTY,
    timeout: None,
    staged: false,
    address: 0,
    on_error: None,
    on_reply_timeout: None,
    on_ready_to_send: None,
});

/// The master arbiter over a datagram codec, a UART and the silence
/// timer
pub struct Master<D: Datagram, C: Channel, T: CompareTimer> {
    _caps: PhantomData<(D, C, T)>,
}

impl<D: Datagram, C: Channel, T: CompareTimer> Master<D, C, T> {
    /// Wire the capabilities to the reactor and start the machine.
    ///
    /// `on_error` receives protocol errors with `(slave_address,
    /// error_code)` packed into its argument. Call once, before
    /// [`reactor::run`](crate::reactor::run).
    pub fn init(on_error: Option<Handle>) {
        let timing = Timing::from_config(&C::CONFIG);

        T::init(timing.t40_us);
        C::init();
        T::set_compare(timing.t15_us, timing.t35_us);

        T::react_on_compare(
            reactor::register(Self::on_t15, Prio::Low),
            reactor::register(Self::on_t35, Prio::Low),
        );
        T::react_on_overflow(reactor::register(Self::on_t40, Prio::Low));

        C::react_on_character_received(reactor::register(Self::on_char, Prio::High));
        C::react_on_send_complete(reactor::register(Self::on_frame_sent, Prio::High));

        // Low priority on purpose: requestors queued by the same pass
        // run before the transmit fires
        let ready_to_send = reactor::register(Self::on_ready_to_send, Prio::Low);
        let reply_timeout = reactor::register(Self::on_reply_timeout, Prio::Low);

        critical_section(|cs| {
            let state = STATE.get(cs);
            state.state = State::Cold;
            state.pending = Mask::EMPTY;
            state.timeout = None;
            state.staged = false;
            state.address = 0;
            state.on_error = on_error;
            state.on_reply_timeout = Some(reply_timeout);
            state.on_ready_to_send = Some(ready_to_send);
        });

        Self::process(Event::CanStart);
    }

    /// Queue a transmit request. The requestor handle is invoked
    /// synchronously once the bus is free and must build its request
    /// into the datagram buffer; the CRC is appended and the frame
    /// sent after one reactor hop.
    ///
    /// Re-requesting while already queued is idempotent. Pending
    /// requests survive protocol errors; the next idle window serves
    /// the next one.
    pub fn request_to_send(requestor: Handle) {
        critical_section(|cs| STATE.get(cs).pending.append(requestor));
        Self::process(Event::CheckPendings);
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
        // The RS-485 transceiver echoed nothing while RX was off;
        // listen again before the reply window opens
        C::enable_rx();
        Self::process(Event::FrameSent);
    }

    fn on_reply_timeout(_: Arg) {
        Self::process(Event::ReplyTimeout);
    }

    fn on_ready_to_send(_: Arg) {
        Self::process(Event::Rts);
    }

    // -- state machine ------------------------------------------------

    fn process(event: Event) {
        use Event::*;
        use State::*;

        let from = critical_section(|cs| STATE.get(cs).state);

        let to = match (from, event) {
            (Cold, CanStart) => Some(Initial),

            (Initial, T35Timeout) => Some(Idle),
            (Initial, CharReceived(_)) => {
                T::start();
                None
            }

            (Idle, CheckPendings) => {
                Self::pop_next_request();
                None
            }
            (Idle, Rts) => {
                critical_section(|cs| STATE.get(cs).staged = false);
                C::disable_rx();
                C::send(D::buffer());
                Some(Sending)
            }
            (Idle, CharReceived(_)) => Some(Initial),

            (Sending, FrameSent) => {
                Self::arm_reply_timeout();
                D::reset();
                Some(WaitingForReply)
            }

            (WaitingForReply, ReplyTimeout) => {
                Self::raise_error(Error::ReplyTimeout);
                Some(Idle)
            }
            (WaitingForReply, CharReceived(byte)) => {
                Self::handle_char(byte);
                Some(Reception)
            }

            (Reception, CharReceived(byte)) => {
                Self::handle_char(byte);
                None
            }
            (Reception, T15Timeout) => Some(ControlAndWaiting),

            (ControlAndWaiting, CharReceived(_)) => {
                Self::raise_error(Error::FrameError);
                Some(Idle)
            }
            (ControlAndWaiting, T35Timeout) => {
                Self::process_reply();
                Some(PreventRace)
            }

            (PreventRace, T40Timeout) => Some(Idle),

            _ => None,
        };

        if let Some(to) = to {
            crate::trace!("modbus master: {} -> {}", from, to);
            critical_section(|cs| STATE.get(cs).state = to);
            Self::enter(to);
        }
    }

    fn enter(state: State) {
        match state {
            State::Initial => T::start(),
            State::Idle => Self::pop_next_request(),
            State::Reception => Self::cancel_reply_timeout(),
            _ => {}
        }
    }

    // -- actions ------------------------------------------------------

    /// Serve the highest-priority queued requestor: it fills the
    /// buffer synchronously, the CRC is appended, and the send is
    /// decoupled through the ready-to-send handle so the transition
    /// happens outside this action.
    fn pop_next_request() {
        let next = critical_section(|cs| {
            let state = STATE.get(cs);
            // A frame already staged must leave first
            if state.staged {
                return None;
            }
            state.pending.pop()
        });

        let Some(next) = next else { return };

        D::reset();
        next.invoke(0);
        D::ready_request();

        let address = D::buffer().first().copied().unwrap_or(0);
        let ready = critical_section(|cs| {
            let state = STATE.get(cs);
            state.staged = true;
            state.address = address;
            state.on_ready_to_send
        });
        if let Some(ready) = ready {
            ready.notify(0);
        }
    }

    fn handle_char(byte: u8) {
        // Every character restarts the silence thresholds
        T::start();
        D::process_char(byte);
    }

    fn arm_reply_timeout() {
        let handle = critical_section(|cs| STATE.get(cs).on_reply_timeout);
        if let Some(handle) = handle {
            let instance = handle.delay(CFG_MODBUS_REPLY_TIMEOUT);
            critical_section(|cs| STATE.get(cs).timeout = Some(instance));
        }
    }

    fn cancel_reply_timeout() {
        let timeout = critical_section(|cs| STATE.get(cs).timeout.take());
        if let Some(timeout) = timeout {
            timeout.cancel();
        }
    }

    fn process_reply() {
        let verdict = D::process_reply();
        if verdict != Error::Ok {
            Self::raise_error(verdict);
        }
    }

    /// Post `(slave_address, error_code)` to the user's error handle
    fn raise_error(error: Error) {
        crate::warn!("modbus master: {}", error);

        let (on_error, address) = critical_section(|cs| {
            let state = STATE.get(cs);
            (state.on_error, state.address)
        });
        if let Some(on_error) = on_error {
            on_error.notify2(address, error.code());
        }
    }

    /// Tear down the machine. Host test support.
    #[doc(hidden)]
    pub fn reset() {
        critical_section(|cs| {
            let state = STATE.get(cs);
            state.state = State::Cold;
            state.pending = Mask::EMPTY;
            state.timeout = None;
            state.staged = false;
            state.address = 0;
            state.on_error = None;
            state.on_reply_timeout = None;
            state.on_ready_to_send = None;
        });
    }
}
