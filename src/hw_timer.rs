//! Hardware compare/overflow timer contract
//!
//! The Modbus arbiter measures inter-character silence with one
//! hardware timer: two compare channels (T1.5 and T3.5) and the
//! overflow period (T4.0). Each received character restarts the timer
//! from zero, so the three reactor events fire only once the line has
//! actually been quiet that long.

use crate::reactor::Handle;

/// One hardware timer with two compare channels and an overflow event,
/// surfaced as reactor notifications.
///
/// An implementation is a unit type standing for one timer instance.
///
/// # Restart discipline
///
/// `start()` is a *restart* and must perform, in this order:
///
/// 1. stop the timer, so no further interrupt can fire;
/// 2. clear its pending compare/overflow interrupt flags;
/// 3. [`reactor::clear`](crate::reactor::clear) the pending bits of
///    every handle registered through [`react_on_compare`] /
///    [`react_on_overflow`];
/// 4. reset the counter to zero;
/// 5. re-enable.
///
/// Step 3 is the subtle one: a compare interrupt that fired just
/// before the restart may already have posted its reactor bit. Without
/// the purge the dispatch loop would deliver a timeout that belongs to
/// the previous measurement window.
///
/// [`react_on_compare`]: CompareTimer::react_on_compare
/// [`react_on_overflow`]: CompareTimer::react_on_overflow
pub trait CompareTimer {
    /// Configure the counter with its overflow period, in
    /// microseconds. The timer is left stopped.
    fn init(period_us: u32);

    /// Program the two compare channels, in microseconds from restart
    fn set_compare(c0_us: u32, c1_us: u32);

    /// Restart from zero, purging stale events (see trait docs)
    fn start();

    /// Freeze the counter; no further events fire
    fn stop();

    /// Handles notified when the respective compare channel matches
    fn react_on_compare(h0: Handle, h1: Handle);

    /// Handle notified on counter overflow
    fn react_on_overflow(handle: Handle);
}
