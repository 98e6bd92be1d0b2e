//! The datagram capability: frame storage, parsing and building
//!
//! The arbiters treat the frame as opaque. A concrete datagram —
//! typically generated from a register map, holding a 256-byte buffer
//! — implements this trait; the state machines only sequence its
//! calls against the silence windows.

use super::Error;

/// Verdict on the frame accumulated since the last `reset`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Status {
    /// Addressed to this station and CRC-valid
    GoodFrame = 0,
    /// Addressed to another station
    NotForMe = 1,
    /// CRC mismatch
    BadCrc = 2,
    /// Frame still being accumulated
    InProgress = 3,
}

/// Frame buffer and codec consumed by the master and slave arbiters.
///
/// Associated functions only: an implementation is a unit type owning
/// a static buffer, selected at compile time.
pub trait Datagram {
    /// Drop any accumulated frame and restart parsing
    fn reset();

    /// Accumulate one received byte (updates the running CRC)
    fn process_char(byte: u8);

    /// Decode the completed reply frame (master). Returns [`Error::Ok`]
    /// or the condition to report.
    fn process_reply() -> Error;

    /// Finalize the built request: append the CRC (master)
    fn ready_request();

    /// Build the reply for the accumulated request, in place (slave)
    fn ready_reply();

    /// Verdict on the accumulated frame
    fn status() -> Status;

    /// Image of the current frame, request or reply, CRC included.
    /// Byte 0 is the station address.
    fn buffer() -> &'static [u8];
}
