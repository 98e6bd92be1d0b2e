//! Modbus RTU frame arbitration
//!
//! RTU has no framing bytes; frames are delimited by silence. The
//! standard defines three thresholds in character times: T1.5 (maximum
//! intra-frame gap), T3.5 (end of frame) and, in this implementation,
//! T4.0 as a guard period before transmitting. A hardware
//! compare/overflow timer restarted on every received character turns
//! those thresholds into reactor events, and the [`master`] / [`slave`]
//! state machines sequence them.
//!
//! The frame content itself is opaque here: parsing and building live
//! behind the [`Datagram`](datagram::Datagram) capability.

pub mod crc;
pub mod datagram;
#[cfg(feature = "master")]
pub mod master;
#[cfg(feature = "slave")]
pub mod slave;

use crate::uart::Config;

/// Modbus RTU function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    ReadCoils = 1,
    ReadDiscreteInputs = 2,
    ReadHoldingRegisters = 3,
    ReadInputRegisters = 4,
    WriteSingleCoil = 5,
    WriteSingleRegister = 6,
    WriteMultipleCoils = 15,
    WriteMultipleRegisters = 16,
    ReadWriteMultipleRegisters = 23,
    Custom = 101,
}

/// Protocol status codes.
///
/// 1–8 are the standard exception codes carried in reply frames; the
/// high values are link-level conditions this stack reports through
/// the error reactor handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Error {
    Ok = 0,
    IllegalFunctionCode = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
    /// The slave did not answer within the reply window
    ReplyTimeout = 0xFA,
    /// A character arrived inside the inter-frame silent window
    FrameError = 0xFB,
    /// The reply CRC did not validate
    BadCrc = 0xFC,
    /// Frame addressed to another station
    IgnoreFrame = 0xFF,
}

impl Error {
    /// Wire/status code of this error
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Events driving the master and slave state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Bootstrap: leave the cold state
    CanStart,
    /// Byte from the UART RX handler
    CharReceived(u8),
    /// T1.5 elapsed since the last character
    T15Timeout,
    /// T3.5 elapsed since the last character
    T35Timeout,
    /// T4.0 elapsed since the last character
    T40Timeout,
    /// The UART drained the transmit frame
    FrameSent,
    /// A transmit request was queued (master)
    CheckPendings,
    /// Ready to send: the request frame is built (master, internal)
    Rts,
    /// The reply window expired (master, internal)
    ReplyTimeout,
}

/// Inter-character and inter-frame thresholds, microseconds.
///
/// Computed from the line settings at init; the standard floors apply
/// above 19200 baud where the proportional values would get too tight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub t15_us: u32,
    pub t35_us: u32,
    pub t40_us: u32,
}

impl Timing {
    pub const fn from_config(config: &Config) -> Self {
        Self {
            t15_us: floor(config.byte_duration_us(15), 750),
            t35_us: floor(config.byte_duration_us(35), 1_750),
            t40_us: floor(config.byte_duration_us(40), 2_000),
        }
    }
}

const fn floor(value: u32, minimum: u32) -> u32 {
    if value > minimum {
        value
    } else {
        minimum
    }
}
