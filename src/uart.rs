//! UART driver contract
//!
//! The runtime does not touch USART registers; it consumes a byte-level
//! driver through the [`Channel`] capability. A board crate implements
//! `Channel` per UART instance; its RX-complete ISR notifies the
//! registered handle with the received byte as argument, its TX
//! machinery fires the send-complete handle once the last byte has
//! left the shift register.
//!
//! Half-duplex RS-485 echo suppression is a protocol concern: the
//! Modbus arbiter disables RX before transmitting and re-enables it on
//! `frame_sent`.

use crate::reactor::Handle;

/// Data bits per character (9-bit mode is not supported)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Width {
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StopBits {
    One = 1,
    Two = 2,
}

/// Configuration option flags
pub mod options {
    pub const NONE: u8 = 0;
    /// One-wire (loopback-muted) mode
    pub const ONEWIRE: u8 = 1 << 1;
    /// Drive the RS-485 direction pin automatically
    pub const RS485: u8 = 1 << 2;
    /// Route the UART to its alternate pin position
    pub const MAP_TO_ALT_POSITION: u8 = 1 << 3;
    /// Start with the receiver off
    pub const DISABLE_RX: u8 = 1 << 4;
    /// Start with the transmitter off
    pub const DISABLE_TX: u8 = 1 << 5;
}

/// Compile-time UART configuration.
///
/// Everything the runtime needs from the line settings is the byte
/// duration; the rest is consumed by the board-level driver when it
/// programs the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub baud: u32,
    pub width: Width,
    pub parity: Parity,
    pub stop: StopBits,
    pub options: u8,
}

impl Config {
    pub const fn new(baud: u32, width: Width, parity: Parity, stop: StopBits) -> Self {
        Self {
            baud,
            width,
            parity,
            stop,
            options: options::NONE,
        }
    }

    pub const fn with_options(mut self, options: u8) -> Self {
        self.options = options;
        self
    }

    /// Check an option flag
    #[inline]
    pub const fn has(&self, option: u8) -> bool {
        self.options & option != 0
    }

    /// Bits on the wire per character: start + data + parity + stop
    pub const fn frame_bits(&self) -> u32 {
        1 + self.width as u32
            + self.stop as u32
            + match self.parity {
                Parity::None => 0,
                _ => 1,
            }
    }

    /// Duration of `tenths`/10 characters, in microseconds, rounded
    /// down. `byte_duration_us(15)` is one and a half character times.
    pub const fn byte_duration_us(&self, tenths: u32) -> u32 {
        self.frame_bits() * 1_000_000 / self.baud * tenths / 10
            + (self.frame_bits() * 1_000_000 % self.baud) * tenths / (10 * self.baud)
    }
}

/// Byte-level UART capability consumed by the protocol arbiters.
///
/// All functions are associated: an implementation is a unit type
/// standing for one hardware instance, selected at compile time.
pub trait Channel {
    /// Line settings this channel was built with
    const CONFIG: Config;

    /// Program the hardware per [`Self::CONFIG`]
    fn init();

    /// Start a non-blocking transmission. The send-complete handle is
    /// notified when the last byte has left the shift register.
    fn send(frame: &'static [u8]);

    fn enable_rx();
    fn disable_rx();

    /// The handle is notified with each received byte as its argument
    fn react_on_character_received(handle: Handle);

    /// The handle is notified once a `send` has fully drained
    fn react_on_send_complete(handle: Handle);

    /// Duration of `tenths`/10 characters in microseconds
    #[inline]
    fn byte_duration_us(tenths: u32) -> u32 {
        Self::CONFIG.byte_duration_us(tenths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODBUS_19200: Config =
        Config::new(19200, Width::Eight, Parity::None, StopBits::One);

    #[test]
    fn frame_bits_counts_overhead() {
        assert_eq!(MODBUS_19200.frame_bits(), 10);

        let with_parity =
            Config::new(9600, Width::Seven, Parity::Even, StopBits::Two);
        assert_eq!(with_parity.frame_bits(), 11);
    }

    #[test]
    fn byte_duration_at_19200_8n1() {
        // 10 bits at 19200 baud = 520.8 us
        assert_eq!(MODBUS_19200.byte_duration_us(10), 520);
        // 1.5 and 3.5 character times
        assert_eq!(MODBUS_19200.byte_duration_us(15), 781);
        assert_eq!(MODBUS_19200.byte_duration_us(35), 1822);
    }

    #[test]
    fn option_flags() {
        let cfg = MODBUS_19200.with_options(options::RS485 | options::DISABLE_TX);
        assert!(cfg.has(options::RS485));
        assert!(cfg.has(options::DISABLE_TX));
        assert!(!cfg.has(options::ONEWIRE));
    }
}
