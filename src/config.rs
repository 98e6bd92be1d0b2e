//! Compile-time configuration for the runtime
//!
//! These constants bound the fixed tables the runtime owns. They are
//! deliberately small: the target class is a couple of KB of flash.

/// Width of the reactor handler table and of the pending bitset.
///
/// Must not exceed 32: a handle is a bit index into a single `u32`.
pub const CFG_REACTOR_HANDLERS: usize = 32;

/// Number of slots in the software timer ring
pub const CFG_TIMER_SLOTS: usize = 16;

/// Periodic tick rate in Hz (1 kHz nominal; an RTC-fed 1.024 ms period
/// works just as well, all deadline arithmetic is relative)
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Depth of the EEPROM operation queue
pub const CFG_EEPROM_QUEUE_DEPTH: usize = 8;

/// EEPROM page size in bytes (one wear-leveling counter per page)
pub const CFG_EEPROM_PAGE_SIZE: usize = 64;

/// Modbus master reply timeout, in ticks
pub const CFG_MODBUS_REPLY_TIMEOUT: u32 = 100;

/// Largest Modbus RTU frame the datagram layer is expected to hold
pub const CFG_MODBUS_FRAME_SIZE: usize = 256;
