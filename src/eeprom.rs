//! EEPROM service: operation queue and persisted state
//!
//! NVM writes take milliseconds; nothing here busy-waits. Writers
//! queue an [`Operation`] and the ready interrupt drains the queue one
//! command at a time through the reactor, so the bus time between
//! commands belongs to the application.
//!
//! Two persisted-state schemes sit on top:
//!
//! * [`Counter`] — a 32-bit counter wear-leveled across four banks of
//!   one page, costing one program per increment and one erase per 64.
//! * [`Storage`] — an arbitrary `Copy` struct guarded by a Fletcher-16
//!   checksum, silently re-formatted with defaults when invalid.

use core::marker::PhantomData;

use heapless::Deque;

use crate::alert::{self, Fault};
use crate::config::{CFG_EEPROM_PAGE_SIZE, CFG_EEPROM_QUEUE_DEPTH};
use crate::critical::critical_section;
use crate::cs_cell::CsCell;
use crate::reactor::{self, Handle};
use crate::types::{Arg, Prio};

/// One EEPROM page image
pub type Page = [u8; CFG_EEPROM_PAGE_SIZE];

/// Non-volatile memory capability.
///
/// An implementation is a unit type standing for one NVM controller,
/// with page-granular access. `write_page` has program-only semantics:
/// bits can only go from 1 to 0, a 0xFF byte in the image leaves the
/// cell untouched. `erase_write_page` erases first.
pub trait Nvm {
    /// Number of pages available for wear-leveled counters
    const PAGES: u8;

    fn read(page: u8, out: &mut Page);
    fn write_page(page: u8, image: &Page);
    fn erase_write_page(page: u8, image: &Page);

    /// Arm the NVM-ready interrupt: notify the handle as soon as the
    /// controller can accept a command (immediately when idle).
    fn react_on_ready(handle: Handle);
}

/// A queued EEPROM operation. `do_operation` is called with the
/// controller guaranteed ready and must issue exactly one NVM command.
pub trait Operation: Sync {
    fn do_operation(&self);
}

struct OpQueue {
    ops: Deque<&'static dyn Operation, CFG_EEPROM_QUEUE_DEPTH>,
    ready: Option<Handle>,
    arm: Option<fn(Handle)>,
}

static QUEUE: CsCell<OpQueue> = CsCell::new(OpQueue {
    ops: Deque::new(),
    ready: None,
    arm: None,
});

/// Register the queue with the reactor and bind it to an NVM backend.
/// Call once before [`reactor::run`].
pub fn init<N: Nvm>() {
    let handle = reactor::register(on_ready, Prio::Low);

    critical_section(|cs| {
        let queue = QUEUE.get(cs);
        queue.ready = Some(handle);
        queue.arm = Some(N::react_on_ready);
    });
}

/// Queue an operation. A full queue is a fatal fault: it means more
/// outstanding writers than the build was sized for.
pub fn request(op: &'static dyn Operation) {
    let (arm, ready) = critical_section(|cs| {
        let queue = QUEUE.get(cs);
        alert::stop_if(queue.ops.push_back(op).is_err(), Fault::EepromQueueFull);
        (queue.arm, queue.ready)
    });

    if let (Some(arm), Some(ready)) = (arm, ready) {
        arm(ready);
    }
}

/// Reactor handler for the NVM-ready notification: pop one operation,
/// run it, re-arm while work remains
fn on_ready(_arg: Arg) {
    let op = critical_section(|cs| QUEUE.get(cs).ops.pop_front());

    if let Some(op) = op {
        op.do_operation();
    }

    let (arm, ready) = critical_section(|cs| {
        let queue = QUEUE.get(cs);
        if queue.ops.is_empty() {
            (None, None)
        } else {
            (queue.arm, queue.ready)
        }
    });

    if let (Some(arm), Some(ready)) = (arm, ready) {
        arm(ready);
    }
}

// ---------------------------------------------------------------------
// Wear-leveled counter
// ---------------------------------------------------------------------

const BANK_SIZE: usize = 16;
const BANK_COUNT: usize = CFG_EEPROM_PAGE_SIZE / BANK_SIZE;
const BYTES_IN_BANK: usize = BANK_SIZE - 2 * 4;
const BITS_IN_BANK: u8 = (BYTES_IN_BANK * 8) as u8;

struct CounterState {
    count: u32,
    bank: u8,
    /// Increments recorded in the current bank since its base count
    bits_used: u8,
    /// A write is owed to the page
    dirty: bool,
}

/// A 32-bit persistent counter on one EEPROM page.
///
/// Layout: four 16-byte banks of `{u32 counter, [u8; 8] bit-unary,
/// u32 !counter}`. An increment clears one more bit of the unary field
/// (a program-only write); after 64 increments the next bank is
/// rotated in carrying the new base count, which is the page's only
/// erase. Power-up picks the valid bank with the largest base count
/// and adds its cleared bits back.
pub struct Counter<N: Nvm> {
    state: CsCell<CounterState>,
    page: u8,
    _nvm: PhantomData<N>,
}

impl<N: Nvm> Counter<N> {
    pub const fn new(page: u8) -> Self {
        Self {
            state: CsCell::new(CounterState {
                count: 0,
                bank: 0,
                bits_used: 0,
                dirty: false,
            }),
            page,
            _nvm: PhantomData,
        }
    }

    /// Recover the count from the page, formatting an unused page.
    /// Call once at boot, before the dispatch loop runs.
    pub fn init(&self) {
        let mut image: Page = [0xFF; CFG_EEPROM_PAGE_SIZE];
        N::read(self.page, &mut image);

        let mut best: Option<(u8, u32)> = None;
        for bank in 0..BANK_COUNT as u8 {
            if let Some(base) = read_bank_base(&image, bank) {
                match best {
                    Some((_, b)) if b >= base => {}
                    _ => best = Some((bank, base)),
                }
            }
        }

        critical_section(|cs| {
            let state = self.state.get(cs);

            match best {
                None => {
                    // Fresh page: format bank 0 at zero
                    state.count = 0;
                    state.bank = 0;
                    state.bits_used = 0;
                    N::erase_write_page(self.page, &bank_image(0, 0, 0));
                }
                Some((bank, base)) => {
                    let used = count_bank_bits(&image, bank);
                    state.count = base + used as u32;
                    state.bank = bank;
                    state.bits_used = used;

                    // A bank read back full rolls straight over
                    if used >= BITS_IN_BANK {
                        state.bank = (bank + 1) % BANK_COUNT as u8;
                        state.bits_used = 0;
                        N::erase_write_page(
                            self.page,
                            &bank_image(state.bank, state.count, 0),
                        );
                    }
                }
            }

            state.dirty = false;
        });
    }

    /// Increment by one. Returns immediately; the NVM write happens in
    /// the background through the operation queue.
    pub fn increment(&'static self) {
        critical_section(|cs| {
            let state = self.state.get(cs);
            state.count = state.count.wrapping_add(1);
            state.bits_used += 1;
            state.dirty = true;
        });

        request(self);
    }

    /// Current count, including increments not yet flushed to NVM
    pub fn get_count(&self) -> u32 {
        critical_section(|cs| self.state.get(cs).count)
    }
}

impl<N: Nvm> Operation for Counter<N> {
    fn do_operation(&self) {
        let snapshot = critical_section(|cs| {
            let state = self.state.get(cs);
            if !state.dirty {
                return None;
            }
            state.dirty = false;

            if state.bits_used >= BITS_IN_BANK {
                // Bank exhausted: rotate, carrying any overshoot into
                // the fresh bank
                state.bank = (state.bank + 1) % BANK_COUNT as u8;
                state.bits_used -= BITS_IN_BANK;
                Some((true, state.bank, state.count, state.bits_used))
            } else {
                Some((false, state.bank, state.count, state.bits_used))
            }
        });

        if let Some((rotate, bank, count, bits_used)) = snapshot {
            let image = bank_image(bank, count - bits_used as u32, bits_used);
            if rotate {
                N::erase_write_page(self.page, &image);
            } else {
                N::write_page(self.page, &image);
            }
        }
    }
}

// State is only touched under critical sections
unsafe impl<N: Nvm> Sync for Counter<N> {}

/// Base count of a bank, or `None` if the redundancy check fails
fn read_bank_base(image: &Page, bank: u8) -> Option<u32> {
    let offset = bank as usize * BANK_SIZE;
    let counter = u32::from_le_bytes(image[offset..offset + 4].try_into().unwrap());
    let not_counter =
        u32::from_le_bytes(image[offset + 12..offset + 16].try_into().unwrap());

    (counter == !not_counter).then_some(counter)
}

/// Cleared (consumed) bits in a bank's unary field
fn count_bank_bits(image: &Page, bank: u8) -> u8 {
    let offset = bank as usize * BANK_SIZE + 4;
    let mut used = 0u8;

    for &byte in &image[offset..offset + BYTES_IN_BANK] {
        if byte == 0 {
            used += 8;
            continue;
        }
        used += byte.leading_zeros() as u8;
        break;
    }

    used
}

/// Full page image for a bank snapshot. Foreign banks are 0xFF so a
/// program-only write leaves them untouched.
fn bank_image(bank: u8, base: u32, bits_used: u8) -> Page {
    let mut image: Page = [0xFF; CFG_EEPROM_PAGE_SIZE];
    let offset = bank as usize * BANK_SIZE;

    image[offset..offset + 4].copy_from_slice(&base.to_le_bytes());
    for (index, byte) in image[offset + 4..offset + 4 + BYTES_IN_BANK]
        .iter_mut()
        .enumerate()
    {
        let cleared = (bits_used as usize).saturating_sub(index * 8).min(8);
        *byte = if cleared == 8 { 0 } else { 0xFFu8 >> cleared };
    }
    image[offset + 12..offset + 16].copy_from_slice(&(!base).to_le_bytes());

    image
}

// ---------------------------------------------------------------------
// Checksummed structured storage
// ---------------------------------------------------------------------

/// Position-weighted Fletcher-16 over `bytes`, seeded with a layout
/// version so incompatible layouts never validate
pub fn fletcher16(version: u16, bytes: &[u8]) -> u16 {
    let mut sum1 = version % 255;
    let mut sum2 = 0xFFu16;

    for &byte in bytes {
        sum1 = (sum1 + byte as u16) % 255;
        sum2 = (sum2 + sum1) % 255;
    }

    (sum2 << 8) | sum1
}

/// A fixed-size user struct persisted on a dedicated page, with a
/// Fletcher-16 checksum in the final two bytes.
///
/// On [`init`](Storage::init), a checksum mismatch (fresh device,
/// layout change) silently writes the in-RAM defaults back. `T` must
/// be `Copy` and should be `#[repr(C)]` without padding, since the
/// checksum covers its raw bytes.
pub struct Storage<N: Nvm, T: Copy, const VERSION: u16 = 0> {
    data: CsCell<T>,
    page: u8,
    _nvm: PhantomData<N>,
}

impl<N: Nvm, T: Copy, const VERSION: u16> Storage<N, T, VERSION> {
    pub const fn new(page: u8, defaults: T) -> Self {
        assert!(core::mem::size_of::<T>() <= CFG_EEPROM_PAGE_SIZE - 2);

        Self {
            data: CsCell::new(defaults),
            page,
            _nvm: PhantomData,
        }
    }

    fn image(&self, value: &T) -> Page {
        let size = core::mem::size_of::<T>();
        let mut image: Page = [0xFF; CFG_EEPROM_PAGE_SIZE];

        let bytes = unsafe {
            core::slice::from_raw_parts(value as *const T as *const u8, size)
        };
        image[..size].copy_from_slice(bytes);

        let checksum = fletcher16(VERSION, bytes);
        image[CFG_EEPROM_PAGE_SIZE - 2..].copy_from_slice(&checksum.to_le_bytes());

        image
    }

    /// Load the stored value, or persist the defaults when the page
    /// does not validate. Call once at boot.
    pub fn init(&self) {
        let size = core::mem::size_of::<T>();
        let mut image: Page = [0xFF; CFG_EEPROM_PAGE_SIZE];
        N::read(self.page, &mut image);

        let stored = u16::from_le_bytes(
            image[CFG_EEPROM_PAGE_SIZE - 2..].try_into().unwrap(),
        );

        if stored == fletcher16(VERSION, &image[..size]) {
            let value = unsafe {
                core::ptr::read_unaligned(image.as_ptr() as *const T)
            };
            critical_section(|cs| *self.data.get(cs) = value);
        } else {
            let defaults = critical_section(|cs| *self.data.get(cs));
            N::erase_write_page(self.page, &self.image(&defaults));
        }
    }

    /// Copy of the current in-RAM value
    pub fn get(&self) -> T {
        critical_section(|cs| *self.data.get(cs))
    }

    /// Replace the in-RAM value; call [`update`](Storage::update) to
    /// persist it
    pub fn set(&self, value: T) {
        critical_section(|cs| *self.data.get(cs) = value);
    }

    /// Queue a background write of the current value
    pub fn update(&'static self) {
        request(self);
    }
}

impl<N: Nvm, T: Copy, const VERSION: u16> Operation for Storage<N, T, VERSION> {
    fn do_operation(&self) {
        let value = critical_section(|cs| *self.data.get(cs));
        N::erase_write_page(self.page, &self.image(&value));
    }
}

// CsCell is Sync; T travels only under critical sections
unsafe impl<N: Nvm, T: Copy, const VERSION: u16> Sync for Storage<N, T, VERSION> {}

/// Tear down the operation queue. Host test support.
#[doc(hidden)]
pub fn reset() {
    critical_section(|cs| {
        let queue = QUEUE.get(cs);
        while queue.ops.pop_front().is_some() {}
        queue.ready = None;
        queue.arm = None;
    });
}
