// SPDX-License-Identifier: MPL-2.0

//! The two rings of the codec command channel.
//!
//! Both rings live in driver-allocated, device-visible memory and pair a
//! driver-owned pointer with a hardware-owned pointer register:
//!
//! - the outbound ring carries 32-bit commands; the driver owns the write
//!   pointer and the hardware exposes its read (consumption) pointer,
//! - the inbound ring carries 64-bit (response, extended) entries; the
//!   hardware owns the write pointer and the driver keeps a software-only
//!   drain cursor.
//!
//! Pointers are entry indices interpreted modulo the (power-of-two)
//! capacity. Both pointers start at 0 and advance *before* use, so the
//! first entry of either ring goes to slot 1 and one slot always stays
//! reserved: a full ring is never mistaken for an empty one.

use core::sync::atomic::{fence, Ordering};

use kirq::io::RegisterRange;

use crate::regs;

/// Errors returned by the command channel.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChannelError {
    /// Ring configuration unsupported (capacity not a power of two in
    /// 2..=1024).
    InvalidArgs,
    /// The ring memory is smaller than the configured capacity needs.
    BufferTooSmall,
    /// No free slot: the hardware has not consumed enough entries yet.
    /// Recoverable; queue the entry and retry on the next notification.
    Full,
}

pub(crate) const CMD_ENTRY_SIZE: usize = 4;
pub(crate) const RSP_ENTRY_SIZE: usize = 8;

const MIN_ENTRIES: u16 = 2;
const MAX_ENTRIES: u16 = 1024;

fn check_capacity(capacity: u16, buf: &RegisterRange, entry_size: usize) -> Result<(), ChannelError> {
    if !capacity.is_power_of_two() || !(MIN_ENTRIES..=MAX_ENTRIES).contains(&capacity) {
        return Err(ChannelError::InvalidArgs);
    }
    if buf.len() < capacity as usize * entry_size {
        return Err(ChannelError::BufferTooSmall);
    }
    Ok(())
}

fn write_base(regs: &RegisterRange, lo_off: usize, hi_off: usize, buf: &RegisterRange) {
    let base = buf.base_addr() as u64;
    regs.write_once::<u32>(lo_off, base as u32);
    regs.write_once::<u32>(hi_off, (base >> 32) as u32);
}

/// The outbound command ring.
pub(crate) struct CmdRing {
    buf: RegisterRange,
    regs: RegisterRange,
    capacity: u16,
    /// Driver-owned write pointer: index of the last written entry.
    wp: u16,
}

impl CmdRing {
    /// Sets up the ring over `buf` and programs the hardware: base and
    /// size registers, both pointers zeroed.
    pub(crate) fn new(
        regs: RegisterRange,
        buf: RegisterRange,
        capacity: u16,
    ) -> Result<Self, ChannelError> {
        check_capacity(capacity, &buf, CMD_ENTRY_SIZE)?;

        write_base(&regs, regs::CORBLBASE, regs::CORBUBASE, &buf);
        regs.write_once::<u8>(regs::CORBSIZE, capacity.trailing_zeros() as u8);
        regs.write_once::<u16>(regs::CORBWP, 0);
        regs.write_once::<u16>(regs::CORBRP, 0);

        Ok(Self {
            buf,
            regs,
            capacity,
            wp: 0,
        })
    }

    fn mask(&self) -> u16 {
        self.capacity - 1
    }

    /// Number of entries the driver may write right now, against a fresh
    /// read of the hardware read pointer.
    pub(crate) fn free_slots(&self) -> u16 {
        let rp = self.regs.read_once::<u16>(regs::CORBRP) & self.mask();
        rp.wrapping_sub(self.wp).wrapping_sub(1) & self.mask()
    }

    /// Writes one entry and publishes the new write pointer.
    pub(crate) fn push(&mut self, entry: u32) -> Result<(), ChannelError> {
        if self.free_slots() == 0 {
            return Err(ChannelError::Full);
        }

        let slot = self.wp.wrapping_add(1) & self.mask();
        self.buf
            .write_once::<u32>(slot as usize * CMD_ENTRY_SIZE, entry);

        // The entry must be visible to the device before the pointer
        // moves past it.
        fence(Ordering::SeqCst);

        self.wp = slot;
        self.regs.write_once::<u16>(regs::CORBWP, slot);
        Ok(())
    }
}

/// The inbound response ring.
pub(crate) struct RspRing {
    buf: RegisterRange,
    regs: RegisterRange,
    capacity: u16,
    /// Driver-owned drain cursor: index of the last entry already read.
    rp: u16,
}

impl RspRing {
    pub(crate) fn new(
        regs: RegisterRange,
        buf: RegisterRange,
        capacity: u16,
    ) -> Result<Self, ChannelError> {
        check_capacity(capacity, &buf, RSP_ENTRY_SIZE)?;

        write_base(&regs, regs::RIRBLBASE, regs::RIRBUBASE, &buf);
        regs.write_once::<u8>(regs::RIRBSIZE, capacity.trailing_zeros() as u8);
        regs.write_once::<u16>(regs::RIRBWP, 0);

        Ok(Self {
            buf,
            regs,
            capacity,
            rp: 0,
        })
    }

    fn mask(&self) -> u16 {
        self.capacity - 1
    }

    /// Yields the next committed `(response, extended)` entry, advancing
    /// the drain cursor; `None` once caught up with the hardware write
    /// pointer. Only entries strictly between the cursor and a fresh read
    /// of the write pointer are ever touched.
    pub(crate) fn shift(&mut self) -> Option<(u32, u32)> {
        // The device commits an entry before moving its write pointer;
        // pair that with a fence before reading the pointer.
        fence(Ordering::SeqCst);
        let wp = self.regs.read_once::<u16>(regs::RIRBWP) & self.mask();
        if self.rp == wp {
            return None;
        }

        self.rp = self.rp.wrapping_add(1) & self.mask();
        let offset = self.rp as usize * RSP_ENTRY_SIZE;
        let response = self.buf.read_once::<u32>(offset);
        let extended = self.buf.read_once::<u32>(offset + 4);
        Some((response, extended))
    }
}
