// SPDX-License-Identifier: MPL-2.0

//! The command-channel block of the controller register file.
//!
//! Offsets are bytes from the start of the controller's (single) memory
//! range. Ring size registers hold the base-2 logarithm of the entry
//! count; pointer registers hold plain entry indices.

use bitflags::bitflags;

/// Outbound ring base address, low 32 bits.
pub const CORBLBASE: usize = 0x40;
/// Outbound ring base address, high 32 bits.
pub const CORBUBASE: usize = 0x44;
/// Outbound ring write pointer (driver-owned).
pub const CORBWP: usize = 0x48;
/// Outbound ring read pointer (hardware-owned; read-only to the driver
/// after bring-up).
pub const CORBRP: usize = 0x4a;
/// Outbound ring control.
pub const CORBCTL: usize = 0x4c;
/// Outbound ring status.
pub const CORBSTS: usize = 0x4d;
/// Outbound ring size (log2 of the entry count).
pub const CORBSIZE: usize = 0x4e;

/// Inbound ring base address, low 32 bits.
pub const RIRBLBASE: usize = 0x50;
/// Inbound ring base address, high 32 bits.
pub const RIRBUBASE: usize = 0x54;
/// Inbound ring write pointer (hardware-owned).
pub const RIRBWP: usize = 0x58;
/// Response interrupt count.
pub const RINTCNT: usize = 0x5a;
/// Inbound ring control.
pub const RIRBCTL: usize = 0x5c;
/// Inbound ring status.
pub const RIRBSTS: usize = 0x5d;
/// Inbound ring size (log2 of the entry count).
pub const RIRBSIZE: usize = 0x5e;

/// Bytes of the register file the command channel needs mapped.
pub const REG_WINDOW: usize = 0x80;

bitflags! {
    /// Outbound ring control bits.
    pub struct CorbControl: u8 {
        /// Raise an interrupt on a memory error.
        const MEM_ERR_INTR = 1 << 0;
        /// Run the outbound DMA engine.
        const DMA_RUN = 1 << 1;
    }
}

bitflags! {
    /// Inbound ring control bits.
    pub struct RirbControl: u8 {
        /// Raise an interrupt when responses arrive.
        const INTR_ENABLE = 1 << 0;
        /// Run the inbound DMA engine.
        const DMA_RUN = 1 << 1;
        /// Raise an interrupt on response overrun.
        const OVERRUN_INTR = 1 << 2;
    }
}

bitflags! {
    /// Inbound ring status bits.
    ///
    /// The register reads and writes plainly: the driver acknowledges a
    /// condition by writing the register back with that bit cleared.
    pub struct RirbStatus: u8 {
        /// Responses have been written since the last acknowledgment.
        const RESPONSE_INTR = 1 << 0;
        /// The hardware overran the inbound ring.
        const OVERRUN = 1 << 2;
    }
}
