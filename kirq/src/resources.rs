// SPDX-License-Identifier: MPL-2.0

//! The resource handoff from device enumeration.
//!
//! Enumeration assigns each device a list of memory ranges and interrupt
//! lines and hands it to the driver at attach time, opaquely: the driver
//! validates the shape of the list against its device's programming model
//! and fails attach if it does not match.

use smallvec::SmallVec;

/// A physical memory range assigned to a device.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MemRange {
    /// First byte of the range.
    pub base: usize,
    /// Size of the range in bytes.
    pub size: usize,
}

/// The resources assigned to one device instance.
#[derive(Clone, Debug, Default)]
pub struct DeviceResources {
    mem_ranges: SmallVec<[MemRange; 2]>,
    irqs: SmallVec<[u8; 1]>,
}

impl DeviceResources {
    /// Creates an empty resource list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a memory range.
    pub fn push_mem_range(&mut self, range: MemRange) {
        self.mem_ranges.push(range);
    }

    /// Appends an interrupt line.
    pub fn push_irq(&mut self, irq: u8) {
        self.irqs.push(irq);
    }

    /// Returns the assigned memory ranges.
    pub fn mem_ranges(&self) -> &[MemRange] {
        &self.mem_ranges
    }

    /// Returns the assigned interrupt lines.
    pub fn irqs(&self) -> &[u8] {
        &self.irqs
    }
}
