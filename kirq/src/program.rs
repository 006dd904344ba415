// SPDX-License-Identifier: MPL-2.0

//! Interrupt programs.
//!
//! An interrupt program is an ordered, bounded list of typed commands over
//! a fixed set of register ranges and a small scratch-register file. A
//! driver builds one program per device instance at attach time and hands
//! it to [`IrqDispatcher::register`]; the kernel executes it on every
//! assertion of the line. The instruction set has no loops and no backward
//! jumps, so every execution terminates after at most one pass over the
//! command list.
//!
//! [`IrqDispatcher::register`]: crate::line::IrqDispatcher::register

use smallvec::SmallVec;

use crate::{
    io::{RegisterRange, Width},
    Error, Result,
};

/// A slot of the per-line scratch register file.
///
/// Slots are named rather than numbered so a command cannot reference a
/// slot that does not exist.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(usize)]
pub enum Slot {
    /// Scratch slot 0.
    R0,
    /// Scratch slot 1.
    R1,
    /// Scratch slot 2.
    R2,
    /// Scratch slot 3.
    R3,
    /// Scratch slot 4.
    R4,
    /// Scratch slot 5.
    R5,
    /// Scratch slot 6.
    R6,
    /// Scratch slot 7.
    R7,
}

impl Slot {
    /// The number of slots in a scratch file.
    pub const COUNT: usize = 8;

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// Index of a register range in the list handed to registration.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RangeId(pub u8);

impl RangeId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Source operand of a register write.
#[derive(Clone, Copy, Debug)]
pub enum Operand {
    /// An immediate value, truncated to the command width.
    Imm(u64),
    /// The current value of a scratch slot.
    Slot(Slot),
}

/// One step of an interrupt program.
#[derive(Clone, Copy, Debug)]
pub enum Command {
    /// Loads a register into a scratch slot, zero-extending to 64 bits.
    Read {
        /// Access width.
        width: Width,
        /// The register range to read from.
        range: RangeId,
        /// Byte offset into the range.
        offset: usize,
        /// Destination scratch slot.
        dst: Slot,
    },
    /// Stores a value to a register, truncated to `width`.
    Write {
        /// Access width.
        width: Width,
        /// The register range to write to.
        range: RangeId,
        /// Byte offset into the range.
        offset: usize,
        /// Source of the stored value.
        src: Operand,
    },
    /// `scratch[dst] = scratch[src] & mask`; isolates a status flag.
    MaskAnd {
        /// The mask to apply.
        mask: u64,
        /// Source scratch slot.
        src: Slot,
        /// Destination scratch slot.
        dst: Slot,
    },
    /// Stops execution with a declined outcome unless
    /// `scratch[src] >= threshold`.
    ///
    /// On failure no later command runs, including any acknowledgment
    /// write, so a declined interrupt leaves the hardware untouched.
    Predicate {
        /// The value `scratch[src]` is compared against.
        threshold: u64,
        /// The scratch slot under test.
        src: Slot,
    },
    /// Terminal: the interrupt belongs to this device.
    Accept,
    /// Terminal: the interrupt is not ours.
    Decline,
}

impl Command {
    fn is_terminal(&self) -> bool {
        matches!(self, Command::Accept | Command::Decline)
    }
}

/// An immutable interrupt program.
///
/// Built once via [`ProgramBuilder`]; never mutated after registration.
#[derive(Clone, Debug)]
pub struct Program {
    cmds: SmallVec<[Command; 8]>,
}

impl Program {
    /// Starts building a program.
    pub fn builder() -> ProgramBuilder {
        ProgramBuilder::new()
    }

    /// Returns the program's commands in execution order.
    pub fn commands(&self) -> &[Command] {
        &self.cmds
    }

    /// Returns the number of commands.
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    /// Returns whether the program has no commands.
    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    /// Validates the program against the register ranges it will run over.
    ///
    /// This runs once, at registration time. It enforces that the program
    /// is non-empty, ends with a terminal command, contains no dead
    /// commands after a terminal one, and that every register access names
    /// a handed-in range and stays inside it with the right alignment.
    /// Nothing is re-checked in interrupt context.
    pub fn validate(&self, ranges: &[RegisterRange]) -> Result<()> {
        let Some(last) = self.cmds.last() else {
            return Err(Error::EmptyProgram);
        };
        if !last.is_terminal() {
            return Err(Error::NotTerminated);
        }
        for cmd in &self.cmds[..self.cmds.len() - 1] {
            if cmd.is_terminal() {
                return Err(Error::DeadCommand);
            }
        }

        for cmd in &self.cmds {
            let (width, range, offset) = match *cmd {
                Command::Read {
                    width,
                    range,
                    offset,
                    ..
                }
                | Command::Write {
                    width,
                    range,
                    offset,
                    ..
                } => (width, range, offset),
                _ => continue,
            };
            let range = ranges.get(range.index()).ok_or(Error::BadRangeRef)?;
            range.check(offset, width)?;
        }
        Ok(())
    }
}

/// Builder for [`Program`].
///
/// ```
/// use kirq::{io::Width, program::{Program, RangeId, Slot}};
///
/// let program = Program::builder()
///     .read(Width::U8, RangeId(0), 0x5d, Slot::R0)
///     .mask_and(0x01, Slot::R0, Slot::R1)
///     .predicate(0x01, Slot::R1)
///     .write_imm(Width::U8, RangeId(0), 0x5d, 0x01)
///     .accept()
///     .build();
/// assert_eq!(program.len(), 5);
/// ```
#[derive(Default)]
pub struct ProgramBuilder {
    cmds: SmallVec<[Command; 8]>,
}

impl ProgramBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            cmds: SmallVec::new(),
        }
    }

    /// Appends a register read into `dst`.
    pub fn read(mut self, width: Width, range: RangeId, offset: usize, dst: Slot) -> Self {
        self.cmds.push(Command::Read {
            width,
            range,
            offset,
            dst,
        });
        self
    }

    /// Appends a register write sourced from a scratch slot.
    pub fn write(mut self, width: Width, range: RangeId, offset: usize, src: Slot) -> Self {
        self.cmds.push(Command::Write {
            width,
            range,
            offset,
            src: Operand::Slot(src),
        });
        self
    }

    /// Appends a register write of an immediate value.
    pub fn write_imm(mut self, width: Width, range: RangeId, offset: usize, value: u64) -> Self {
        self.cmds.push(Command::Write {
            width,
            range,
            offset,
            src: Operand::Imm(value),
        });
        self
    }

    /// Appends `scratch[dst] = scratch[src] & mask`.
    pub fn mask_and(mut self, mask: u64, src: Slot, dst: Slot) -> Self {
        self.cmds.push(Command::MaskAnd { mask, src, dst });
        self
    }

    /// Appends a predicate over `src`.
    pub fn predicate(mut self, threshold: u64, src: Slot) -> Self {
        self.cmds.push(Command::Predicate { threshold, src });
        self
    }

    /// Appends the accepting terminal command.
    pub fn accept(mut self) -> Self {
        self.cmds.push(Command::Accept);
        self
    }

    /// Appends the declining terminal command.
    pub fn decline(mut self) -> Self {
        self.cmds.push(Command::Decline);
        self
    }

    /// Finishes the program.
    pub fn build(self) -> Program {
        Program { cmds: self.cmds }
    }
}
