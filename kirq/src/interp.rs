// SPDX-License-Identifier: MPL-2.0

//! The dispatch engine.
//!
//! [`execute`] runs an interrupt program to completion in interrupt
//! context. It is deterministic, allocation-free and bounded by the
//! program length; it never blocks and never calls into driver code.

use crate::{
    io::{RegisterRange, Width},
    program::{Command, Operand, Program, Slot},
};

/// Terminal outcome of one program execution.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Outcome {
    /// The interrupt belongs to this device; escalate to the driver.
    Accept,
    /// The interrupt is not ours (or not interesting); no escalation.
    Decline,
}

/// The per-line scratch register file.
///
/// One instance exists per interrupt line. It is zeroed at the start of
/// every execution and never carries state across executions, which is
/// what makes repeated executions idempotent.
#[derive(Debug, Default)]
pub struct ScratchFile {
    slots: [u64; Slot::COUNT],
}

impl ScratchFile {
    /// Creates a zeroed scratch file.
    pub const fn new() -> Self {
        Self {
            slots: [0; Slot::COUNT],
        }
    }

    /// Zeroes every slot.
    pub fn reset(&mut self) {
        self.slots = [0; Slot::COUNT];
    }

    /// Returns the value of `slot`.
    pub fn get(&self, slot: Slot) -> u64 {
        self.slots[slot.index()]
    }

    pub(crate) fn set(&mut self, slot: Slot, value: u64) {
        self.slots[slot.index()] = value;
    }
}

/// Executes `program` against `ranges`, using `scratch` as the register
/// file. The scratch file is zeroed first.
///
/// The program must have been validated against `ranges` (see
/// [`Program::validate`]); registration guarantees this. A program that
/// escaped validation panics on its first out-of-range access rather than
/// touching memory outside the ranges.
///
/// Commands run strictly in order. A failed [`Command::Predicate`]
/// short-circuits to [`Outcome::Decline`] without executing any further
/// command; writes that already executed keep their effect.
pub fn execute(program: &Program, ranges: &[RegisterRange], scratch: &mut ScratchFile) -> Outcome {
    scratch.reset();

    for cmd in program.commands() {
        match *cmd {
            Command::Read {
                width,
                range,
                offset,
                dst,
            } => {
                let value = read_reg(&ranges[range.index()], width, offset);
                scratch.set(dst, value);
            }
            Command::Write {
                width,
                range,
                offset,
                src,
            } => {
                let value = match src {
                    Operand::Imm(value) => value,
                    Operand::Slot(slot) => scratch.get(slot),
                };
                write_reg(&ranges[range.index()], width, offset, value);
            }
            Command::MaskAnd { mask, src, dst } => {
                scratch.set(dst, scratch.get(src) & mask);
            }
            Command::Predicate { threshold, src } => {
                if scratch.get(src) < threshold {
                    return Outcome::Decline;
                }
            }
            Command::Accept => return Outcome::Accept,
            Command::Decline => return Outcome::Decline,
        }
    }

    // Validation rejects programs without a terminal command.
    unreachable!("interrupt program fell off the end");
}

fn read_reg(range: &RegisterRange, width: Width, offset: usize) -> u64 {
    match width {
        Width::U8 => range.read_once::<u8>(offset) as u64,
        Width::U16 => range.read_once::<u16>(offset) as u64,
        Width::U32 => range.read_once::<u32>(offset) as u64,
        Width::U64 => range.read_once::<u64>(offset),
    }
}

fn write_reg(range: &RegisterRange, width: Width, offset: usize, value: u64) {
    match width {
        Width::U8 => range.write_once::<u8>(offset, value as u8),
        Width::U16 => range.write_once::<u16>(offset, value as u16),
        Width::U32 => range.write_once::<u32>(offset, value as u32),
        Width::U64 => range.write_once::<u64>(offset, value),
    }
}

#[cfg(test)]
mod test {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::{
        io::DmaRegion,
        program::{ProgramBuilder, RangeId},
        Error,
    };

    const STATUS: usize = 0x0;
    const ACK: usize = 0x4;

    /// The reference probe-and-acknowledge program: read the status
    /// register, isolate bit 1, require it set, clear it, accept.
    fn probe_program() -> Program {
        Program::builder()
            .read(Width::U8, RangeId(0), STATUS, Slot::R0)
            .mask_and(0x02, Slot::R0, Slot::R1)
            .predicate(0x02, Slot::R1)
            .write_imm(Width::U8, RangeId(0), ACK, 0x02)
            .accept()
            .build()
    }

    #[test]
    fn accept_commits_the_ack_write() {
        let region = DmaRegion::alloc(16);
        let ranges = [region.range()];
        let mut scratch = ScratchFile::new();

        ranges[0].write_once::<u8>(STATUS, 0x02);
        let outcome = execute(&probe_program(), &ranges, &mut scratch);

        assert_eq!(outcome, Outcome::Accept);
        assert_eq!(ranges[0].read_once::<u8>(ACK), 0x02);
    }

    #[test]
    fn failed_predicate_declines_without_side_effects() {
        let region = DmaRegion::alloc(16);
        let ranges = [region.range()];
        let mut scratch = ScratchFile::new();

        ranges[0].write_once::<u8>(STATUS, 0x00);
        let outcome = execute(&probe_program(), &ranges, &mut scratch);

        assert_eq!(outcome, Outcome::Decline);
        // The acknowledgment write after the predicate never ran.
        assert_eq!(ranges[0].read_once::<u8>(ACK), 0x00);
    }

    #[test]
    fn other_status_bits_do_not_satisfy_the_predicate() {
        let region = DmaRegion::alloc(16);
        let ranges = [region.range()];
        let mut scratch = ScratchFile::new();

        ranges[0].write_once::<u8>(STATUS, 0xfd);
        let outcome = execute(&probe_program(), &ranges, &mut scratch);

        assert_eq!(outcome, Outcome::Decline);
        assert_eq!(ranges[0].read_once::<u8>(ACK), 0x00);
    }

    #[test]
    fn scratch_is_zeroed_between_executions() {
        let region = DmaRegion::alloc(16);
        let ranges = [region.range()];
        let mut scratch = ScratchFile::new();

        ranges[0].write_once::<u8>(STATUS, 0x02);
        execute(&probe_program(), &ranges, &mut scratch);
        assert_eq!(scratch.get(Slot::R1), 0x02);

        // A program that never touches R1 must still see it zeroed.
        let touchless = Program::builder()
            .predicate(1, Slot::R1)
            .accept()
            .build();
        assert_eq!(
            execute(&touchless, &ranges, &mut scratch),
            Outcome::Decline
        );
    }

    #[test]
    fn reads_zero_extend_and_writes_truncate() {
        let region = DmaRegion::alloc(16);
        let ranges = [region.range()];
        let mut scratch = ScratchFile::new();

        ranges[0].write_once::<u64>(8, 0xffff_ffff_ffff_ffff);
        let program = Program::builder()
            .read(Width::U16, RangeId(0), 8, Slot::R2)
            .write(Width::U8, RangeId(0), 0, Slot::R2)
            .accept()
            .build();
        execute(&program, &ranges, &mut scratch);

        assert_eq!(scratch.get(Slot::R2), 0xffff);
        assert_eq!(ranges[0].read_once::<u8>(0), 0xff);
        // The neighboring byte is untouched by the 8-bit write.
        assert_eq!(ranges[0].read_once::<u8>(1), 0x00);
    }

    const SLOTS: [Slot; 8] = [
        Slot::R0,
        Slot::R1,
        Slot::R2,
        Slot::R3,
        Slot::R4,
        Slot::R5,
        Slot::R6,
        Slot::R7,
    ];
    const WIDTHS: [Width; 4] = [Width::U8, Width::U16, Width::U32, Width::U64];

    fn random_slot(rng: &mut StdRng) -> Slot {
        SLOTS[rng.random_range(0..SLOTS.len())]
    }

    /// Appends a random in-bounds access command for a range of
    /// `range_len` bytes.
    fn push_access(rng: &mut StdRng, builder: ProgramBuilder, range_len: usize) -> ProgramBuilder {
        let width = WIDTHS[rng.random_range(0..WIDTHS.len())];
        let size = width.size_in_bytes();
        let offset = rng.random_range(0..range_len / size) * size;
        if rng.random_range(0..2) == 0 {
            builder.read(width, RangeId(0), offset, random_slot(rng))
        } else {
            builder.write_imm(width, RangeId(0), offset, rng.random())
        }
    }

    #[test]
    fn random_in_range_programs_never_escape() {
        const WINDOW: usize = 64;
        const GUARD: usize = 32;

        let mut rng = StdRng::seed_from_u64(0x1b03_5151);
        for _ in 0..256 {
            let region = DmaRegion::alloc(GUARD + WINDOW + GUARD);
            let full = region.range();
            let ranges = [full.slice(GUARD..GUARD + WINDOW)];

            let mut builder = Program::builder();
            for _ in 0..rng.random_range(1..24) {
                builder = match rng.random_range(0..4) {
                    0 | 1 => push_access(&mut rng, builder, WINDOW),
                    2 => {
                        let (src, dst) = (random_slot(&mut rng), random_slot(&mut rng));
                        builder.mask_and(rng.random(), src, dst)
                    }
                    // A zero threshold keeps random predicates from
                    // declining every program early.
                    _ => builder.predicate(0, random_slot(&mut rng)),
                };
            }
            let program = if rng.random_range(0..2) == 0 {
                builder.accept().build()
            } else {
                builder.decline().build()
            };

            assert_eq!(program.validate(&ranges), Ok(()));
            let mut scratch = ScratchFile::new();
            execute(&program, &ranges, &mut scratch);

            // Nothing outside the registered window may be touched.
            for off in 0..GUARD {
                assert_eq!(full.read_once::<u8>(off), 0);
                assert_eq!(full.read_once::<u8>(GUARD + WINDOW + off), 0);
            }
        }
    }

    #[test]
    fn random_escaping_programs_are_rejected_at_validation() {
        const WINDOW: usize = 64;

        let mut rng = StdRng::seed_from_u64(0x51c4_07e5);
        let region = DmaRegion::alloc(WINDOW);
        let ranges = [region.range()];

        for _ in 0..256 {
            let width = WIDTHS[rng.random_range(0..WIDTHS.len())];
            let size = width.size_in_bytes();
            // Offsets at or past the end of the window, width-aligned so
            // the failure is specifically an out-of-range one.
            let offset = (WINDOW / size + rng.random_range(0..1024)) * size;
            let program = Program::builder()
                .read(width, RangeId(0), offset, Slot::R0)
                .accept()
                .build();
            assert_eq!(program.validate(&ranges), Err(Error::OutOfRange));
        }
    }
}
