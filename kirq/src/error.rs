// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
///
/// Every variant except [`Error::LineBusy`] is a program-validation
/// failure. Validation errors are surfaced synchronously at registration
/// time and are fatal to device attach.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// The program contains no commands.
    EmptyProgram,
    /// The program does not end with `Accept` or `Decline`.
    NotTerminated,
    /// A command follows a terminal command and can never execute.
    DeadCommand,
    /// A command names a register range that was not handed in.
    BadRangeRef,
    /// A register access would escape its range.
    OutOfRange,
    /// A register access is not aligned to its width.
    Misaligned,
    /// The interrupt line is already bound to another registration.
    LineBusy,
    /// Invalid arguments.
    InvalidArgs,
}
