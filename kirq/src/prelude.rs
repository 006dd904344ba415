// SPDX-License-Identifier: MPL-2.0

//! The prelude.

/// A specialized [`Result`] type for this crate.
///
/// [`Result`]: core::result::Result
pub type Result<T> = core::result::Result<T, crate::Error>;

pub(crate) use alloc::{boxed::Box, sync::Arc};

pub use crate::{
    interp::Outcome,
    io::{RegisterRange, Width},
    line::{IrqDispatcher, IrqLine},
    program::{Command, Program, RangeId, Slot},
};
