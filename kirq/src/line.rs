// SPDX-License-Identifier: MPL-2.0

//! Interrupt line registration and dispatch.

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use smallvec::SmallVec;
use spin::Mutex;

use crate::{
    interp::{self, Outcome, ScratchFile},
    io::RegisterRange,
    notify::Notifier,
    prelude::*,
    program::Program,
    Error,
};

/// Per-line state owned by the dispatch table.
struct LineState {
    program: Program,
    ranges: SmallVec<[RegisterRange; 2]>,
    scratch: Mutex<ScratchFile>,
    notifier: Notifier,
    enabled: AtomicBool,
}

type LineTable = Mutex<BTreeMap<u8, Arc<LineState>>>;

/// The kernel-side interrupt dispatch table.
///
/// Holds at most one registration per line. [`dispatch`] is the
/// interrupt-context entry point: it runs the line's program and, on an
/// accepted outcome, posts the line's notifier; the driver process picks
/// the notification up through its [`IrqLine`] handle.
///
/// [`dispatch`]: Self::dispatch
pub struct IrqDispatcher {
    lines: Arc<LineTable>,
}

impl IrqDispatcher {
    /// Creates an empty dispatch table.
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Registers `program` on line `irq` over `ranges`.
    ///
    /// Called once at device attach. The program is validated against the
    /// ranges here; any malformed access is rejected now and never
    /// reaches interrupt context. Fails with [`Error::LineBusy`] if the
    /// line already has a registration.
    ///
    /// The returned handle unregisters the line when dropped.
    pub fn register(
        &self,
        irq: u8,
        program: Program,
        ranges: &[RegisterRange],
    ) -> Result<IrqLine> {
        program.validate(ranges)?;

        let mut lines = self.lines.lock();
        if lines.contains_key(&irq) {
            return Err(Error::LineBusy);
        }

        debug!(
            "irq {}: registered program of {} commands over {} ranges",
            irq,
            program.len(),
            ranges.len()
        );
        let state = Arc::new(LineState {
            program,
            ranges: ranges.iter().cloned().collect(),
            scratch: Mutex::new(ScratchFile::new()),
            notifier: Notifier::new(),
            enabled: AtomicBool::new(true),
        });
        lines.insert(irq, state.clone());

        Ok(IrqLine {
            irq,
            state,
            table: self.lines.clone(),
        })
    }

    /// Interrupt-context entry point for an assertion of line `irq`.
    ///
    /// Runs the registered program to completion with a zeroed scratch
    /// file and posts the owning driver's notifier on [`Outcome::Accept`].
    /// Returns `None` when the line has no enabled registration, in which
    /// case no device register is touched.
    pub fn dispatch(&self, irq: u8) -> Option<Outcome> {
        let state = self.lines.lock().get(&irq).cloned()?;
        if !state.enabled.load(Ordering::Acquire) {
            return None;
        }

        let mut scratch = state.scratch.lock();
        let outcome = interp::execute(&state.program, &state.ranges, &mut scratch);
        drop(scratch);

        if outcome == Outcome::Accept {
            state.notifier.post();
        }
        Some(outcome)
    }
}

impl Default for IrqDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// A driver's handle to its registered interrupt line.
///
/// Dropping the handle disables the line and removes the registration.
#[must_use]
pub struct IrqLine {
    irq: u8,
    state: Arc<LineState>,
    table: Arc<LineTable>,
}

impl IrqLine {
    /// Returns the line number.
    pub fn num(&self) -> u8 {
        self.irq
    }

    /// Registers the driver's notification handler.
    ///
    /// The handler runs in driver context, once per delivered
    /// notification, and must re-read device state from scratch: it
    /// cannot see the interpreter's scratch file, and any number of raw
    /// interrupts may have coalesced into one delivery.
    pub fn on_notify<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.state.notifier.set_handler(handler);
    }

    /// Delivers pending notifications to the handler.
    ///
    /// Driver context; invocations for the same line never overlap.
    /// Returns the number of handler invocations.
    pub fn service(&self) -> usize {
        self.state.notifier.dispatch()
    }

    /// Stops dispatching the program and masks notification delivery.
    ///
    /// Detach must call this before the device's register ranges are
    /// unmapped, so the interpreter cannot run over a stale mapping.
    pub fn disable(&self) {
        self.state.enabled.store(false, Ordering::Release);
        self.state.notifier.mask();
    }
}

impl Drop for IrqLine {
    fn drop(&mut self) {
        self.disable();
        self.table.lock().remove(&self.irq);
        debug!("irq {}: registration removed", self.irq);
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        io::{DmaRegion, Width},
        program::{RangeId, Slot},
    };

    const STATUS: usize = 0x0;

    fn probe_program() -> Program {
        Program::builder()
            .read(Width::U8, RangeId(0), STATUS, Slot::R0)
            .mask_and(0x01, Slot::R0, Slot::R1)
            .predicate(0x01, Slot::R1)
            .write_imm(Width::U8, RangeId(0), STATUS, 0x00)
            .accept()
            .build()
    }

    #[test]
    fn accept_posts_a_notification() {
        let dispatcher = IrqDispatcher::new();
        let region = DmaRegion::alloc(16);
        let regs = region.range();
        let line = dispatcher
            .register(5, probe_program(), &[regs.clone()])
            .unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        line.on_notify(move || {
            seen.fetch_add(1, Ordering::Relaxed);
        });

        regs.write_once::<u8>(STATUS, 0x01);
        assert_eq!(dispatcher.dispatch(5), Some(Outcome::Accept));
        // The acknowledgment write cleared the status bit.
        assert_eq!(regs.read_once::<u8>(STATUS), 0x00);
        assert_eq!(dispatcher.dispatch(5), Some(Outcome::Decline));

        assert_eq!(line.service(), 1);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn coalesced_accepts_deliver_once() {
        let dispatcher = IrqDispatcher::new();
        let region = DmaRegion::alloc(16);
        let regs = region.range();
        // No acknowledgment write: the status bit stays set and every
        // dispatch accepts.
        let sticky = Program::builder()
            .read(Width::U8, RangeId(0), STATUS, Slot::R0)
            .predicate(0x01, Slot::R0)
            .accept()
            .build();
        let line = dispatcher.register(9, sticky, &[regs.clone()]).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        line.on_notify(move || {
            seen.fetch_add(1, Ordering::Relaxed);
        });

        regs.write_once::<u8>(STATUS, 0x01);
        assert_eq!(dispatcher.dispatch(9), Some(Outcome::Accept));
        assert_eq!(dispatcher.dispatch(9), Some(Outcome::Accept));

        assert_eq!(line.service(), 1);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn second_registration_is_busy() {
        let dispatcher = IrqDispatcher::new();
        let region = DmaRegion::alloc(16);
        let line = dispatcher
            .register(3, probe_program(), &[region.range()])
            .unwrap();
        assert_eq!(
            dispatcher
                .register(3, probe_program(), &[region.range()])
                .err(),
            Some(Error::LineBusy)
        );

        // Dropping the handle frees the line.
        drop(line);
        let _line = dispatcher
            .register(3, probe_program(), &[region.range()])
            .unwrap();
    }

    #[test]
    fn invalid_program_never_registers() {
        let dispatcher = IrqDispatcher::new();
        let region = DmaRegion::alloc(16);
        let escaping = Program::builder()
            .read(Width::U32, RangeId(0), 16, Slot::R0)
            .accept()
            .build();
        assert_eq!(
            dispatcher.register(1, escaping, &[region.range()]).err(),
            Some(Error::OutOfRange)
        );
        assert_eq!(dispatcher.dispatch(1), None);
    }

    #[test]
    fn disabled_line_does_not_run() {
        let dispatcher = IrqDispatcher::new();
        let region = DmaRegion::alloc(16);
        let regs = region.range();
        let line = dispatcher
            .register(7, probe_program(), &[regs.clone()])
            .unwrap();
        line.on_notify(|| {});

        regs.write_once::<u8>(STATUS, 0x01);
        line.disable();
        assert_eq!(dispatcher.dispatch(7), None);
        // The status register was not touched, let alone acknowledged.
        assert_eq!(regs.read_once::<u8>(STATUS), 0x01);
        assert_eq!(line.service(), 0);
    }
}
