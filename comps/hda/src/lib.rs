// SPDX-License-Identifier: MPL-2.0

//! Codec command-channel driver for the HD Audio controller.
//!
//! The controller raises one interrupt line and exposes one paired
//! command/response ring (the codec command channel). This crate owns the
//! driver-process side:
//!
//! - at attach it builds the interrupt program that probes and
//!   acknowledges the response-interrupt status bit, registers it on the
//!   device's line, and brings up both rings;
//! - once per delivered notification its handler drains every committed
//!   response, matches each to the command it answers, and retries any
//!   verbs that previously hit a full ring.
//!
//! The interrupt program runs in the kernel; nothing in this crate
//! executes in interrupt context.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod channel;
pub mod regs;
mod ring;

pub use channel::{CodecChannel, CommandId, Drain, Response, RingConfig};
pub use ring::ChannelError;

use alloc::{collections::VecDeque, sync::Arc, vec::Vec};

use log::{debug, warn};
use spin::Mutex;

use kirq::{
    io::{DmaRegion, RegisterRange, Width},
    line::{IrqDispatcher, IrqLine},
    program::{Program, RangeId, Slot},
    resources::DeviceResources,
};

use crate::regs::RirbStatus;

/// Errors surfaced by [`HdaController::attach`]. All are fatal to attach.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AttachError {
    /// The resource list does not match the controller's programming
    /// model (one memory range covering the register file, one line).
    BadResources,
    /// Ring configuration rejected.
    Channel(ChannelError),
    /// Interrupt line registration failed.
    Line(kirq::Error),
}

impl From<ChannelError> for AttachError {
    fn from(err: ChannelError) -> Self {
        AttachError::Channel(err)
    }
}

impl From<kirq::Error> for AttachError {
    fn from(err: kirq::Error) -> Self {
        AttachError::Line(err)
    }
}

/// State shared between the notification handler and the driver API.
struct Shared {
    channel: Mutex<CodecChannel>,
    /// Verbs that hit a full ring, retried on the next notification.
    backlog: Mutex<VecDeque<u32>>,
    completions: Mutex<VecDeque<(CommandId, Response)>>,
    regs: RegisterRange,
}

impl Shared {
    /// The notification handler: runs once per delivered notification,
    /// in driver context. Any number of raw interrupts may have
    /// coalesced into this one delivery, so it re-reads device state and
    /// drains everything available rather than assuming one response.
    fn handle_interrupt(&self) {
        let mut channel = self.channel.lock();

        let status = RirbStatus::from_bits_truncate(self.regs.read_once::<u8>(regs::RIRBSTS));
        if status.contains(RirbStatus::OVERRUN) {
            // Responses were lost; later drains stay coherent, recovery
            // policy lives above this layer.
            warn!("response ring overrun");
            self.regs
                .write_once::<u8>(regs::RIRBSTS, (status & !RirbStatus::OVERRUN).bits());
        }

        let mut completions = self.completions.lock();
        for pair in channel.drain() {
            completions.push_back(pair);
        }
        drop(completions);

        let mut backlog = self.backlog.lock();
        while let Some(&verb) = backlog.front() {
            match channel.submit(verb) {
                Ok(_) => {
                    backlog.pop_front();
                }
                Err(_) => break,
            }
        }
    }
}

/// Driver-side state for one attached controller instance.
///
/// Constructed by [`attach`]; dropping it (or calling [`detach`]) first
/// disables the interrupt line, then releases the ring memory, in that
/// order.
///
/// [`attach`]: Self::attach
/// [`detach`]: Self::detach
pub struct HdaController {
    // Field order is drop order: the line must go down before the ring
    // memory it can indirectly reach.
    line: IrqLine,
    shared: Arc<Shared>,
    _cmd_mem: DmaRegion,
    _rsp_mem: DmaRegion,
}

impl HdaController {
    /// Attaches to a controller instance.
    ///
    /// `resources` is the enumeration handoff and must carry exactly one
    /// memory range (at least the size of the register file) and exactly
    /// one interrupt line; `regs` is the mapped view of that range. Ring
    /// memory is allocated here and the channel brought up; the interrupt
    /// program is registered on the line before this returns.
    pub fn attach(
        resources: &DeviceResources,
        regs: RegisterRange,
        dispatcher: &IrqDispatcher,
        config: RingConfig,
    ) -> Result<HdaController, AttachError> {
        let &[mem] = resources.mem_ranges() else {
            warn!(
                "expected exactly one memory range, got {}",
                resources.mem_ranges().len()
            );
            return Err(AttachError::BadResources);
        };
        let &[irq] = resources.irqs() else {
            warn!("expected exactly one interrupt line, got {}", resources.irqs().len());
            return Err(AttachError::BadResources);
        };
        if mem.size < regs::REG_WINDOW || regs.len() < regs::REG_WINDOW {
            warn!("memory range too small for the register file");
            return Err(AttachError::BadResources);
        }
        debug!("attach: regs at {:#x}, irq {}", mem.base, irq);

        // A degenerate entry count is rejected by the rings below; the
        // `max` only keeps the allocation itself well-formed until then.
        let cmd_mem = DmaRegion::alloc((config.cmd_entries as usize).max(1) * 4);
        let rsp_mem = DmaRegion::alloc((config.rsp_entries as usize).max(1) * 8);
        let channel = CodecChannel::new(regs.clone(), cmd_mem.range(), rsp_mem.range(), config)?;

        let line = dispatcher.register(irq, response_interrupt_program(), &[regs.clone()])?;

        let shared = Arc::new(Shared {
            channel: Mutex::new(channel),
            backlog: Mutex::new(VecDeque::new()),
            completions: Mutex::new(VecDeque::new()),
            regs,
        });
        let handler = shared.clone();
        line.on_notify(move || handler.handle_interrupt());

        Ok(HdaController {
            line,
            shared,
            _cmd_mem: cmd_mem,
            _rsp_mem: rsp_mem,
        })
    }

    /// Returns the interrupt line number this instance owns.
    pub fn irq(&self) -> u8 {
        self.line.num()
    }

    /// Issues a command verb now.
    ///
    /// Fails with [`ChannelError::Full`] when no outbound slot is free;
    /// use [`enqueue`] to have the verb retried automatically instead.
    ///
    /// [`enqueue`]: Self::enqueue
    pub fn submit(&self, verb: u32) -> Result<CommandId, ChannelError> {
        self.shared.channel.lock().submit(verb)
    }

    /// Issues a command verb, parking it for retry on the next
    /// notification if the ring is currently full.
    ///
    /// Parked verbs are issued in order, before any younger submission
    /// gets a slot. Their correlation ids are assigned at actual issue
    /// time, so completions still arrive in submission order.
    pub fn enqueue(&self, verb: u32) {
        // Lock order everywhere is channel, then backlog.
        let mut channel = self.shared.channel.lock();
        let mut backlog = self.shared.backlog.lock();
        if backlog.is_empty() {
            match channel.submit(verb) {
                Ok(_) => return,
                Err(ChannelError::Full) => debug!("ring full, parking verb {:#010x}", verb),
                Err(err) => warn!("parking verb {:#010x}: {:?}", verb, err),
            }
        }
        backlog.push_back(verb);
    }

    /// Delivers pending interrupt notifications to the handler.
    ///
    /// This is the driver process's event-loop entry: each delivered
    /// notification drains completed responses and flushes the backlog.
    /// Returns the number of notifications delivered.
    pub fn service(&self) -> usize {
        self.line.service()
    }

    /// Takes every completion harvested so far, in completion order.
    pub fn take_completions(&self) -> Vec<(CommandId, Response)> {
        self.shared.completions.lock().drain(..).collect()
    }

    /// Takes the oldest unsolicited or unexpected response, if any.
    pub fn pop_unsolicited(&self) -> Option<Response> {
        self.shared.channel.lock().pop_unsolicited()
    }

    /// Detaches from the device.
    ///
    /// Disables interrupt delivery and removes the line registration
    /// before any device-visible memory is released, so the interpreter
    /// can never run over a stale mapping.
    pub fn detach(self) {
        self.line.disable();
        // Dropping self unregisters the line, then frees the rings.
    }
}

/// Builds the interrupt program for the response interrupt: probe the
/// inbound status register, require the response-interrupt bit, write
/// the status back with that bit cleared, accept. A declined run (bit
/// not set: the assertion was for someone else on the line) leaves the
/// register untouched.
fn response_interrupt_program() -> Program {
    let intfl = RirbStatus::RESPONSE_INTR.bits() as u64;
    Program::builder()
        .read(Width::U8, RangeId(0), regs::RIRBSTS, Slot::R0)
        .mask_and(intfl, Slot::R0, Slot::R1)
        .predicate(intfl, Slot::R1)
        .mask_and(!intfl & 0xff, Slot::R0, Slot::R2)
        .write(Width::U8, RangeId(0), regs::RIRBSTS, Slot::R2)
        .accept()
        .build()
}
