// SPDX-License-Identifier: MPL-2.0

//! The paired command/response channel.
//!
//! A driver issues asynchronous hardware commands through [`submit`] and
//! harvests completions through [`drain`], exactly once per interrupt
//! notification. Correlation is by issue order: the hardware returns
//! responses in the order commands were issued, and [`drain`] matches
//! each solicited response to the oldest outstanding command. Hardware
//! that can reorder responses would need a tag in the response word; this
//! channel does not support such devices.
//!
//! [`submit`]: CodecChannel::submit
//! [`drain`]: CodecChannel::drain

use alloc::collections::VecDeque;

use log::{debug, warn};
use kirq::io::RegisterRange;

use crate::{
    regs::{self, CorbControl, RirbControl},
    ring::{ChannelError, CmdRing, RspRing},
};

/// Correlation id for an issued command, unique per channel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct CommandId(u64);

/// A response decoded from the inbound ring.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Response {
    /// The 32-bit response word.
    pub data: u32,
    /// Address of the codec that produced the response.
    pub codec: u8,
    /// Set when the codec sent this on its own initiative rather than in
    /// answer to a command.
    pub unsolicited: bool,
}

const RESP_EX_CODEC_MASK: u32 = 0xf;
const RESP_EX_UNSOLICITED: u32 = 1 << 4;

impl Response {
    fn decode(data: u32, extended: u32) -> Self {
        Self {
            data,
            codec: (extended & RESP_EX_CODEC_MASK) as u8,
            unsolicited: extended & RESP_EX_UNSOLICITED != 0,
        }
    }
}

/// An issued command awaiting its response.
struct PendingCommand {
    id: CommandId,
    verb: u32,
}

/// Ring geometry, fixed by the target device's programming model.
#[derive(Clone, Copy, Debug)]
pub struct RingConfig {
    /// Outbound ring capacity in entries (power of two).
    pub cmd_entries: u16,
    /// Inbound ring capacity in entries (power of two).
    pub rsp_entries: u16,
}

/// Driver-side state of the command/response channel.
///
/// The channel is single-writer: a multi-threaded driver must serialize
/// [`submit`] and [`drain`] against each other (the controller wraps the
/// channel in a lock). Nothing here is ever called from interrupt
/// context, and no error from these paths can reach it.
///
/// [`submit`]: Self::submit
/// [`drain`]: Self::drain
pub struct CodecChannel {
    cmd: CmdRing,
    rsp: RspRing,
    pending: VecDeque<PendingCommand>,
    unsolicited: VecDeque<Response>,
    next_id: u64,
}

impl CodecChannel {
    /// Builds both rings over the given buffers and starts the DMA
    /// engines. `regs` is the mapped controller register range; the
    /// buffers come from driver-allocated device-visible memory.
    pub fn new(
        regs: RegisterRange,
        cmd_buf: RegisterRange,
        rsp_buf: RegisterRange,
        config: RingConfig,
    ) -> Result<Self, ChannelError> {
        let cmd = CmdRing::new(regs.clone(), cmd_buf, config.cmd_entries)?;
        let rsp = RspRing::new(regs.clone(), rsp_buf, config.rsp_entries)?;

        regs.write_once::<u8>(regs::CORBCTL, CorbControl::DMA_RUN.bits());
        regs.write_once::<u8>(
            regs::RIRBCTL,
            (RirbControl::DMA_RUN | RirbControl::INTR_ENABLE).bits(),
        );

        Ok(Self {
            cmd,
            rsp,
            pending: VecDeque::new(),
            unsolicited: VecDeque::new(),
            next_id: 0,
        })
    }

    /// Issues a command verb.
    ///
    /// Returns the correlation id the eventual response will carry. Fails
    /// with [`ChannelError::Full`] when the hardware has not consumed
    /// enough outbound entries; the caller queues the verb and retries on
    /// the next notification, it never blocks.
    pub fn submit(&mut self, verb: u32) -> Result<CommandId, ChannelError> {
        self.cmd.push(verb)?;
        let id = CommandId(self.next_id);
        self.next_id += 1;
        self.pending.push_back(PendingCommand { id, verb });
        Ok(id)
    }

    /// Number of commands the channel can accept right now.
    pub fn free_slots(&self) -> u16 {
        self.cmd.free_slots()
    }

    /// Number of issued commands still awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Harvests every response the hardware has committed since the last
    /// drain, pairing each with the command it answers.
    ///
    /// The sequence is lazy and finite; once caught up, draining again
    /// before new hardware writes yields nothing. Unsolicited responses
    /// and responses with no outstanding command are put aside (see
    /// [`pop_unsolicited`]) instead of being matched or dropped.
    ///
    /// [`pop_unsolicited`]: Self::pop_unsolicited
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { channel: self }
    }

    /// Takes the oldest response that could not be matched to a command:
    /// either hardware-initiated, or in excess of everything outstanding.
    pub fn pop_unsolicited(&mut self) -> Option<Response> {
        self.unsolicited.pop_front()
    }

    fn harvest_one(&mut self) -> Option<(CommandId, Response)> {
        while let Some((data, extended)) = self.rsp.shift() {
            let response = Response::decode(data, extended);
            if response.unsolicited {
                debug!(
                    "unsolicited response {:#010x} from codec {}",
                    response.data, response.codec
                );
                self.unsolicited.push_back(response);
                continue;
            }
            let Some(pending) = self.pending.pop_front() else {
                // A response nothing asked for. A miscounting device must
                // not wedge the drain loop, nor corrupt correlation of
                // later commands.
                warn!(
                    "response {:#010x} from codec {} with no outstanding command",
                    response.data, response.codec
                );
                self.unsolicited.push_back(response);
                continue;
            };
            debug!(
                "verb {:#010x} completed as {:?} -> {:#010x}",
                pending.verb, pending.id, response.data
            );
            return Some((pending.id, response));
        }
        None
    }
}

/// Lazy iterator over harvested `(CommandId, Response)` pairs.
///
/// Returned by [`CodecChannel::drain`].
pub struct Drain<'a> {
    channel: &'a mut CodecChannel,
}

impl Iterator for Drain<'_> {
    type Item = (CommandId, Response);

    fn next(&mut self) -> Option<Self::Item> {
        self.channel.harvest_one()
    }
}
