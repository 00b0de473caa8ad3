//! Alternating-bit endpoints for the simulator.
//!
//! Both nodes wrap the same sessions the UDP binaries run, so the simulator
//! exercises the real protocol state machines under a virtual clock.

use std::collections::VecDeque;

use abp_abstract::MAX_PAYLOAD;
use abp_core::{AckOutcome, ReceiverSession, ReceiverStats, SenderSession, SenderStats};
use bytes::Bytes;

use crate::interface::{ProtocolNode, SystemContext};

/// The sender uses a single timer.
pub const RETRANSMIT_TIMER: u32 = 0;

#[derive(Debug)]
pub struct SenderNode {
    session: SenderSession,
    pending: VecDeque<Bytes>,
    timeout_ms: u64,
}

impl SenderNode {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            session: SenderSession::new(),
            pending: VecDeque::new(),
            timeout_ms,
        }
    }

    pub fn stats(&self) -> &SenderStats {
        self.session.stats()
    }

    /// Chunks accepted from the application but not yet loaded.
    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    fn send_next(&mut self, ctx: &mut dyn SystemContext) {
        if self.session.in_flight_seq().is_some() {
            return;
        }
        let Some(chunk) = self.pending.pop_front() else {
            return;
        };
        match self.session.load(chunk) {
            Ok(wire) => {
                ctx.log(&format!("send seq={}", self.session.next_sequence()));
                ctx.send_datagram(wire);
                ctx.start_timer(self.timeout_ms, RETRANSMIT_TIMER);
            }
            Err(e) => ctx.log(&format!("could not load chunk: {e}")),
        }
    }

    fn resend(&mut self, ctx: &mut dyn SystemContext, wire: Bytes) {
        ctx.log(&format!(
            "retransmit seq={} attempt={}",
            self.session.next_sequence(),
            self.session.attempts()
        ));
        ctx.cancel_timer(RETRANSMIT_TIMER);
        ctx.send_datagram(wire);
        ctx.start_timer(self.timeout_ms, RETRANSMIT_TIMER);
    }
}

impl ProtocolNode for SenderNode {
    fn on_datagram(&mut self, ctx: &mut dyn SystemContext, datagram: &[u8]) {
        match self.session.on_datagram(datagram) {
            Some(AckOutcome::Confirmed { seq }) => {
                ctx.log(&format!("confirmed seq={seq}"));
                ctx.cancel_timer(RETRANSMIT_TIMER);
                self.send_next(ctx);
            }
            Some(AckOutcome::Retransmit(wire)) => self.resend(ctx, wire),
            None => ctx.log("datagram while idle, ignored"),
        }
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        if timer_id != RETRANSMIT_TIMER {
            return;
        }
        if let Some(wire) = self.session.on_timeout() {
            self.resend(ctx, wire);
        }
    }

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, data: &[u8]) {
        self.pending
            .extend(data.chunks(MAX_PAYLOAD).map(Bytes::copy_from_slice));
        self.send_next(ctx);
    }
}

#[derive(Debug, Default)]
pub struct ReceiverNode {
    session: ReceiverSession,
}

impl ReceiverNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ReceiverStats {
        self.session.stats()
    }
}

impl ProtocolNode for ReceiverNode {
    fn on_datagram(&mut self, ctx: &mut dyn SystemContext, datagram: &[u8]) {
        if datagram.is_empty() {
            ctx.log("empty datagram, ignored");
            return;
        }
        match self.session.on_datagram(datagram) {
            Ok(Some(outcome)) => {
                match &outcome.delivery {
                    Some(payload) => ctx.deliver_data(payload),
                    None => ctx.log(&format!("duplicate seq={}", outcome.seq)),
                }
                ctx.send_datagram(outcome.ack);
            }
            Ok(None) => ctx.log("ack-shaped frame at receiver, ignored"),
            Err(e) => ctx.log(&format!("undecodable datagram: {e}")),
        }
    }

    fn on_timer(&mut self, _ctx: &mut dyn SystemContext, _timer_id: u32) {}

    fn on_app_data(&mut self, ctx: &mut dyn SystemContext, _data: &[u8]) {
        ctx.log("receiver has no outbound data path");
    }
}
