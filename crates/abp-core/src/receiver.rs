//! Receive side of the alternating-bit protocol.
//!
//! Every data frame is acknowledged with its own sequence, but only a frame
//! carrying the expected bit is delivered. A retransmitted copy of a frame
//! already delivered is therefore acked again and otherwise dropped.

use abp_abstract::{Frame, FrameError, MAX_DATAGRAM, next_seq};
use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::shutdown::{Completion, Shutdown};
use crate::transport::DatagramSocket;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    /// Data frames received, duplicates included.
    pub frames: u64,
    pub delivered: u64,
    pub duplicates: u64,
    /// Ack-shaped frames that reached the receiver.
    pub stray_acks: u64,
}

/// Result of handling one data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    pub seq: u8,
    /// Payload to hand to the application, `None` for a duplicate.
    pub delivery: Option<Bytes>,
    /// Acknowledgement to send back to the frame's origin.
    pub ack: Bytes,
}

#[derive(Debug, Default)]
pub struct ReceiverSession {
    expected_seq: u8,
    stats: ReceiverStats,
}

impl ReceiverSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expected_sequence(&self) -> u8 {
        self.expected_seq
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Handle one non-empty datagram.
    ///
    /// Returns `Ok(None)` for an ack-shaped frame, which needs no reply.
    pub fn on_datagram(
        &mut self,
        datagram: &[u8],
    ) -> std::result::Result<Option<ReceiveOutcome>, FrameError> {
        let (seq, payload) = match Frame::decode(datagram)? {
            Frame::Data { seq, payload } => (seq, payload),
            Frame::Ack { .. } => {
                self.stats.stray_acks += 1;
                return Ok(None);
            }
        };
        self.stats.frames += 1;

        let delivery = if seq == self.expected_seq {
            self.expected_seq = next_seq(self.expected_seq);
            self.stats.delivered += 1;
            Some(payload)
        } else {
            self.stats.duplicates += 1;
            None
        };

        Ok(Some(ReceiveOutcome {
            seq,
            delivery,
            ack: Frame::ack(seq).encode(),
        }))
    }
}

/// Deliver frames arriving on `socket` to `output` until the end-of-stream
/// datagram or cancellation.
pub async fn run_receiver<S, W>(
    session: &mut ReceiverSession,
    socket: &S,
    mut output: W,
    shutdown: &mut Shutdown,
) -> Result<Completion>
where
    S: DatagramSocket,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (len, peer) = tokio::select! {
            biased;
            _ = shutdown.triggered() => return Ok(Completion::Cancelled),
            r = socket.receive_from(&mut buf) => r.map_err(|e| Error::io("receive data frame", e))?,
        };

        if len == 0 {
            output
                .flush()
                .await
                .map_err(|e| Error::io("flush output", e))?;
            info!(delivered = session.stats().delivered, "end of stream");
            return Ok(Completion::Finished);
        }

        let outcome = match session.on_datagram(&buf[..len]) {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                warn!(?peer, "ignoring acknowledgement sent to the receiver");
                continue;
            }
            Err(e) => {
                warn!(?peer, bytes = len, error = %e, "ignoring undecodable datagram");
                continue;
            }
        };

        match &outcome.delivery {
            Some(payload) => {
                output
                    .write_all(payload)
                    .await
                    .map_err(|e| Error::io("write output", e))?;
                output
                    .flush()
                    .await
                    .map_err(|e| Error::io("flush output", e))?;
                debug!(seq = outcome.seq, bytes = payload.len(), "delivered");
            }
            None => debug!(seq = outcome.seq, "duplicate frame, acknowledging again"),
        }

        socket
            .transmit_to(&outcome.ack, peer)
            .await
            .map_err(|e| Error::io("send acknowledgement", e))?;
    }
}
