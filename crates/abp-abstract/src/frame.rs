//! Wire format of an alternating-bit frame.
//!
//! ```text
//! +----------+------------------------------+
//! | seq (u8) | payload (0..=MAX_PAYLOAD)    |
//! +----------+------------------------------+
//! ```
//!
//! Data frames and acknowledgements share this shape. An acknowledgement is a
//! frame with no payload, so the datagram length alone tells them apart.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest payload carried by one data frame.
pub const MAX_PAYLOAD: usize = 1024;
/// Bytes in front of the payload (the sequence byte).
pub const HEADER_LEN: usize = 1;
/// Largest valid frame on the wire.
pub const MAX_FRAME: usize = HEADER_LEN + MAX_PAYLOAD;
/// Receive buffer size. Larger than [`MAX_FRAME`] so oversized datagrams are
/// noticed instead of silently truncated.
pub const MAX_DATAGRAM: usize = 2048;
/// Sequence numbers are taken modulo this value.
pub const SEQ_MODULUS: u8 = 2;

/// Sequence number that follows `seq`.
pub fn next_seq(seq: u8) -> u8 {
    seq.wrapping_add(1) % SEQ_MODULUS
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A chunk of the sender's input stream.
    Data { seq: u8, payload: Bytes },
    /// Acknowledges the data frame carrying the same `seq`.
    Ack { seq: u8 },
}

impl Frame {
    /// Build a data frame, rejecting payloads that would not survive the wire
    /// (an empty payload would decode as an acknowledgement).
    pub fn data(seq: u8, payload: impl Into<Bytes>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(FrameError::EmptyPayload);
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::Oversized {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        Ok(Frame::Data { seq, payload })
    }

    pub fn ack(seq: u8) -> Self {
        Frame::Ack { seq }
    }

    pub fn seq(&self) -> u8 {
        match self {
            Frame::Data { seq, .. } | Frame::Ack { seq } => *seq,
        }
    }

    /// Payload bytes; always empty for an acknowledgement.
    pub fn payload(&self) -> &[u8] {
        match self {
            Frame::Data { payload, .. } => payload,
            Frame::Ack { .. } => &[],
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Frame::Ack { .. })
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload().len()
    }

    /// Serialise into a single datagram.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(self.seq());
        buf.put_slice(self.payload());
        buf.freeze()
    }

    /// Parse a received datagram.
    ///
    /// A zero-length datagram is the transport's end-of-stream signal and has
    /// no sequence byte; callers must check for it before decoding.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        match buf {
            [] => Err(FrameError::Empty),
            [seq] => Ok(Frame::Ack { seq: *seq }),
            _ if buf.len() > MAX_FRAME => Err(FrameError::Oversized {
                len: buf.len() - HEADER_LEN,
                max: MAX_PAYLOAD,
            }),
            [seq, payload @ ..] => Ok(Frame::Data {
                seq: *seq,
                payload: Bytes::copy_from_slice(payload),
            }),
        }
    }
}

/// Errors that can arise when building or parsing a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty datagram carries no sequence byte")]
    Empty,
    #[error("data frame payload must not be empty")]
    EmptyPayload,
    #[error("payload of {len} bytes exceeds the {max}-byte limit")]
    Oversized { len: usize, max: usize },
}
