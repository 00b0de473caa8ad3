//! Error type shared by the protocol drivers.

use std::io;

use abp_abstract::FrameError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A transport or stream operation failed; `op` names it.
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The configured retransmission bound was reached.
    #[error("frame {seq} still unacknowledged after {attempts} transmissions")]
    RetriesExhausted { seq: u8, attempts: u32 },

    /// A new chunk was loaded while another one was still in flight.
    #[error("a frame is already awaiting acknowledgement")]
    Busy,

    #[error("loss probability must lie in [0, 1], got {0}")]
    InvalidLossProbability(String),

    #[error("could not resolve {host}:{port}")]
    Resolve { host: String, port: u16 },
}

impl Error {
    pub fn io(op: &'static str, source: io::Error) -> Self {
        Error::Io { op, source }
    }
}

/// Errors a connected datagram socket reports for conditions that go away by
/// themselves, such as an ICMP port-unreachable while the peer is not up yet.
pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_the_operation() {
        let err = Error::io(
            "send data frame",
            io::Error::new(io::ErrorKind::BrokenPipe, "gone"),
        );
        assert_eq!(err.to_string(), "send data frame failed: gone");
    }

    #[test]
    fn refused_is_transient_but_reset_is_not() {
        assert!(is_transient(&io::ErrorKind::ConnectionRefused.into()));
        assert!(!is_transient(&io::ErrorKind::ConnectionReset.into()));
    }
}
