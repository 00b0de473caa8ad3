//! Alternating-bit protocol over an unreliable datagram transport.
//!
//! - [`sender`]: stop-and-wait send side ([`SenderSession`] + [`run_sender`])
//! - [`receiver`]: duplicate-suppressing receive side
//! - [`medium`]: lossy relay between the two
//! - [`transport`]: the association traits and their UDP implementation
//! - [`memory`]: in-process associations for tests and demos
//! - [`shutdown`]: cooperative cancellation of the run loops
//!
//! Sessions never perform I/O themselves; the `run_*` drivers own the loops.

pub mod error;
pub mod medium;
pub mod memory;
pub mod receiver;
pub mod sender;
pub mod shutdown;
pub mod transport;

pub use abp_abstract::{Frame, FrameError, MAX_DATAGRAM, MAX_PAYLOAD};
pub use error::{Error, Result};
pub use medium::{
    Direction, DirectionStats, LossModel, LossProbability, Medium, MediumConfig, MediumStats,
    Verdict, run_medium,
};
pub use receiver::{ReceiveOutcome, ReceiverSession, ReceiverStats, run_receiver};
pub use sender::{
    AckOutcome, DEFAULT_RETRANSMIT_TIMEOUT, SenderConfig, SenderSession, SenderStats, run_sender,
};
pub use shutdown::{Completion, Shutdown, ShutdownTrigger};
pub use transport::{DatagramSocket, Link, RecvOutcome};
