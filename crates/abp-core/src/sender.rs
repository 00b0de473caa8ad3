//! Send side of the alternating-bit protocol.
//!
//! [`SenderSession`] holds the sequence bit and the single in-flight frame. It
//! never touches a socket; [`run_sender`] owns the read/send/wait loop.
//!
//! # Stop-and-wait contract
//! - At most one frame is in flight.
//! - Loading a new chunk flips the sequence bit; retransmissions never do.
//! - Only an acknowledgement carrying the in-flight sequence confirms it. A
//!   timeout, or anything else arriving while waiting, resends the frame.

use std::time::Duration;

use abp_abstract::{Frame, MAX_DATAGRAM, MAX_PAYLOAD, SEQ_MODULUS, next_seq};
use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, is_transient};
use crate::shutdown::{Completion, Shutdown};
use crate::transport::{Link, RecvOutcome};

pub const DEFAULT_RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// How long to wait for an acknowledgement before resending.
    pub retransmit_timeout: Duration,
    /// Give up on a frame after this many retransmissions. `None` retries
    /// forever.
    pub max_retransmissions: Option<u32>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            retransmit_timeout: DEFAULT_RETRANSMIT_TIMEOUT,
            max_retransmissions: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    /// Input chunks loaded.
    pub chunks: u64,
    /// Chunks whose acknowledgement arrived.
    pub confirmed: u64,
    /// Datagrams handed to the link, retransmissions included.
    pub transmissions: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    /// Datagrams received while waiting that did not confirm the frame.
    pub stale_acks: u64,
}

#[derive(Debug)]
struct InFlight {
    seq: u8,
    wire: Bytes,
    attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Confirmed { seq: u8 },
    /// Resend these bytes and keep waiting.
    Retransmit(Bytes),
}

#[derive(Debug)]
pub struct SenderSession {
    next_seq: u8,
    in_flight: Option<InFlight>,
    stats: SenderStats,
}

impl Default for SenderSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderSession {
    pub fn new() -> Self {
        // Loading flips the bit first, so the first frame goes out as 0.
        Self {
            next_seq: SEQ_MODULUS - 1,
            in_flight: None,
            stats: SenderStats::default(),
        }
    }

    /// Sequence bit of the most recently loaded chunk.
    pub fn next_sequence(&self) -> u8 {
        self.next_seq
    }

    pub fn in_flight_seq(&self) -> Option<u8> {
        self.in_flight.as_ref().map(|f| f.seq)
    }

    /// Transmissions of the in-flight frame so far, or 0 when idle.
    pub fn attempts(&self) -> u32 {
        self.in_flight.as_ref().map_or(0, |f| f.attempts)
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    /// Accept a new input chunk and return the datagram to send.
    pub fn load(&mut self, chunk: Bytes) -> Result<Bytes> {
        if self.in_flight.is_some() {
            return Err(Error::Busy);
        }
        let seq = next_seq(self.next_seq);
        let wire = Frame::data(seq, chunk)?.encode();
        self.next_seq = seq;
        self.in_flight = Some(InFlight {
            seq,
            wire: wire.clone(),
            attempts: 1,
        });
        self.stats.chunks += 1;
        self.stats.transmissions += 1;
        Ok(wire)
    }

    /// The wait elapsed; returns the frame to resend, if any is in flight.
    pub fn on_timeout(&mut self) -> Option<Bytes> {
        let wire = self.retransmit()?;
        self.stats.timeouts += 1;
        Some(wire)
    }

    /// True if `datagram` acknowledges the in-flight frame.
    pub fn confirms(&self, datagram: &[u8]) -> bool {
        match (self.in_flight_seq(), Frame::decode(datagram)) {
            (Some(expected), Ok(Frame::Ack { seq })) => seq == expected,
            _ => false,
        }
    }

    /// A datagram arrived while waiting. Returns `None` when idle.
    pub fn on_datagram(&mut self, datagram: &[u8]) -> Option<AckOutcome> {
        let expected = self.in_flight_seq()?;
        if self.confirms(datagram) {
            self.in_flight = None;
            self.stats.confirmed += 1;
            return Some(AckOutcome::Confirmed { seq: expected });
        }
        debug!(expected, bytes = datagram.len(), "datagram does not confirm the in-flight frame");
        self.stats.stale_acks += 1;
        self.retransmit().map(AckOutcome::Retransmit)
    }

    fn retransmit(&mut self) -> Option<Bytes> {
        let in_flight = self.in_flight.as_mut()?;
        in_flight.attempts += 1;
        self.stats.transmissions += 1;
        self.stats.retransmissions += 1;
        Some(in_flight.wire.clone())
    }
}

/// Stream `input` over `link` until end of input or cancellation.
pub async fn run_sender<R, L>(
    session: &mut SenderSession,
    mut input: R,
    link: &L,
    config: &SenderConfig,
    shutdown: &mut Shutdown,
) -> Result<Completion>
where
    R: AsyncRead + Unpin,
    L: Link,
{
    let mut chunk = vec![0u8; MAX_PAYLOAD];
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let n = tokio::select! {
            biased;
            _ = shutdown.triggered() => return Ok(Completion::Cancelled),
            read = input.read(&mut chunk) => read.map_err(|e| Error::io("read input", e))?,
        };
        if n == 0 {
            info!(chunks = session.stats().chunks, "end of input");
            return Ok(Completion::Finished);
        }

        let wire = session.load(Bytes::copy_from_slice(&chunk[..n]))?;
        link.transmit(&wire)
            .await
            .map_err(|e| Error::io("send data frame", e))?;
        debug!(seq = session.next_sequence(), bytes = n, "sent data frame");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.triggered() => return Ok(Completion::Cancelled),
                r = link.receive(&mut buf, Some(config.retransmit_timeout)) => r,
            };

            let resend = match received {
                Ok(RecvOutcome::TimedOut) => {
                    debug!(seq = session.next_sequence(), "acknowledgement timed out");
                    check_retry_budget(session, config)?;
                    session.on_timeout()
                }
                Ok(RecvOutcome::Datagram(len)) => {
                    let datagram = &buf[..len];
                    if !session.confirms(datagram) {
                        check_retry_budget(session, config)?;
                    }
                    match session.on_datagram(datagram) {
                        Some(AckOutcome::Confirmed { seq }) => {
                            debug!(seq, "frame acknowledged");
                            break;
                        }
                        Some(AckOutcome::Retransmit(wire)) => Some(wire),
                        None => None,
                    }
                }
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "transient receive error, still waiting");
                    None
                }
                Err(e) => return Err(Error::io("receive acknowledgement", e)),
            };

            if let Some(wire) = resend {
                link.transmit(&wire)
                    .await
                    .map_err(|e| Error::io("retransmit data frame", e))?;
                debug!(
                    seq = session.next_sequence(),
                    attempt = session.attempts(),
                    "retransmitted"
                );
            }
        }
    }
}

/// Fails once the in-flight frame has used up its retransmissions.
fn check_retry_budget(session: &SenderSession, config: &SenderConfig) -> Result<()> {
    let attempts = session.attempts();
    match config.max_retransmissions {
        Some(max) if attempts > max => Err(Error::RetriesExhausted {
            seq: session.next_sequence(),
            attempts,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    use crate::shutdown;

    enum Step {
        Timeout,
        Reply(Vec<u8>),
        Refused,
    }

    /// Link that replays a fixed sequence of receive results.
    struct ScriptedLink {
        sent: Mutex<Vec<Vec<u8>>>,
        script: Mutex<VecDeque<Step>>,
    }

    impl ScriptedLink {
        fn new(script: Vec<Step>) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                script: Mutex::new(script.into()),
            }
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Link for ScriptedLink {
        async fn transmit(&self, datagram: &[u8]) -> io::Result<()> {
            self.sent.lock().unwrap().push(datagram.to_vec());
            Ok(())
        }

        async fn receive(&self, buf: &mut [u8], _timeout: Option<Duration>) -> io::Result<RecvOutcome> {
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step::Timeout) => Ok(RecvOutcome::TimedOut),
                Some(Step::Reply(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(RecvOutcome::Datagram(bytes.len()))
                }
                Some(Step::Refused) => Err(io::ErrorKind::ConnectionRefused.into()),
                None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted")),
            }
        }
    }

    #[test]
    fn first_frame_carries_sequence_zero() {
        let mut session = SenderSession::new();
        let wire = session.load(Bytes::from_static(b"hi")).unwrap();
        assert_eq!(&wire[..], b"\x00hi");
        assert_eq!(session.in_flight_seq(), Some(0));
    }

    #[test]
    fn load_while_in_flight_is_rejected() {
        let mut session = SenderSession::new();
        session.load(Bytes::from_static(b"a")).unwrap();
        assert!(matches!(
            session.load(Bytes::from_static(b"b")),
            Err(Error::Busy)
        ));
    }

    #[test]
    fn retransmission_does_not_toggle_sequence() {
        let mut session = SenderSession::new();
        let first = session.load(Bytes::from_static(b"a")).unwrap();
        assert_eq!(session.on_timeout(), Some(first.clone()));
        assert_eq!(
            session.on_datagram(&[1]),
            Some(AckOutcome::Retransmit(first))
        );
        assert_eq!(session.next_sequence(), 0);
        assert_eq!(session.attempts(), 3);

        assert_eq!(session.on_datagram(&[0]), Some(AckOutcome::Confirmed { seq: 0 }));
        assert_eq!(session.in_flight_seq(), None);
        assert_eq!(session.on_timeout(), None);
        assert_eq!(session.on_datagram(&[0]), None);
    }

    #[test]
    fn only_the_matching_ack_confirms() {
        let mut session = SenderSession::new();
        assert!(!session.confirms(&[0]));
        session.load(Bytes::from_static(b"a")).unwrap();
        assert!(session.confirms(&[0]));
        assert!(!session.confirms(&[1]));
        assert!(!session.confirms(b"\x00a"));
        assert_eq!(session.stats().confirmed, 0);
    }

    #[test]
    fn data_frame_while_waiting_triggers_retransmit() {
        let mut session = SenderSession::new();
        let wire = session.load(Bytes::from_static(b"a")).unwrap();
        assert_eq!(
            session.on_datagram(b"\x00zz"),
            Some(AckOutcome::Retransmit(wire))
        );
    }

    #[tokio::test]
    async fn new_frames_alternate_across_retransmissions() {
        let link = ScriptedLink::new(vec![
            Step::Timeout,
            Step::Reply(vec![0]),
            Step::Reply(vec![0]),
            Step::Timeout,
            Step::Reply(vec![1]),
            Step::Reply(vec![0]),
        ]);
        let input = (&b"AB"[..]).chain(&b"CD"[..]).chain(&b"EF"[..]);
        let mut session = SenderSession::new();

        let completion = run_sender(
            &mut session,
            input,
            &link,
            &SenderConfig::default(),
            &mut Shutdown::never(),
        )
        .await
        .unwrap();

        assert_eq!(completion, Completion::Finished);
        assert_eq!(
            link.sent(),
            vec![
                b"\x00AB".to_vec(),
                b"\x00AB".to_vec(),
                b"\x01CD".to_vec(),
                b"\x01CD".to_vec(),
                b"\x01CD".to_vec(),
                b"\x00EF".to_vec(),
            ]
        );
        let stats = session.stats();
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.confirmed, 3);
        assert_eq!(stats.transmissions, 6);
        assert_eq!(stats.retransmissions, 3);
        assert_eq!(stats.timeouts, 2);
        assert_eq!(stats.stale_acks, 1);
    }

    #[tokio::test]
    async fn retransmission_bound_stops_the_loop() {
        let link = ScriptedLink::new((0..10).map(|_| Step::Timeout).collect());
        let config = SenderConfig {
            max_retransmissions: Some(2),
            ..Default::default()
        };
        let mut session = SenderSession::new();

        let err = run_sender(
            &mut session,
            &b"lost"[..],
            &link,
            &config,
            &mut Shutdown::never(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { seq: 0, attempts: 3 }));
        assert_eq!(link.sent().len(), 3);
    }

    #[tokio::test]
    async fn refused_receive_keeps_waiting_without_resending() {
        let link = ScriptedLink::new(vec![Step::Refused, Step::Reply(vec![0])]);
        let mut session = SenderSession::new();

        run_sender(
            &mut session,
            &b"x"[..],
            &link,
            &SenderConfig::default(),
            &mut Shutdown::never(),
        )
        .await
        .unwrap();

        assert_eq!(link.sent(), vec![b"\x00x".to_vec()]);
    }

    #[tokio::test]
    async fn cancelled_before_reading_input() {
        let link = ScriptedLink::new(Vec::new());
        let (trigger, mut shutdown) = shutdown::channel();
        trigger.trigger();
        let mut session = SenderSession::new();

        let completion = run_sender(
            &mut session,
            &b"never sent"[..],
            &link,
            &SenderConfig::default(),
            &mut shutdown,
        )
        .await
        .unwrap();

        assert_eq!(completion, Completion::Cancelled);
        assert!(link.sent().is_empty());
    }
}
