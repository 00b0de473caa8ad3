//! Lossy relay between sender and receiver.
//!
//! The medium holds one association toward each endpoint and forwards every
//! datagram to the other side unless an independent random draw drops it. Both
//! directions share the same loss probability; nothing about a frame is
//! remembered after its verdict.

use std::fmt;
use std::str::FromStr;

use abp_abstract::MAX_DATAGRAM;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, is_transient};
use crate::shutdown::{Completion, Shutdown};
use crate::transport::{Link, RecvOutcome};

/// Probability in `[0, 1]` that a single frame is dropped.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct LossProbability(f64);

impl LossProbability {
    pub const NONE: Self = Self(0.0);
    pub const ALL: Self = Self(1.0);

    pub fn new(p: f64) -> Result<Self> {
        if (0.0..=1.0).contains(&p) {
            Ok(Self(p))
        } else {
            Err(Error::InvalidLossProbability(p.to_string()))
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for LossProbability {
    fn default() -> Self {
        Self::NONE
    }
}

impl FromStr for LossProbability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let p = s
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::InvalidLossProbability(s.to_string()))?;
        Self::new(p)
    }
}

impl fmt::Display for LossProbability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    SenderToReceiver,
    ReceiverToSender,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::SenderToReceiver => "S->R",
            Direction::ReceiverToSender => "R->S",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Transmitted,
    Lost,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Transmitted => "transmitted",
            Verdict::Lost => "lost",
        })
    }
}

/// Independent per-frame drop decisions.
#[derive(Debug, Clone)]
pub struct LossModel<R = StdRng> {
    probability: LossProbability,
    rng: R,
}

impl LossModel<StdRng> {
    pub fn seeded(probability: LossProbability, seed: u64) -> Self {
        Self::new(probability, StdRng::seed_from_u64(seed))
    }

    pub fn from_os_rng(probability: LossProbability) -> Self {
        Self::new(probability, StdRng::from_os_rng())
    }
}

impl<R: Rng> LossModel<R> {
    pub fn new(probability: LossProbability, rng: R) -> Self {
        Self { probability, rng }
    }

    pub fn probability(&self) -> LossProbability {
        self.probability
    }

    /// Draw r from [0, 1) and drop when `r <= p`. One value is drawn per call
    /// whatever `p` is, so a seeded stream does not depend on the probability;
    /// `p = 0` never drops.
    pub fn decide(&mut self) -> Verdict {
        let r: f64 = self.rng.random();
        let p = self.probability.get();
        if p > 0.0 && r <= p {
            Verdict::Lost
        } else {
            Verdict::Transmitted
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectionStats {
    pub transmitted: u64,
    pub lost: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediumStats {
    pub sender_to_receiver: DirectionStats,
    pub receiver_to_sender: DirectionStats,
}

impl MediumStats {
    pub fn direction(&self, direction: Direction) -> &DirectionStats {
        match direction {
            Direction::SenderToReceiver => &self.sender_to_receiver,
            Direction::ReceiverToSender => &self.receiver_to_sender,
        }
    }

    fn record(&mut self, direction: Direction, verdict: Verdict) {
        let stats = match direction {
            Direction::SenderToReceiver => &mut self.sender_to_receiver,
            Direction::ReceiverToSender => &mut self.receiver_to_sender,
        };
        match verdict {
            Verdict::Transmitted => stats.transmitted += 1,
            Verdict::Lost => stats.lost += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediumConfig {
    pub loss: LossProbability,
    /// Fixed RNG seed; `None` seeds from the operating system.
    pub seed: Option<u64>,
}

/// First byte of a datagram as it appears in the relay log, `-` when empty.
struct Identifier<'a>(&'a [u8]);

impl fmt::Display for Identifier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.first() {
            Some(byte) => byte.fmt(f),
            None => f.write_str("-"),
        }
    }
}

#[derive(Debug)]
pub struct Medium<R = StdRng> {
    loss: LossModel<R>,
    stats: MediumStats,
}

impl Medium<StdRng> {
    pub fn from_config(config: &MediumConfig) -> Self {
        let loss = match config.seed {
            Some(seed) => LossModel::seeded(config.loss, seed),
            None => LossModel::from_os_rng(config.loss),
        };
        Self::new(loss)
    }
}

impl<R: Rng> Medium<R> {
    pub fn new(loss: LossModel<R>) -> Self {
        Self {
            loss,
            stats: MediumStats::default(),
        }
    }

    pub fn stats(&self) -> &MediumStats {
        &self.stats
    }

    /// Decide the fate of one datagram and log it.
    pub fn judge(&mut self, direction: Direction, datagram: &[u8]) -> Verdict {
        let verdict = self.loss.decide();
        self.stats.record(direction, verdict);
        info!("{}, seq={} -> {}", direction, Identifier(datagram), verdict);
        verdict
    }
}

/// Relay datagrams between the two associations until cancelled.
pub async fn run_medium<R, A, B>(
    medium: &mut Medium<R>,
    toward_sender: &A,
    toward_receiver: &B,
    shutdown: &mut Shutdown,
) -> Result<Completion>
where
    R: Rng,
    A: Link,
    B: Link,
{
    let mut from_sender = vec![0u8; MAX_DATAGRAM];
    let mut from_receiver = vec![0u8; MAX_DATAGRAM];

    loop {
        // Shutdown wins; the two links are polled in random order so a busy
        // direction cannot starve the other.
        let links = async {
            tokio::select! {
                r = toward_sender.receive(&mut from_sender, None) => (Direction::SenderToReceiver, r),
                r = toward_receiver.receive(&mut from_receiver, None) => (Direction::ReceiverToSender, r),
            }
        };
        let (direction, received) = tokio::select! {
            biased;
            _ = shutdown.triggered() => return Ok(Completion::Cancelled),
            next = links => next,
        };

        let len = match received {
            Ok(RecvOutcome::Datagram(len)) => len,
            Ok(RecvOutcome::TimedOut) => continue,
            Err(e) if is_transient(&e) => {
                warn!(%direction, error = %e, "transient receive error");
                continue;
            }
            Err(e) => return Err(Error::io("relay receive", e)),
        };

        let (datagram, sent) = match direction {
            Direction::SenderToReceiver => {
                // An empty datagram would end the receiver's stream.
                if len == 0 {
                    debug!("ignoring empty datagram from sender");
                    continue;
                }
                let datagram = &from_sender[..len];
                if medium.judge(direction, datagram) == Verdict::Lost {
                    continue;
                }
                (datagram, toward_receiver.transmit(datagram).await)
            }
            Direction::ReceiverToSender => {
                let datagram = &from_receiver[..len];
                if medium.judge(direction, datagram) == Verdict::Lost {
                    continue;
                }
                (datagram, toward_sender.transmit(datagram).await)
            }
        };

        match sent {
            Ok(()) => {}
            Err(e) if is_transient(&e) => {
                warn!(%direction, bytes = datagram.len(), error = %e, "transient send error");
            }
            Err(e) => return Err(Error::io("relay send", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory;
    use crate::shutdown;

    #[test]
    fn loss_probability_rejects_out_of_range() {
        assert!(LossProbability::new(-0.1).is_err());
        assert!(LossProbability::new(1.5).is_err());
        assert!(LossProbability::new(f64::NAN).is_err());
        assert_eq!(LossProbability::new(1.0).unwrap(), LossProbability::ALL);
    }

    #[test]
    fn loss_probability_parses_from_arguments() {
        let p: LossProbability = "0.25".parse().unwrap();
        assert_eq!(p.get(), 0.25);
        assert!(matches!(
            "lots".parse::<LossProbability>(),
            Err(Error::InvalidLossProbability(_))
        ));
        assert!("2".parse::<LossProbability>().is_err());
    }

    #[test]
    fn zero_probability_never_drops() {
        let mut model = LossModel::seeded(LossProbability::NONE, 7);
        assert!((0..10_000).all(|_| model.decide() == Verdict::Transmitted));
    }

    #[test]
    fn full_probability_always_drops() {
        let mut model = LossModel::seeded(LossProbability::ALL, 7);
        assert!((0..10_000).all(|_| model.decide() == Verdict::Lost));
    }

    #[test]
    fn empirical_drop_rate_converges() {
        let p = LossProbability::new(0.3).unwrap();
        let mut model = LossModel::seeded(p, 42);
        let draws = 100_000;
        let lost = (0..draws).filter(|_| model.decide() == Verdict::Lost).count();
        let rate = lost as f64 / draws as f64;
        assert!((rate - 0.3).abs() < 0.01, "drop rate {rate}");
    }

    #[test]
    fn identifier_is_first_byte_or_dash() {
        assert_eq!(Identifier(&[1, 65]).to_string(), "1");
        assert_eq!(Identifier(&[]).to_string(), "-");
        assert_eq!(Direction::ReceiverToSender.to_string(), "R->S");
        assert_eq!(Verdict::Lost.to_string(), "lost");
    }

    #[test]
    fn judge_counts_per_direction() {
        let mut medium = Medium::new(LossModel::seeded(LossProbability::ALL, 1));
        medium.judge(Direction::SenderToReceiver, b"\x00x");
        medium.judge(Direction::SenderToReceiver, b"\x01y");
        medium.judge(Direction::ReceiverToSender, b"\x00");
        let stats = medium.stats();
        assert_eq!(stats.direction(Direction::SenderToReceiver).lost, 2);
        assert_eq!(stats.direction(Direction::ReceiverToSender).lost, 1);
        assert_eq!(stats.sender_to_receiver.transmitted, 0);
    }

    #[tokio::test]
    async fn lossless_medium_relays_both_ways() {
        let (sender, medium_s) = memory::pair();
        let (medium_r, receiver) = memory::pair();
        let (trigger, mut shutdown) = shutdown::channel();
        let mut medium = Medium::new(LossModel::seeded(LossProbability::NONE, 3));

        let endpoints = async {
            let mut buf = [0u8; 8];
            sender.transmit(b"\x00hi").await.unwrap();
            let n = match receiver.receive(&mut buf, None).await.unwrap() {
                RecvOutcome::Datagram(n) => n,
                RecvOutcome::TimedOut => unreachable!(),
            };
            assert_eq!(&buf[..n], b"\x00hi");

            receiver.transmit(&[0]).await.unwrap();
            let n = match sender.receive(&mut buf, None).await.unwrap() {
                RecvOutcome::Datagram(n) => n,
                RecvOutcome::TimedOut => unreachable!(),
            };
            assert_eq!(&buf[..n], &[0]);
            trigger.trigger();
        };

        let (relayed, ()) = tokio::join!(
            run_medium(&mut medium, &medium_s, &medium_r, &mut shutdown),
            endpoints
        );
        assert_eq!(relayed.unwrap(), Completion::Cancelled);
        assert_eq!(medium.stats().sender_to_receiver.transmitted, 1);
        assert_eq!(medium.stats().receiver_to_sender.transmitted, 1);
    }

    #[tokio::test]
    async fn empty_datagram_from_sender_is_not_relayed() {
        let (sender, medium_s) = memory::pair();
        let (medium_r, receiver) = memory::pair();
        let (trigger, mut shutdown) = shutdown::channel();
        let mut medium = Medium::new(LossModel::seeded(LossProbability::NONE, 3));

        let endpoints = async {
            sender.transmit(&[]).await.unwrap();
            sender.transmit(b"\x01z").await.unwrap();
            let mut buf = [0u8; 8];
            let n = match receiver.receive(&mut buf, None).await.unwrap() {
                RecvOutcome::Datagram(n) => n,
                RecvOutcome::TimedOut => unreachable!(),
            };
            assert_eq!(&buf[..n], b"\x01z");
            trigger.trigger();
        };

        let (relayed, ()) = tokio::join!(
            run_medium(&mut medium, &medium_s, &medium_r, &mut shutdown),
            endpoints
        );
        assert_eq!(relayed.unwrap(), Completion::Cancelled);
        let stats = medium.stats();
        assert_eq!(stats.sender_to_receiver.transmitted, 1);
        assert_eq!(stats.sender_to_receiver.lost, 0);
    }

    #[tokio::test]
    async fn sender_flood_does_not_starve_acks() {
        const FLOOD: usize = 5000;
        let (sender, medium_s) = memory::pair();
        let (medium_r, receiver) = memory::pair();
        let (trigger, mut shutdown) = shutdown::channel();
        let mut medium = Medium::new(LossModel::seeded(LossProbability::NONE, 3));

        let endpoints = async {
            for _ in 0..FLOOD {
                sender.transmit(b"\x00x").await.unwrap();
            }
            receiver.transmit(&[0]).await.unwrap();
            let mut buf = [0u8; 8];
            let n = match sender.receive(&mut buf, None).await.unwrap() {
                RecvOutcome::Datagram(n) => n,
                RecvOutcome::TimedOut => unreachable!(),
            };
            assert_eq!(&buf[..n], &[0]);
            trigger.trigger();
        };

        let (relayed, ()) = tokio::join!(
            run_medium(&mut medium, &medium_s, &medium_r, &mut shutdown),
            endpoints
        );
        assert_eq!(relayed.unwrap(), Completion::Cancelled);
        let stats = medium.stats();
        assert_eq!(stats.receiver_to_sender.transmitted, 1);
        assert!(stats.sender_to_receiver.transmitted < FLOOD as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn total_loss_forwards_nothing() {
        let (sender, medium_s) = memory::pair();
        let (medium_r, receiver) = memory::pair();
        let (trigger, mut shutdown) = shutdown::channel();
        let mut medium = Medium::new(LossModel::seeded(LossProbability::ALL, 3));

        let endpoints = async {
            for _ in 0..5 {
                sender.transmit(b"\x00hi").await.unwrap();
            }
            let mut buf = [0u8; 8];
            let outcome = receiver
                .receive(&mut buf, Some(std::time::Duration::from_secs(1)))
                .await
                .unwrap();
            assert_eq!(outcome, RecvOutcome::TimedOut);
            trigger.trigger();
        };

        let (relayed, ()) = tokio::join!(
            run_medium(&mut medium, &medium_s, &medium_r, &mut shutdown),
            endpoints
        );
        assert_eq!(relayed.unwrap(), Completion::Cancelled);
        assert_eq!(medium.stats().sender_to_receiver.lost, 5);
    }
}
