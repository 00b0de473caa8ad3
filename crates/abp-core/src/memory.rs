//! In-process associations backed by tokio channels.
//!
//! [`pair`] returns two connected endpoints. Datagrams are delivered in order
//! and never lost; put a [`crate::Medium`] between two pairs to add loss. A
//! dropped endpoint reads as a zero-length datagram on the other side, the
//! same end-of-stream signal the receiver honours on a real socket.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};

use crate::transport::{DatagramSocket, Link, RecvOutcome};

#[derive(Debug)]
pub struct MemoryLink {
    outbound: mpsc::UnboundedSender<Bytes>,
    inbound: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

pub fn pair() -> (MemoryLink, MemoryLink) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryLink {
            outbound: a_tx,
            inbound: Mutex::new(b_rx),
        },
        MemoryLink {
            outbound: b_tx,
            inbound: Mutex::new(a_rx),
        },
    )
}

fn copy_out(datagram: Option<Bytes>, buf: &mut [u8]) -> usize {
    match datagram {
        Some(bytes) => {
            let len = bytes.len().min(buf.len());
            buf[..len].copy_from_slice(&bytes[..len]);
            len
        }
        None => 0,
    }
}

impl Link for MemoryLink {
    async fn transmit(&self, datagram: &[u8]) -> io::Result<()> {
        self.outbound
            .send(Bytes::copy_from_slice(datagram))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer endpoint dropped"))
    }

    async fn receive(&self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<RecvOutcome> {
        let mut inbound = self.inbound.lock().await;
        let datagram = match timeout {
            Some(limit) => match tokio::time::timeout(limit, inbound.recv()).await {
                Ok(datagram) => datagram,
                Err(_) => return Ok(RecvOutcome::TimedOut),
            },
            None => inbound.recv().await,
        };
        Ok(RecvOutcome::Datagram(copy_out(datagram, buf)))
    }
}

/// Replies always go to the single peer of the pair.
impl DatagramSocket for MemoryLink {
    type Peer = ();

    async fn receive_from(&self, buf: &mut [u8]) -> io::Result<(usize, ())> {
        let datagram = self.inbound.lock().await.recv().await;
        Ok((copy_out(datagram, buf), ()))
    }

    async fn transmit_to(&self, datagram: &[u8], _peer: ()) -> io::Result<()> {
        self.transmit(datagram).await
    }
}
