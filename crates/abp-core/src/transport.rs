//! Transport associations the protocol runs over.
//!
//! The protocol only needs two shapes of datagram channel:
//! - [`Link`]: an association bound to exactly one peer (the sender's socket,
//!   both of the medium's sockets). Receiving takes an explicit timeout.
//! - [`DatagramSocket`]: a socket shared by whoever writes to it (the
//!   receiver), replying to the address each datagram came from.
//!
//! Both are implemented for [`tokio::net::UdpSocket`]; see
//! [`crate::memory`] for the in-process version.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A datagram of this many bytes was written to the buffer. Zero means
    /// the peer signalled end of stream.
    Datagram(usize),
    /// The timeout elapsed with nothing received.
    TimedOut,
}

#[allow(async_fn_in_trait)]
pub trait Link {
    async fn transmit(&self, datagram: &[u8]) -> io::Result<()>;

    /// Wait for one datagram. `None` waits without bound.
    async fn receive(&self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<RecvOutcome>;
}

#[allow(async_fn_in_trait)]
pub trait DatagramSocket {
    type Peer: Copy + fmt::Debug;

    async fn receive_from(&self, buf: &mut [u8]) -> io::Result<(usize, Self::Peer)>;

    async fn transmit_to(&self, datagram: &[u8], peer: Self::Peer) -> io::Result<()>;
}

/// Connected UDP socket.
impl Link for UdpSocket {
    async fn transmit(&self, datagram: &[u8]) -> io::Result<()> {
        self.send(datagram).await.map(|_| ())
    }

    async fn receive(&self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<RecvOutcome> {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.recv(buf)).await {
                Ok(received) => received.map(RecvOutcome::Datagram),
                Err(_) => Ok(RecvOutcome::TimedOut),
            },
            None => self.recv(buf).await.map(RecvOutcome::Datagram),
        }
    }
}

impl DatagramSocket for UdpSocket {
    type Peer = SocketAddr;

    async fn receive_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }

    async fn transmit_to(&self, datagram: &[u8], peer: SocketAddr) -> io::Result<()> {
        self.send_to(datagram, peer).await.map(|_| ())
    }
}

/// Resolve `host:port`, taking the first address returned.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::io("resolve address", e))?;
    addrs.next().ok_or_else(|| Error::Resolve {
        host: host.to_string(),
        port,
    })
}

/// Bind `[::]:port`. On hosts where IPv6 sockets accept IPv4 traffic (the
/// Linux default), this listens on both families.
pub async fn bind_dual_stack(port: u16) -> Result<UdpSocket> {
    let local = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    let socket = UdpSocket::bind(local)
        .await
        .map_err(|e| Error::io("bind socket", e))?;
    debug!(local = %local, "bound dual-stack socket");
    Ok(socket)
}

/// Create a socket restricted to `remote`. With a local port the socket is
/// bound dual-stack to it; otherwise the OS picks an ephemeral port in the
/// remote's address family.
pub async fn connect_link(local_port: Option<u16>, remote: SocketAddr) -> Result<UdpSocket> {
    let (socket, remote) = match local_port {
        Some(port) => (bind_dual_stack(port).await?, to_ipv6(remote)),
        None => {
            let unspecified: IpAddr = match remote {
                SocketAddr::V4(_) => IpAddr::from([0u8, 0, 0, 0]),
                SocketAddr::V6(_) => IpAddr::from(Ipv6Addr::UNSPECIFIED),
            };
            let socket = UdpSocket::bind((unspecified, 0))
                .await
                .map_err(|e| Error::io("bind socket", e))?;
            (socket, remote)
        }
    };
    socket
        .connect(remote)
        .await
        .map_err(|e| Error::io("connect socket", e))?;
    debug!(remote = %remote, "socket connected");
    Ok(socket)
}

/// IPv4 peers are reached from a dual-stack socket through mapped addresses.
fn to_ipv6(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(v4) => {
            SocketAddr::V6(SocketAddrV6::new(v4.ip().to_ipv6_mapped(), v4.port(), 0, 0))
        }
        v6 => v6,
    }
}
