//! Datagram socket adapters.
//!
//! A transfer owns up to two inbound packet paths: a unicast socket that
//! carries OACK, DATA and ERROR from the server and our outgoing requests
//! and acknowledgements, and an optional multicast socket that carries DATA
//! only. Both surface the datagram source address so the engine can filter
//! by transfer identifier.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use crate::error::{Result, TftpError};

/// Unicast socket bound to an ephemeral local port with a fixed default
/// destination (the server's well-known port).
#[derive(Debug)]
pub(crate) struct UnicastSocket {
    socket: UdpSocket,
    server: SocketAddr,
}

impl UnicastSocket {
    /// Resolves `host` and opens a fresh socket aimed at `host:port`.
    ///
    /// Opening a new socket is also how a transfer is restarted: a fresh
    /// ephemeral port means a fresh transfer identifier.
    pub(crate) async fn open(host: &str, port: u16) -> Result<Self> {
        let server = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| TftpError::InvalidArgument(format!("no address for {host:?}")))?;
        let bind_addr: SocketAddr = match server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        debug!(%server, local = %socket.local_addr()?, "opened transfer socket");
        Ok(Self { socket, server })
    }

    /// Sends to the default destination. Used for read requests, which
    /// always go to the server's well-known port.
    pub(crate) async fn send(&self, buf: &[u8]) -> io::Result<()> {
        self.socket.send_to(buf, self.server).await.map(|_| ())
    }

    /// Sends to an explicit destination. Used for acknowledgements, which
    /// go to the server's per-transfer data port.
    pub(crate) async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.socket.send_to(buf, dest).await.map(|_| ())
    }

    pub(crate) async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}

/// Multicast listening socket.
///
/// Never used for sending; the group address stands in as the peer. When
/// the configured endpoint is not actually a multicast group (useful when
/// the deployment delivers "multicast" traffic point-to-point) the socket
/// simply listens on the port without joining anything.
#[derive(Debug)]
pub(crate) struct MulticastSocket {
    socket: UdpSocket,
}

impl MulticastSocket {
    pub(crate) async fn open(group: SocketAddrV4) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port()))).await?;
        if group.ip().is_multicast() {
            socket.join_multicast_v4(*group.ip(), Ipv4Addr::UNSPECIFIED)?;
        }
        debug!(%group, "listening for multicast data");
        Ok(Self { socket })
    }

    pub(crate) async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    /// The local port actually bound, for tests that listen on port 0.
    #[cfg(test)]
    fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }
}
