//! Datagram transport — deadline receives over a shared UDP socket.
//!
//! A UDP socket has a single read point. On the server that read point is
//! owned by the serve loop, which fans inbound datagrams out to per-peer
//! inboxes; each delivery session then runs its send/await-ack loop
//! against its own inbox without ever touching the socket's read side.
//! Writes need no such coordination — sends to distinct peers are
//! independent.
//!
//! Malformed datagrams are dropped at decode and are indistinguishable
//! from loss to the session above: it sees silence and charges its retry
//! budget, the same way it accounts for a lost datagram.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use ferry_core::wire::{Packet, WireError, HEADER_SIZE, MAX_PAYLOAD};

/// Per-peer inbox depth. A stalled session drops datagrams instead of
/// blocking the socket reader; a dropped datagram is covered by the same
/// retransmission that covers network loss.
pub const INBOX_DEPTH: usize = 16;

/// Routing table from peer address to session inbox.
pub type PeerMap = Arc<DashMap<SocketAddr, mpsc::Sender<Packet>>>;

pub fn new_peer_map() -> PeerMap {
    Arc::new(DashMap::new())
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("packet encoding failed: {0}")]
    Encode(#[from] WireError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ── Server side ───────────────────────────────────────────────────────────────

/// One delivery session's view of the shared server socket: writes go
/// straight out, reads come from the inbox the serve loop feeds.
pub struct SessionTransport {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbox: mpsc::Receiver<Packet>,
}

impl SessionTransport {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr, inbox: mpsc::Receiver<Packet>) -> Self {
        Self {
            socket,
            peer,
            inbox,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one packet to this session's peer.
    pub async fn send(&self, packet: &Packet) -> Result<(), TransportError> {
        let bytes = packet.encode()?;
        self.socket.send_to(&bytes, self.peer).await?;
        Ok(())
    }

    /// Wait up to `deadline` for the next packet from this peer.
    /// `None` covers expiry and a torn-down dispatch loop alike — to the
    /// session both are "no qualifying response arrived".
    pub async fn recv_deadline(&mut self, deadline: Duration) -> Option<Packet> {
        match tokio::time::timeout(deadline, self.inbox.recv()).await {
            Ok(Some(packet)) => Some(packet),
            Ok(None) | Err(_) => None,
        }
    }
}

// ── Client side ───────────────────────────────────────────────────────────────

/// Client-side transport: a connected socket with a single owner, so
/// reads come straight off the wire.
pub struct DatagramLink {
    socket: UdpSocket,
}

impl DatagramLink {
    /// Bind an ephemeral local port and connect it to `server`.
    pub async fn connect(server: SocketAddr) -> std::io::Result<Self> {
        let socket = match server {
            SocketAddr::V4(_) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?,
            SocketAddr::V6(_) => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)).await?,
        };
        socket.connect(server).await?;
        Ok(Self { socket })
    }

    pub async fn send(&self, packet: &Packet) -> Result<(), TransportError> {
        let bytes = packet.encode()?;
        self.socket.send(&bytes).await?;
        Ok(())
    }

    /// Receive one well-formed packet before the deadline. Malformed
    /// datagrams are dropped while the remaining time keeps ticking, so
    /// the caller sees them as silence.
    pub async fn recv_deadline(&self, deadline: Duration) -> Option<Packet> {
        let mut buf = vec![0u8; HEADER_SIZE + MAX_PAYLOAD];
        let deadline = tokio::time::Instant::now() + deadline;
        loop {
            let n = match tokio::time::timeout_at(deadline, self.socket.recv(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "socket read failed");
                    return None;
                }
                Err(_) => return None,
            };
            match Packet::decode(&buf[..n]) {
                Ok(packet) => return Some(packet),
                Err(e) => tracing::debug!(error = %e, "dropping malformed datagram"),
            }
        }
    }
}
