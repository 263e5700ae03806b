//! Server side — per-peer stop-and-wait delivery sessions.
//!
//! The serve loop is the socket's only reader. A well-formed GET from an
//! unknown peer spawns a delivery session keyed by that peer's address;
//! everything else from a known peer is routed into the session's inbox.
//! Sessions share nothing mutable, so a stalled peer cannot delay the
//! others.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use ferry_core::config::FerryConfig;
use ferry_core::digest;
use ferry_core::wire::{Packet, PacketKind, HEADER_SIZE, MAX_PAYLOAD};

use crate::transport::{self, SessionTransport, INBOX_DEPTH};

// ── Serve loop ────────────────────────────────────────────────────────────────

/// Run the server on `socket` until the socket dies.
///
/// Demultiplexes inbound datagrams by source address: packets for a live
/// session go to its inbox (dropped if the inbox is full — a session that
/// isn't reading is indistinguishable from a lossy path, and the ARQ
/// covers it), a GET from a fresh peer starts a new session, anything
/// else is dropped.
pub async fn serve(socket: UdpSocket, config: FerryConfig) -> anyhow::Result<()> {
    config.validate()?;
    let socket = Arc::new(socket);
    let config = Arc::new(config);
    let peers = transport::new_peer_map();
    let mut buf = vec![0u8; HEADER_SIZE + MAX_PAYLOAD];

    tracing::info!(
        addr = %socket.local_addr()?,
        root = %config.server.root_path.display(),
        "ferryd listening"
    );

    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "socket read failed");
                continue;
            }
        };
        let packet = match Packet::decode(&buf[..n]) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "dropping malformed datagram");
                continue;
            }
        };

        if let Some(inbox) = peers.get(&peer) {
            if inbox.try_send(packet).is_err() {
                tracing::debug!(%peer, "session inbox full, dropping datagram");
            }
            continue;
        }

        if packet.kind != PacketKind::Get {
            tracing::debug!(%peer, kind = ?packet.kind, "packet for no session, dropping");
            continue;
        }

        let (tx, rx) = mpsc::channel(INBOX_DEPTH);
        peers.insert(peer, tx);
        let session = DeliverySession {
            transport: SessionTransport::new(socket.clone(), peer, rx),
            config: config.clone(),
            seq_bit: 0,
        };
        let peers = peers.clone();
        tokio::spawn(async move {
            session.run(packet).await;
            peers.remove(&peer);
        });
    }
}

// ── Delivery session ──────────────────────────────────────────────────────────

/// Why a delivery session ended short of a completed exchange.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("requested file is not in the served root")]
    NotFound,
    #[error("retries exhausted waiting for ack of seq bit {0}")]
    RetryExhausted(u8),
}

/// One file delivery to one peer: open, segment, send with ack-wait-retry,
/// finish with EOR carrying the whole-file digest.
struct DeliverySession {
    transport: SessionTransport,
    config: Arc<FerryConfig>,
    seq_bit: u8,
}

impl DeliverySession {
    async fn run(mut self, request: Packet) {
        let peer = self.transport.peer();
        let name = match std::str::from_utf8(&request.payload) {
            Ok(s) if !s.is_empty() => s.to_owned(),
            _ => {
                tracing::warn!(%peer, "GET without a usable filename");
                if let Err(e) = self.transport.send(&Packet::not_found()).await {
                    tracing::debug!(%peer, error = %e, "notfound send failed");
                }
                return;
            }
        };
        tracing::info!(%peer, filename = %name, "file requested");

        match self.deliver(&name).await {
            Ok(()) => tracing::info!(%peer, filename = %name, "transfer complete"),
            Err(SessionError::NotFound) => {
                tracing::warn!(%peer, filename = %name, "file not found")
            }
            Err(e @ SessionError::RetryExhausted(_)) => {
                // Abort: remaining segments are discarded and nothing more
                // is sent. The peer may hold a byte-correct buffer already,
                // but this exchange is incomplete on our side.
                tracing::warn!(%peer, filename = %name, error = %e, "aborting session");
            }
        }
    }

    async fn deliver(&mut self, name: &str) -> Result<(), SessionError> {
        let path = resolve(&self.config.server.root_path, name);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "open failed");
                if let Err(e) = self.transport.send(&Packet::not_found()).await {
                    tracing::debug!(error = %e, "notfound send failed");
                }
                return Err(SessionError::NotFound);
            }
        };

        let file_digest = digest::digest(&data);
        tracing::debug!(
            bytes = data.len(),
            digest = %hex::encode(file_digest),
            "serving file"
        );

        for segment in data.chunks(self.config.transfer.max_payload) {
            let packet = Packet::data(
                self.seq_bit,
                digest::digest(segment),
                Bytes::copy_from_slice(segment),
            );
            self.send_until_acked(&packet).await?;
            self.seq_bit ^= 1;
        }

        // End of record uses the same retry loop and carries the digest of
        // the whole file, which the receiver must check before persisting.
        self.send_until_acked(&Packet::eor(self.seq_bit, file_digest))
            .await
    }

    /// Transmit `packet` until an ACK carrying its sequence bit arrives.
    ///
    /// A retransmission is the byte-identical packet. Wrong-bit ACKs,
    /// malformed responses, send failures, and timeouts all charge the
    /// same retry budget; the budget resets when the next segment starts.
    async fn send_until_acked(&mut self, packet: &Packet) -> Result<(), SessionError> {
        let mut retries: u32 = 0;
        loop {
            if let Err(e) = self.transport.send(packet).await {
                // A failed send and a lost datagram look the same from
                // here: silence, then a retry.
                tracing::debug!(error = %e, "send failed");
            }
            match self
                .transport
                .recv_deadline(self.config.transfer.timeout())
                .await
            {
                Some(response)
                    if response.kind == PacketKind::Ack
                        && response.seq_bit == packet.seq_bit =>
                {
                    return Ok(());
                }
                Some(response) => {
                    tracing::debug!(
                        kind = ?response.kind,
                        seq = response.seq_bit,
                        expected = packet.seq_bit,
                        "response does not acknowledge current segment"
                    );
                }
                None => {
                    tracing::debug!(seq = packet.seq_bit, retries, "ack timeout");
                }
            }
            retries += 1;
            if retries > self.config.transfer.max_retries {
                return Err(SessionError::RetryExhausted(packet.seq_bit));
            }
        }
    }
}

/// Join the requested name under the served root, reduced to its final
/// path component so a request cannot escape the root.
fn resolve(root: &Path, name: &str) -> PathBuf {
    let leaf = Path::new(name)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    root.join(leaf)
}
