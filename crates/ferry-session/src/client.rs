//! Client side — request, validate, reassemble, verify, persist.
//!
//! The client never retransmits anything except acknowledgments; the
//! server owns retransmission. On silence the client can only re-arm its
//! deadline and charge its retry budget. A rejected segment is answered
//! with an ACK carrying the *previous* bit — the implicit NACK the
//! server's accept logic depends on.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ferry_core::config::TransferConfig;
use ferry_core::digest;
use ferry_core::wire::{Packet, PacketKind};

use crate::transport::{DatagramLink, TransportError};

/// Terminal download outcomes short of a persisted file.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("server has no such file")]
    NotFound,
    #[error("whole-file digest mismatch: expected {expected}, computed {computed}")]
    IntegrityMismatch { expected: String, computed: String },
    #[error("no response from server after {0} timeouts")]
    RetryExhausted(u32),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("could not persist download: {0}")]
    Persist(#[source] std::io::Error),
}

/// Fetch `filename` from `server` and persist it under `output_dir`.
///
/// Returns the path of the written file. Nothing is ever written unless
/// the reassembled buffer matches the whole-file digest from the EOR
/// packet — partial or unverified data is discarded.
pub async fn download(
    server: SocketAddr,
    transfer: &TransferConfig,
    filename: &str,
    output_dir: &Path,
) -> Result<PathBuf, DownloadError> {
    let link = DatagramLink::connect(server)
        .await
        .map_err(TransportError::Io)?;
    link.send(&Packet::get(filename)).await?;
    tracing::info!(%server, filename, "download requested");

    let mut expected_bit: u8 = 0;
    let mut buffer: Vec<u8> = Vec::new();
    let mut timeouts: u32 = 0;

    let file_digest = loop {
        let packet = match link.recv_deadline(transfer.timeout()).await {
            Some(p) => p,
            None => {
                timeouts += 1;
                if timeouts > transfer.max_retries {
                    tracing::warn!(filename, timeouts, "giving up, discarding partial buffer");
                    return Err(DownloadError::RetryExhausted(timeouts));
                }
                // Nothing to resend from this side; re-arm and keep waiting.
                continue;
            }
        };
        match packet.kind {
            PacketKind::NotFound => {
                tracing::warn!(filename, "server has no such file");
                return Err(DownloadError::NotFound);
            }
            PacketKind::Data => {
                if packet.seq_bit == expected_bit && digest::verify(&packet.payload, &packet.hash)
                {
                    buffer.extend_from_slice(&packet.payload);
                    send_ack(&link, expected_bit).await;
                    expected_bit ^= 1;
                    timeouts = 0;
                    tracing::trace!(bytes = buffer.len(), "segment accepted");
                } else {
                    // Implicit NACK: re-acknowledge the previous bit to
                    // prompt an identical resend. Buffer and expected bit
                    // stay untouched.
                    tracing::debug!(
                        seq = packet.seq_bit,
                        expected = expected_bit,
                        "rejecting segment"
                    );
                    send_ack(&link, expected_bit ^ 1).await;
                }
            }
            PacketKind::Eor => {
                send_ack(&link, packet.seq_bit).await;
                break packet.hash;
            }
            other => {
                tracing::debug!(kind = ?other, "ignoring unexpected packet");
            }
        }
    };

    // Last line of defense: every segment was verified individually, but
    // only this catches omission or duplication of whole segments.
    let computed = digest::digest(&buffer);
    if computed != file_digest {
        tracing::warn!(
            filename,
            expected = %hex::encode(file_digest),
            computed = %hex::encode(computed),
            "whole-file digest mismatch, discarding buffer"
        );
        return Err(DownloadError::IntegrityMismatch {
            expected: hex::encode(file_digest),
            computed: hex::encode(computed),
        });
    }

    let path = persist(output_dir, filename, &buffer)
        .await
        .map_err(DownloadError::Persist)?;
    tracing::info!(
        filename,
        bytes = buffer.len(),
        path = %path.display(),
        "file verified and saved"
    );
    Ok(path)
}

/// A lost ACK and a failed ACK send are the same event to the protocol —
/// the server times out and retransmits — so failures only get logged.
async fn send_ack(link: &DatagramLink, seq_bit: u8) {
    if let Err(e) = link.send(&Packet::ack(seq_bit)).await {
        tracing::debug!(seq = seq_bit, error = %e, "ack send failed");
    }
}

/// Write the verified bytes to a temp name and rename into place, so no
/// observer ever sees a partial file under the final name.
async fn persist(dir: &Path, filename: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let leaf = Path::new(filename)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("download"));
    let final_path = dir.join(&leaf);
    let part_path = dir.join(format!("{}.part", leaf.to_string_lossy()));
    tokio::fs::write(&part_path, data).await?;
    tokio::fs::rename(&part_path, &final_path).await?;
    Ok(final_path)
}
