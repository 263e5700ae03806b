//! Ferry wire format — the on-wire packet for all Ferry communication.
//!
//! These types ARE the protocol. Every field, every size, every byte order
//! is part of the wire format; changing anything here is a breaking change
//! between endpoints. There is no version field on the wire, so two
//! endpoints built from diverging layouts will silently misinterpret each
//! other — keep this file stable.
//!
//! The header is #[repr(C, packed)] for deterministic layout and uses
//! zerocopy derives for safe, allocation-free serialization. There is no
//! unsafe code in this module.

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Layout ────────────────────────────────────────────────────────────────────

/// Fixed header size in bytes. Every datagram starts with this header.
pub const HEADER_SIZE: usize = 36;

/// Hard ceiling on payload size — the length field is 16 bits.
/// The per-session segment size is configured separately and is lower.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// The fixed 36-byte packet header preceding every payload.
///
/// The receiver can classify and verify a packet before touching a single
/// payload byte. `length` is big-endian on the wire.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PacketHeader {
    /// Packet type byte — see [`PacketKind`].
    pub kind: u8,

    /// Alternating sequence bit, 0 or 1. Zero for GET and NOTFOUND,
    /// which sit outside the stop-and-wait exchange.
    pub seq_bit: u8,

    /// Payload byte count, big-endian.
    pub length: U16<BigEndian>,

    /// SHA-256 digest. Per-segment digest for DATA, whole-file digest
    /// for EOR, zero-filled otherwise.
    pub hash: [u8; 32],
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(PacketHeader, [u8; 36]);

// ── Packet kinds ──────────────────────────────────────────────────────────────

/// What a packet means. The codec validates the byte; the session state
/// machines interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Request one file; payload is the UTF-8 filename.
    Get = 0x01,
    /// One file segment; hash covers the payload.
    Data = 0x02,
    /// Acknowledgment — seq_bit names the segment being acknowledged.
    /// Echoing the *other* bit is the implicit negative acknowledgment.
    Ack = 0x03,
    /// End of record; hash is the whole-file digest, no payload.
    Eor = 0x04,
    /// The requested file does not exist. Terminal, never retried.
    NotFound = 0x05,
}

impl TryFrom<u8> for PacketKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketKind::Get),
            0x02 => Ok(PacketKind::Data),
            0x03 => Ok(PacketKind::Ack),
            0x04 => Ok(PacketKind::Eor),
            0x05 => Ok(PacketKind::NotFound),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<PacketKind> for u8 {
    fn from(k: PacketKind) -> u8 {
        k as u8
    }
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// A decoded packet — an immutable value.
///
/// The codec guarantees structure only. A DATA packet with the wrong
/// sequence bit or a bogus digest decodes fine; accepting or rejecting it
/// is the session's job, not the codec's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub seq_bit: u8,
    pub hash: [u8; 32],
    pub payload: Bytes,
}

impl Packet {
    /// Request `name` from the server.
    pub fn get(name: &str) -> Packet {
        Packet {
            kind: PacketKind::Get,
            seq_bit: 0,
            hash: [0u8; 32],
            payload: Bytes::copy_from_slice(name.as_bytes()),
        }
    }

    /// One file segment. `hash` must be the SHA-256 of `payload`.
    pub fn data(seq_bit: u8, hash: [u8; 32], payload: Bytes) -> Packet {
        Packet {
            kind: PacketKind::Data,
            seq_bit,
            hash,
            payload,
        }
    }

    /// Acknowledge the segment carrying `seq_bit`.
    pub fn ack(seq_bit: u8) -> Packet {
        Packet {
            kind: PacketKind::Ack,
            seq_bit,
            hash: [0u8; 32],
            payload: Bytes::new(),
        }
    }

    /// End of record, carrying the whole-file digest.
    pub fn eor(seq_bit: u8, file_hash: [u8; 32]) -> Packet {
        Packet {
            kind: PacketKind::Eor,
            seq_bit,
            hash: file_hash,
            payload: Bytes::new(),
        }
    }

    pub fn not_found() -> Packet {
        Packet {
            kind: PacketKind::NotFound,
            seq_bit: 0,
            hash: [0u8; 32],
            payload: Bytes::new(),
        }
    }

    /// Serialize to wire bytes: 36-byte header followed by the payload.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }
        let header = PacketHeader {
            kind: self.kind.into(),
            seq_bit: self.seq_bit,
            length: U16::new(self.payload.len() as u16),
            hash: self.hash,
        };
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse one datagram. Fails on truncation and unknown type bytes;
    /// never on semantically unexpected content.
    pub fn decode(buf: &[u8]) -> Result<Packet, WireError> {
        let header = PacketHeader::read_from_prefix(buf).ok_or(WireError::Truncated {
            have: buf.len(),
            need: HEADER_SIZE,
        })?;
        let need = HEADER_SIZE + header.length.get() as usize;
        if buf.len() < need {
            return Err(WireError::Truncated {
                have: buf.len(),
                need,
            });
        }
        Ok(Packet {
            kind: PacketKind::try_from(header.kind)?,
            seq_bit: header.seq_bit,
            hash: header.hash,
            payload: Bytes::copy_from_slice(&buf[HEADER_SIZE..need]),
        })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when encoding or decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown packet type byte: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("packet truncated: have {have} bytes, need {need}")]
    Truncated { have: usize, need: usize },

    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
