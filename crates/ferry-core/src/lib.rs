//! ferry-core — wire format, digests, and configuration.
//! The other Ferry crates depend on this one.

pub mod config;
pub mod digest;
pub mod wire;

pub use wire::{Packet, PacketKind, WireError, HEADER_SIZE, MAX_PAYLOAD};
