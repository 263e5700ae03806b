//! ferry-session — the stop-and-wait protocol state machines.
//!
//! The server side spawns one delivery session per requesting peer; the
//! client side runs one download to completion. Both sides resolve every
//! recoverable condition internally through the retry loop — only terminal
//! outcomes surface to callers.

pub mod client;
pub mod server;
pub mod transport;

pub use client::{download, DownloadError};
pub use server::serve;
