//! SHA-256 digests — segment and whole-file integrity.
//!
//! Two granularities, both mandatory: the per-segment digest catches
//! in-flight corruption of one datagram; the whole-file digest carried in
//! the EOR packet catches segment omission or duplication that a one-bit
//! sequence number cannot.

use sha2::{Digest as _, Sha256};

/// Digest size in bytes, as carried in the packet header.
pub const DIGEST_SIZE: usize = 32;

/// Hash a byte slice, returning the 32-byte SHA-256 digest.
pub fn digest(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Exact byte comparison of `data`'s digest against `expected`.
pub fn verify(data: &[u8], expected: &[u8; DIGEST_SIZE]) -> bool {
    digest(data) == *expected
}

/// Incremental SHA-256 hasher for content that arrives in pieces.
///
/// # Example
/// ```
/// use ferry_core::digest::{digest, Hasher};
/// let mut h = Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// assert_eq!(h.finalize(), digest(b"hello world"));
/// ```
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; DIGEST_SIZE] {
        self.0.finalize().into()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
