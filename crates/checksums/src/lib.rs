//! # Overview
//!
//! `checksums` provides the two hash primitives the relay protocol relies on:
//!
//! - [`frame_checksum`] computes the CRC32 (IEEE) value carried in every wire
//!   frame's trailer (see the frame codec in the `protocol` crate).
//! - [`Md5`] is a streaming MD5 hasher used both for the per-chunk hash
//!   (`chunkMd5`) and the whole-file hash (`md5Hash`) in the file transfer
//!   engine.
//!
//! Keeping these behind a small crate mirrors the teacher workspace's
//! `checksums` crate, which isolates hashing concerns from the protocol and
//! transfer layers so either can evolve independently.
//!
//! # Invariants
//!
//! - [`frame_checksum`] is a pure function: the same bytes always produce the
//!   same checksum, and it never panics.
//! - [`Md5`] streams data incrementally and never panics; callers drive it to
//!   completion with [`Md5::finalize`].

mod md5;

pub use md5::{to_hex, Md5};

/// Computes the CRC32 (IEEE 802.3 polynomial) checksum of `payload`.
///
/// This is the checksum placed in a frame's trailer (§6 of the wire
/// protocol): the decoder recomputes it over the received payload bytes and
/// rejects the frame with `CHECKSUM_MISMATCH` on a mismatch.
#[must_use]
pub fn frame_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_checksum_is_deterministic() {
        let payload = b"communication-data-payload";
        assert_eq!(frame_checksum(payload), frame_checksum(payload));
    }

    #[test]
    fn frame_checksum_differs_for_different_payloads() {
        assert_ne!(frame_checksum(b"abc"), frame_checksum(b"abd"));
    }

    #[test]
    fn frame_checksum_of_empty_payload_is_zero() {
        assert_eq!(frame_checksum(b""), 0);
    }
}
