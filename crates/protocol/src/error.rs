//! Frame-level error taxonomy (§7 of the design).

use std::io;

/// Errors surfaced while encoding or decoding a wire frame.
///
/// Each variant corresponds to one of the taxonomy entries in the design's
/// error handling section. Callers decide the recovery action: a
/// `ChecksumMismatch` only drops the offending frame, while a
/// `ProtocolViolation` closes the connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame's declared `messageLength` exceeded the configured ceiling,
    /// or a structural field was invalid (e.g. a negative file size).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The CRC32 recomputed over the payload did not match the trailer.
    /// Non-fatal: the frame is dropped and the peer is expected to retransmit.
    #[error("checksum mismatch: expected {expected:08x}, computed {actual:08x}")]
    ChecksumMismatch {
        /// Checksum carried in the frame trailer.
        expected: u32,
        /// Checksum recomputed over the received payload.
        actual: u32,
    },

    /// The peer closed the connection, cleanly or mid-frame.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The payload bytes could not be parsed into a [`crate::CommunicationData`].
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Underlying I/O failure unrelated to framing semantics.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// True for errors that should close the connection outright, as opposed
    /// to errors from which the session can continue (e.g. a dropped,
    /// corrupt chunk).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FrameError::ProtocolViolation(_) | FrameError::PeerClosed | FrameError::Io(_)
        )
    }
}
