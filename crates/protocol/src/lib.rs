//! # Overview
//!
//! `protocol` defines the framed binary wire format shared by the session
//! server's clients: the [`CommunicationData`] payload schema, the
//! [`InfoType`] / [`DataPriority`] tags carried on every frame, and the
//! [`frame`] codec that turns a stream of bytes into those values and back.
//!
//! # Design
//!
//! - [`types`] holds the value types exchanged on the wire plus the
//!   constructors higher layers (heartbeat monitor, file transfer engine) use
//!   to build ACKs and file-transfer control messages.
//! - [`frame`] implements the length-prefixed framing: header, encoded
//!   payload, CRC32 trailer. Encoding is stateless per call, matching the
//!   teacher workspace's preference for small, composable codec functions
//!   over a shared mutable encoder object.
//! - [`error`] collects the taxonomy from the design's error handling
//!   section (`PROTOCOL_VIOLATION`, `CHECKSUM_MISMATCH`, `PEER_CLOSED`) into
//!   one [`thiserror`]-derived enum.
//!
//! # Errors
//!
//! All fallible operations return [`FrameError`], which implements
//! [`std::error::Error`] so callers can match on the taxonomy or simply
//! propagate with `?`.

pub mod error;
pub mod frame;
pub mod types;

pub use error::FrameError;
pub use frame::{decode_frame, encode_frame, FrameHeader, DEFAULT_MAX_FRAME_LEN, PROTOCOL_VERSION};
pub use types::{CommunicationData, DataPriority, InfoType};
