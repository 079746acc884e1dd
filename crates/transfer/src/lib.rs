//! # Overview
//!
//! `transfer` reassembles chunked file transfers carried inside
//! `CommunicationData` frames (the `CTS_FILE` / `STC_FILE` / `CTC_FILE`
//! family) on the receiving side, and splits a source file into outbound
//! chunk frames on the sending side (§4.5).
//!
//! # Design
//!
//! Receiving state lives in [`TransferManager`], a concurrent map keyed by
//! `fileId`. Each session's chunk map is guarded by its own lock, released
//! before any disk I/O runs, so one transfer's assembly write never blocks
//! another transfer's chunk inserts. Sending is a pure function,
//! [`split_file`], with no shared state at all.
//!
//! # Invariants
//!
//! - A chunk is stored only after its declared `chunkMd5` matches the
//!   content actually received; a mismatch is dropped silently so the
//!   sender's own retry logic handles retransmission.
//! - A session's received-chunk count never exceeds its declared
//!   `totalChunks`; assembly runs exactly once, the moment the count first
//!   reaches that total.
//! - An assembled file is deleted, not kept, if its whole-file MD5 disagrees
//!   with the sender's `FILE_COMPLETE` claim.

mod error;
mod incoming;
mod outgoing;
mod path;

pub use error::TransferError;
pub use incoming::{ChunkOutcome, TransferManager};
pub use outgoing::{split_file, CHUNK_SIZE_BYTES};
