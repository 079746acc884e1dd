/// Errors raised while reassembling or verifying a file transfer (§4.5, §7).
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// A `CTS_FILE`/`STC_FILE`/`CTC_FILE` frame declared a negative size.
    #[error("protocol violation: negative file size {0}")]
    NegativeFileSize(i64),
    /// `FILE_COMPLETE` arrived but the session's chunk map is short of
    /// `totalChunks`; the partial artifact is discarded.
    #[error("incomplete file transfer {file_id}: received {received} of {total_chunks} chunks")]
    IncompleteFile {
        /// The transfer session's identifier.
        file_id: String,
        /// Chunks actually present at assembly time.
        received: u32,
        /// Chunks declared by the sender.
        total_chunks: u32,
    },
    /// The assembled file's whole-file MD5 did not match the sender's claim.
    #[error("whole-file MD5 mismatch for transfer {file_id}")]
    WholeFileHashMismatch {
        /// The transfer session's identifier.
        file_id: String,
    },
    /// `FILE_COMPLETE` referenced a `fileId` with no open session.
    #[error("unknown file transfer session {0}")]
    UnknownSession(String),
    /// Filesystem I/O failed while assembling or reading back a file.
    #[error("I/O error during file transfer: {0}")]
    Io(#[from] std::io::Error),
}
