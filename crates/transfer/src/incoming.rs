use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use checksums::{to_hex, Md5};
use dashmap::{DashMap, DashSet};
use protocol::CommunicationData;
use tokio::io::AsyncWriteExt;

use crate::error::TransferError;
use crate::path::resolve_collision_free;

/// Write buffer used when assembling a completed transfer (§4.5: "recommended ≥ 16 MiB").
const ASSEMBLY_BUFFER_BYTES: usize = 16 * 1024 * 1024;

struct IncomingSession {
    total_chunks: u32,
    file_path: PathBuf,
    received: HashMap<u32, Vec<u8>>,
    assembled: bool,
}

/// Outcome of handing one file chunk to [`TransferManager::receive_chunk`].
pub enum ChunkOutcome {
    /// The chunk's hash matched; this ACK should be relayed to the sender.
    Accepted(CommunicationData),
    /// The chunk's declared hash did not match its content; dropped without
    /// acknowledgement so the sender times out and retransmits.
    HashMismatch,
}

/// Tracks in-flight incoming file transfers, keyed by `fileId`.
///
/// Each session accumulates chunks under its own lock, released before any
/// disk I/O runs, so one transfer's assembly never blocks another's chunk
/// inserts.
pub struct TransferManager {
    root_dir: PathBuf,
    sessions: DashMap<String, Mutex<IncomingSession>>,
    /// `fileId`s whose `FILE_COMPLETE` has already been verified and
    /// acknowledged, kept after the session itself is discarded so a
    /// retransmitted `FILE_COMPLETE` can be answered again idempotently.
    completed: DashSet<String>,
}

impl TransferManager {
    /// Creates a manager that receives files under `root_dir`.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        TransferManager {
            root_dir: root_dir.into(),
            sessions: DashMap::new(),
            completed: DashSet::new(),
        }
    }

    /// The per-client directory received files are written into.
    #[must_use]
    pub fn client_dir(&self, client_id: u32) -> PathBuf {
        self.root_dir.join(format!("Client{client_id}"))
    }

    /// Number of file-transfer sessions currently open.
    #[must_use]
    pub fn open_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Handles one `*_FILE` frame bound for `client_id`'s directory:
    /// validates the declared size, verifies the per-chunk hash, stores the
    /// chunk, and assembles the file once every chunk has arrived.
    pub async fn receive_chunk(
        &self,
        client_id: u32,
        data: &CommunicationData,
    ) -> Result<ChunkOutcome, TransferError> {
        if data.file_size < 0 {
            return Err(TransferError::NegativeFileSize(data.file_size));
        }

        let computed = to_hex(&Md5::digest(&data.chunk_data));
        if computed != data.chunk_md5 {
            tracing::debug!(
                file_id = %data.file_id,
                chunk_index = data.chunk_index,
                "chunk hash mismatch, dropping"
            );
            return Ok(ChunkOutcome::HashMismatch);
        }

        let ready_to_assemble = {
            let entry = self.sessions.entry(data.file_id.clone()).or_insert_with(|| {
                let desired = self.client_dir(client_id).join(&data.file_name);
                Mutex::new(IncomingSession {
                    total_chunks: data.total_chunks,
                    file_path: resolve_collision_free(&desired),
                    received: HashMap::new(),
                    assembled: false,
                })
            });
            let mut session = entry.lock().expect("transfer session mutex poisoned");
            session.received.insert(data.chunk_index, data.chunk_data.clone());
            !session.assembled && session.received.len() as u32 >= session.total_chunks
        };

        if ready_to_assemble {
            if let Err(err) = self.assemble(&data.file_id).await {
                self.sessions.remove(&data.file_id);
                return Err(err);
            }
        }

        Ok(ChunkOutcome::Accepted(CommunicationData::ack_for(data)))
    }

    async fn assemble(&self, file_id: &str) -> Result<(), TransferError> {
        let (file_path, chunks) = {
            let entry = self
                .sessions
                .get(file_id)
                .ok_or_else(|| TransferError::UnknownSession(file_id.to_string()))?;
            let mut session = entry.lock().expect("transfer session mutex poisoned");

            let mut ordered = Vec::with_capacity(session.total_chunks as usize);
            for index in 0..session.total_chunks {
                match session.received.get(&index) {
                    Some(chunk) => ordered.push(chunk.clone()),
                    None => {
                        return Err(TransferError::IncompleteFile {
                            file_id: file_id.to_string(),
                            received: session.received.len() as u32,
                            total_chunks: session.total_chunks,
                        });
                    }
                }
            }
            session.assembled = true;
            session.received.clear();
            (session.file_path.clone(), ordered)
        };

        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = tokio::fs::File::create(&file_path).await?;
        let mut writer = tokio::io::BufWriter::with_capacity(ASSEMBLY_BUFFER_BYTES, file);
        for chunk in &chunks {
            writer.write_all(chunk).await?;
        }
        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        tracing::info!(file_id, path = %file_path.display(), "assembled incoming file");
        Ok(())
    }

    /// Handles a `FILE_COMPLETE` frame: verifies the assembled file's MD5
    /// against `declared_md5`, deleting it on mismatch, and builds the
    /// `FILE_COMPLETE_ACK` to send back from `source_id` to `target_id` on
    /// success. A successful completion removes the session but remembers
    /// the `fileId` as completed, so a duplicate `FILE_COMPLETE` (the sender
    /// retransmitting after losing the first ACK) re-emits the same ack
    /// without touching the file again.
    pub async fn complete(
        &self,
        file_id: &str,
        source_id: u32,
        target_id: u32,
        declared_md5: &str,
    ) -> Result<CommunicationData, TransferError> {
        let Some((_, session)) = self.sessions.remove(file_id) else {
            if self.completed.contains(file_id) {
                tracing::debug!(file_id, "duplicate FILE_COMPLETE, re-sending ack");
                return Ok(CommunicationData::file_complete_ack(file_id, source_id, target_id));
            }
            return Err(TransferError::UnknownSession(file_id.to_string()));
        };
        let file_path = session.into_inner().expect("transfer session mutex poisoned").file_path;

        let bytes = tokio::fs::read(&file_path).await?;
        let actual = to_hex(&Md5::digest(&bytes));

        if actual != declared_md5 {
            tracing::warn!(file_id, path = %file_path.display(), "whole-file MD5 mismatch, deleting");
            let _ = tokio::fs::remove_file(&file_path).await;
            return Err(TransferError::WholeFileHashMismatch {
                file_id: file_id.to_string(),
            });
        }

        self.completed.insert(file_id.to_string());
        tracing::info!(file_id, "file transfer complete");
        Ok(CommunicationData::file_complete_ack(file_id, source_id, target_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checksums::to_hex;
    use protocol::{DataPriority, InfoType};
    use tempfile::tempdir;

    fn chunk(file_id: &str, file_name: &str, index: u32, total: u32, bytes: &[u8]) -> CommunicationData {
        CommunicationData {
            info_type: InfoType::CtsFile,
            priority: DataPriority::Low,
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            file_size: bytes.len() as i64 * total as i64,
            chunk_index: index,
            total_chunks: total,
            chunk_data: bytes.to_vec(),
            chunk_md5: to_hex(&Md5::digest(bytes)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn assembles_a_file_once_every_chunk_has_arrived() {
        let dir = tempdir().unwrap();
        let manager = TransferManager::new(dir.path());

        let part_a = b"hello ".to_vec();
        let part_b = b"world!".to_vec();
        manager
            .receive_chunk(1, &chunk("file-1", "greeting.txt", 0, 2, &part_a))
            .await
            .unwrap();
        manager
            .receive_chunk(1, &chunk("file-1", "greeting.txt", 1, 2, &part_b))
            .await
            .unwrap();

        let assembled_path = manager.client_dir(1).join("greeting.txt");
        let contents = tokio::fs::read(&assembled_path).await.unwrap();
        assert_eq!(contents, b"hello world!");
    }

    #[tokio::test]
    async fn mismatched_chunk_hash_is_dropped_without_an_ack() {
        let dir = tempdir().unwrap();
        let manager = TransferManager::new(dir.path());

        let mut bad_chunk = chunk("file-2", "data.bin", 0, 1, b"payload");
        bad_chunk.chunk_md5 = "0000000000000000000000000000000".to_string();

        let outcome = manager.receive_chunk(1, &bad_chunk).await.unwrap();
        assert!(matches!(outcome, ChunkOutcome::HashMismatch));
        assert_eq!(manager.open_session_count(), 0);
    }

    #[tokio::test]
    async fn repeated_chunk_at_the_same_index_does_not_change_the_assembled_file() {
        let dir = tempdir().unwrap();
        let manager = TransferManager::new(dir.path());

        let only_chunk = chunk("file-3", "solo.txt", 0, 1, b"content");
        manager.receive_chunk(1, &only_chunk).await.unwrap();
        manager.receive_chunk(1, &only_chunk).await.unwrap();

        let assembled_path = manager.client_dir(1).join("solo.txt");
        let contents = tokio::fs::read(&assembled_path).await.unwrap();
        assert_eq!(contents, b"content");
    }

    #[tokio::test]
    async fn complete_deletes_the_file_on_whole_file_hash_mismatch() {
        let dir = tempdir().unwrap();
        let manager = TransferManager::new(dir.path());

        manager
            .receive_chunk(1, &chunk("file-4", "doc.txt", 0, 1, b"finished"))
            .await
            .unwrap();

        let result = manager.complete("file-4", 0, 1, "not-the-real-hash").await;
        assert!(result.is_err());

        let assembled_path = manager.client_dir(1).join("doc.txt");
        assert!(!assembled_path.exists());
        assert_eq!(manager.open_session_count(), 0);
    }

    #[tokio::test]
    async fn complete_acknowledges_and_closes_the_session_on_matching_hash() {
        let dir = tempdir().unwrap();
        let manager = TransferManager::new(dir.path());

        let bytes = b"verified contents".to_vec();
        manager
            .receive_chunk(1, &chunk("file-5", "verified.txt", 0, 1, &bytes))
            .await
            .unwrap();

        let whole_file_md5 = to_hex(&Md5::digest(&bytes));
        let ack = manager.complete("file-5", 0, 1, &whole_file_md5).await.unwrap();
        assert_eq!(ack.info_type, InfoType::FileCompleteAck);
        assert_eq!(ack.file_id, "file-5");
        assert_eq!(manager.open_session_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_file_complete_reemits_the_ack_without_touching_the_file() {
        let dir = tempdir().unwrap();
        let manager = TransferManager::new(dir.path());

        let bytes = b"verified contents".to_vec();
        manager
            .receive_chunk(1, &chunk("file-7", "verified.txt", 0, 1, &bytes))
            .await
            .unwrap();

        let whole_file_md5 = to_hex(&Md5::digest(&bytes));
        let first_ack = manager.complete("file-7", 0, 1, &whole_file_md5).await.unwrap();

        let assembled_path = manager.client_dir(1).join("verified.txt");
        let contents_before = tokio::fs::read(&assembled_path).await.unwrap();

        let second_ack = manager.complete("file-7", 0, 1, &whole_file_md5).await.unwrap();
        assert_eq!(second_ack.info_type, InfoType::FileCompleteAck);
        assert_eq!(second_ack.file_id, first_ack.file_id);

        let contents_after = tokio::fs::read(&assembled_path).await.unwrap();
        assert_eq!(contents_before, contents_after);
        assert_eq!(manager.open_session_count(), 0);
    }

    #[tokio::test]
    async fn negative_file_size_is_rejected_as_a_protocol_violation() {
        let dir = tempdir().unwrap();
        let manager = TransferManager::new(dir.path());

        let mut negative = chunk("file-6", "bad.bin", 0, 1, b"x");
        negative.file_size = -1;

        let result = manager.receive_chunk(1, &negative).await;
        assert!(matches!(result, Err(TransferError::NegativeFileSize(-1))));
    }
}
