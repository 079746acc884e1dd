use std::path::Path;

use checksums::{to_hex, Md5};
use protocol::{CommunicationData, DataPriority, InfoType};
use uuid::Uuid;

use crate::error::TransferError;

/// Chunk size used when splitting a file for the outgoing path (§4.5: "1 MiB chunks").
pub const CHUNK_SIZE_BYTES: usize = 1024 * 1024;

/// Splits the file at `path` into `CHUNK_SIZE_BYTES` chunks (the last one
/// short), assigning a fresh `fileId`, and returns the chunk frames followed
/// by a trailing `FILE_COMPLETE` frame carrying the whole-file MD5.
///
/// `info_type` distinguishes client-to-server, server-to-client, and
/// relayed client-to-client transfers; it is stamped onto every chunk frame
/// but not onto the trailing `FILE_COMPLETE` frame, which has its own
/// dedicated tag.
pub async fn split_file(
    path: &Path,
    info_type: InfoType,
    source_id: u32,
    target_id: u32,
    priority: DataPriority,
) -> Result<Vec<CommunicationData>, TransferError> {
    let bytes = tokio::fs::read(path).await?;
    let file_id = Uuid::new_v4().to_string();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_size = bytes.len() as i64;

    let chunk_count = bytes.chunks(CHUNK_SIZE_BYTES).count().max(1) as u32;
    let mut frames = Vec::with_capacity(chunk_count as usize + 1);

    if bytes.is_empty() {
        frames.push(CommunicationData {
            info_type,
            priority,
            source_id,
            target_id,
            file_id: file_id.clone(),
            file_name: file_name.clone(),
            file_size,
            chunk_index: 0,
            total_chunks: chunk_count,
            chunk_md5: to_hex(&Md5::digest(&[])),
            ..Default::default()
        });
    } else {
        for (index, chunk) in bytes.chunks(CHUNK_SIZE_BYTES).enumerate() {
            frames.push(CommunicationData {
                info_type,
                priority,
                source_id,
                target_id,
                file_id: file_id.clone(),
                file_name: file_name.clone(),
                file_size,
                chunk_index: index as u32,
                total_chunks: chunk_count,
                chunk_data: chunk.to_vec(),
                chunk_md5: to_hex(&Md5::digest(chunk)),
                ..Default::default()
            });
        }
    }

    frames.push(CommunicationData {
        info_type: InfoType::FileComplete,
        priority,
        source_id,
        target_id,
        file_id,
        file_name,
        file_size,
        total_chunks: chunk_count,
        md5_hash: to_hex(&Md5::digest(&bytes)),
        ..Default::default()
    });

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn splits_a_multi_chunk_file_and_appends_a_file_complete_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let bytes = vec![7u8; CHUNK_SIZE_BYTES + 10];
        tokio::fs::write(&path, &bytes).await.unwrap();

        let frames = split_file(&path, InfoType::CtsFile, 1, 0, DataPriority::High)
            .await
            .unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].chunk_index, 0);
        assert_eq!(frames[0].chunk_data.len(), CHUNK_SIZE_BYTES);
        assert_eq!(frames[1].chunk_index, 1);
        assert_eq!(frames[1].chunk_data.len(), 10);
        assert_eq!(frames[1].total_chunks, 2);

        let complete = frames.last().unwrap();
        assert_eq!(complete.info_type, InfoType::FileComplete);
        assert_eq!(complete.md5_hash, to_hex(&Md5::digest(&bytes)));

        let first_file_id = frames[0].file_id.clone();
        assert!(frames.iter().all(|frame| frame.file_id == first_file_id));
    }

    #[tokio::test]
    async fn splits_an_empty_file_into_one_empty_chunk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        tokio::fs::write(&path, b"").await.unwrap();

        let frames = split_file(&path, InfoType::StcFile, 0, 2, DataPriority::Medium)
            .await
            .unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].total_chunks, 1);
        assert!(frames[0].chunk_data.is_empty());
    }
}
