//! Length-prefixed framing: header, encoded [`CommunicationData`] payload,
//! CRC32 trailer (§4.1, §6).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;
use crate::types::CommunicationData;

/// Protocol version written into every frame header.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default ceiling on `messageLength`, above which a frame is rejected with
/// [`FrameError::ProtocolViolation`]. 64 MiB comfortably exceeds the largest
/// legitimate payload (a 1 MiB file chunk plus headers) while still bounding
/// how much a malicious or corrupt peer can make the decoder buffer.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// The fixed-size portion of a frame, preceding the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version (§6); currently always [`PROTOCOL_VERSION`].
    pub version: u32,
    /// Reserved, currently-unused bytes carried for forward compatibility.
    pub reserved: Vec<u8>,
    /// Length in bytes of the payload that follows the header.
    pub message_length: u32,
}

/// Encodes `data` as a complete frame (header || payload || checksum) and
/// writes it to `writer`.
///
/// # Errors
///
/// Returns [`FrameError::Io`] if the underlying writer fails.
pub async fn encode_frame<W>(writer: &mut W, data: &CommunicationData) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let payload = data.to_bytes();
    let checksum = checksums::frame_checksum(&payload);

    let mut out = Vec::with_capacity(4 + 4 + 4 + payload.len() + 4);
    out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes()); // reserved length: none
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&checksum.to_be_bytes());

    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one complete frame from `reader` and returns the decoded payload.
///
/// Rejects any frame whose declared `messageLength` exceeds `max_frame_len`
/// with [`FrameError::ProtocolViolation`] before attempting to read the
/// payload, bounding how much memory a hostile peer can force the decoder to
/// allocate. An end-of-stream encountered while reading any part of the
/// frame is reported as [`FrameError::PeerClosed`]; any read error during a
/// partial frame blocks cooperatively until more bytes arrive (the `tokio`
/// read future simply stays pending) rather than erroring early.
///
/// # Errors
///
/// - [`FrameError::PeerClosed`] if the stream ends before a full frame is read.
/// - [`FrameError::ProtocolViolation`] if `messageLength` exceeds `max_frame_len`.
/// - [`FrameError::ChecksumMismatch`] if the trailer does not match the payload.
/// - [`FrameError::MalformedPayload`] if the payload cannot be parsed.
/// - [`FrameError::Io`] for any other I/O failure.
pub async fn decode_frame<R>(
    reader: &mut R,
    max_frame_len: u32,
) -> Result<CommunicationData, FrameError>
where
    R: AsyncRead + Unpin,
{
    let version = read_u32(reader).await?;
    let reserved_len = read_u32(reader).await? as usize;
    let reserved = read_exact_vec(reader, reserved_len).await?;
    let message_length = read_u32(reader).await?;

    if message_length > max_frame_len {
        return Err(FrameError::ProtocolViolation(format!(
            "messageLength {message_length} exceeds ceiling {max_frame_len}"
        )));
    }

    let header = FrameHeader {
        version,
        reserved,
        message_length,
    };
    tracing::trace!(version = header.version, len = header.message_length, "frame header");

    let payload = read_exact_vec(reader, message_length as usize).await?;
    let trailer = read_u32(reader).await?;

    let actual = checksums::frame_checksum(&payload);
    if actual != trailer {
        return Err(FrameError::ChecksumMismatch {
            expected: trailer,
            actual,
        });
    }

    CommunicationData::from_bytes(&payload)
}

async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, FrameError> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf).await?;
    Ok(u32::from_be_bytes(buf))
}

async fn read_exact_vec<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut buf = vec![0u8; len];
    read_exact(reader, &mut buf).await?;
    Ok(buf)
}

async fn read_exact<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FrameError::PeerClosed),
        Err(e) => Err(FrameError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommunicationData, DataPriority};

    #[tokio::test]
    async fn encode_then_decode_round_trips() {
        let original = CommunicationData::heartbeat(9, 4);
        let mut buf = Vec::new();
        encode_frame(&mut buf, &original).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = decode_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn decode_rejects_oversized_message_length() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&(DEFAULT_MAX_FRAME_LEN + 1).to_be_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        let err = decode_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, FrameError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn decode_detects_corrupted_payload() {
        let original = CommunicationData {
            priority: DataPriority::Medium,
            ..CommunicationData::heartbeat(1, 1)
        };
        let mut buf = Vec::new();
        encode_frame(&mut buf, &original).await.unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF; // corrupt one checksum byte

        let mut cursor = std::io::Cursor::new(buf);
        let err = decode_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, FrameError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn decode_reports_peer_closed_on_truncated_stream() {
        let original = CommunicationData::heartbeat(1, 1);
        let mut buf = Vec::new();
        encode_frame(&mut buf, &original).await.unwrap();
        buf.truncate(6);

        let mut cursor = std::io::Cursor::new(buf);
        let err = decode_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, FrameError::PeerClosed));
    }
}
