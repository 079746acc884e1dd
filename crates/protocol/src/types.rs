//! Wire value types: [`InfoType`], [`DataPriority`], and [`CommunicationData`].
//!
//! # Examples
//!
//! Round-tripping a heartbeat message through the canonical binary form:
//!
//! ```
//! use protocol::{CommunicationData, InfoType, DataPriority};
//!
//! let heartbeat = CommunicationData::heartbeat(7, 1);
//! let bytes = heartbeat.to_bytes();
//! let decoded = CommunicationData::from_bytes(&bytes).unwrap();
//! assert_eq!(decoded, heartbeat);
//! assert_eq!(decoded.info_type, InfoType::HeartBeat);
//! assert_eq!(decoded.priority, DataPriority::High);
//! ```

use crate::error::FrameError;

/// The kind of payload a [`CommunicationData`] value carries.
///
/// The numeric values `0..=8` are bit-exact with the wire protocol (§6) and
/// must never be renumbered. `Ack`, `FileComplete`, and `FileCompleteAck`
/// extend the tag set beyond the base nine values to give the two control
/// messages named in §4.5/§6 ("ACK", "FILE_COMPLETE", "FILE_COMPLETE_ACK")
/// their own stable discriminants rather than overloading `message` alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InfoType {
    /// Keepalive / liveness probe.
    HeartBeat = 0,
    /// Client-to-server application message.
    CtsNormal = 1,
    /// Client-to-server file chunk.
    CtsFile = 2,
    /// Server-to-client application message.
    StcNormal = 3,
    /// Server-to-client file chunk.
    StcFile = 4,
    /// Client-to-client application message (relayed).
    CtcNormal = 5,
    /// Client-to-client file chunk (relayed).
    CtcFile = 6,
    /// Client-to-client video stream fragment (relayed).
    CtcVideo = 7,
    /// Client-to-client voice stream fragment (relayed).
    CtcVoice = 8,
    /// Acknowledgement of a previously received frame.
    Ack = 9,
    /// Whole-file completion notice carrying the file's MD5.
    FileComplete = 10,
    /// Acknowledgement of a `FileComplete` notice.
    FileCompleteAck = 11,
}

impl InfoType {
    fn from_u8(value: u8) -> Result<Self, FrameError> {
        Ok(match value {
            0 => InfoType::HeartBeat,
            1 => InfoType::CtsNormal,
            2 => InfoType::CtsFile,
            3 => InfoType::StcNormal,
            4 => InfoType::StcFile,
            5 => InfoType::CtcNormal,
            6 => InfoType::CtcFile,
            7 => InfoType::CtcVideo,
            8 => InfoType::CtcVoice,
            9 => InfoType::Ack,
            10 => InfoType::FileComplete,
            11 => InfoType::FileCompleteAck,
            other => {
                return Err(FrameError::MalformedPayload(format!(
                    "unknown infoType discriminant {other}"
                )))
            }
        })
    }

    /// True for the file-carrying variants (`CtsFile`, `StcFile`, `CtcFile`).
    #[must_use]
    pub fn is_file_chunk(self) -> bool {
        matches!(self, InfoType::CtsFile | InfoType::StcFile | InfoType::CtcFile)
    }
}

/// Scheduling priority attached to every [`CommunicationData`] value.
///
/// Numeric values `0..=2` are bit-exact with the wire protocol (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DataPriority {
    /// Latency-sensitive control traffic (heartbeats, ACKs).
    High = 0,
    /// Default application traffic.
    Medium = 1,
    /// Bulk / background traffic.
    Low = 2,
}

impl DataPriority {
    fn from_u8(value: u8) -> Result<Self, FrameError> {
        Ok(match value {
            0 => DataPriority::High,
            1 => DataPriority::Medium,
            2 => DataPriority::Low,
            other => {
                return Err(FrameError::MalformedPayload(format!(
                    "unknown priority discriminant {other}"
                )))
            }
        })
    }

    /// The three tiers in priority order, for iterating over a worker pool.
    #[must_use]
    pub fn all() -> [DataPriority; 3] {
        [DataPriority::High, DataPriority::Medium, DataPriority::Low]
    }
}

/// The application-level payload carried inside every wire frame.
///
/// Field order here is the canonical on-wire order produced by
/// [`CommunicationData::to_bytes`] and consumed by
/// [`CommunicationData::from_bytes`]; it is not derived from a generic
/// serialization framework so the layout stays exactly as documented in §3
/// of the design.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommunicationData {
    /// Free-form text payload (chat message, control-message tag, etc.).
    pub message: String,
    /// Discriminates the kind of payload; see [`InfoType`].
    pub info_type: InfoType,
    /// Sender-assigned sequence number.
    pub seq_num: u32,
    /// Echoes the `seq_num` of the frame being acknowledged, for ACKs.
    pub ack_num: u32,
    /// Scheduling priority; see [`DataPriority`].
    pub priority: DataPriority,
    /// Registry id of the originating client (0 if not yet assigned).
    pub source_id: u32,
    /// Registry id of the destination client (0 for server-directed traffic).
    pub target_id: u32,
    /// Opaque identifier for a file transfer session.
    pub file_id: String,
    /// Original file name, as supplied by the sender.
    pub file_name: String,
    /// Declared total size of the file in bytes.
    pub file_size: i64,
    /// Zero-based index of this chunk within the transfer.
    pub chunk_index: u32,
    /// Total number of chunks in the transfer.
    pub total_chunks: u32,
    /// Raw chunk bytes (empty for non-file messages).
    pub chunk_data: Vec<u8>,
    /// Whole-file MD5, hex-encoded, present on `FileComplete` messages.
    pub md5_hash: String,
    /// Per-chunk MD5, hex-encoded, present on file-chunk messages.
    pub chunk_md5: String,
}

impl Default for CommunicationData {
    fn default() -> Self {
        CommunicationData {
            message: String::new(),
            info_type: InfoType::CtsNormal,
            seq_num: 0,
            ack_num: 0,
            priority: DataPriority::Medium,
            source_id: 0,
            target_id: 0,
            file_id: String::new(),
            file_name: String::new(),
            file_size: 0,
            chunk_index: 0,
            total_chunks: 0,
            chunk_data: Vec::new(),
            md5_hash: String::new(),
            chunk_md5: String::new(),
        }
    }
}

impl CommunicationData {
    /// Builds a heartbeat message from `source_id` with sequence number `seq_num`.
    #[must_use]
    pub fn heartbeat(source_id: u32, seq_num: u32) -> Self {
        CommunicationData {
            message: "HEART_BEAT".to_string(),
            info_type: InfoType::HeartBeat,
            seq_num,
            priority: DataPriority::High,
            source_id,
            ..Default::default()
        }
    }

    /// Builds the ACK for `original`, per the ACK conventions in §6: the
    /// `info_type` echoes the original, `ack_num` equals the original's
    /// `seq_num`, and heartbeat ACKs carry `message = "ACK"`.
    #[must_use]
    pub fn ack_for(original: &CommunicationData) -> Self {
        let message = if original.info_type == InfoType::HeartBeat {
            "ACK".to_string()
        } else {
            String::new()
        };
        CommunicationData {
            message,
            info_type: InfoType::Ack,
            ack_num: original.seq_num,
            priority: DataPriority::High,
            source_id: original.target_id,
            target_id: original.source_id,
            file_id: original.file_id.clone(),
            chunk_index: original.chunk_index,
            ..Default::default()
        }
    }

    /// Builds the `FILE_COMPLETE_ACK` for a finished transfer of `file_id`.
    #[must_use]
    pub fn file_complete_ack(file_id: &str, source_id: u32, target_id: u32) -> Self {
        CommunicationData {
            message: "FILE_COMPLETE_ACK".to_string(),
            info_type: InfoType::FileCompleteAck,
            priority: DataPriority::High,
            source_id,
            target_id,
            file_id: file_id.to_string(),
            ..Default::default()
        }
    }

    /// Serializes into the canonical binary form described in §3/§6: each
    /// string/byte field is length-prefixed with a big-endian `u32`, and
    /// fixed-width integers are written big-endian in field-declaration
    /// order.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.chunk_data.len());
        write_string(&mut buf, &self.message);
        buf.push(self.info_type as u8);
        buf.extend_from_slice(&self.seq_num.to_be_bytes());
        buf.extend_from_slice(&self.ack_num.to_be_bytes());
        buf.push(self.priority as u8);
        buf.extend_from_slice(&self.source_id.to_be_bytes());
        buf.extend_from_slice(&self.target_id.to_be_bytes());
        write_string(&mut buf, &self.file_id);
        write_string(&mut buf, &self.file_name);
        buf.extend_from_slice(&self.file_size.to_be_bytes());
        buf.extend_from_slice(&self.chunk_index.to_be_bytes());
        buf.extend_from_slice(&self.total_chunks.to_be_bytes());
        write_bytes(&mut buf, &self.chunk_data);
        write_string(&mut buf, &self.md5_hash);
        write_string(&mut buf, &self.chunk_md5);
        buf
    }

    /// Parses the canonical binary form produced by [`Self::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MalformedPayload`] if `bytes` is truncated or
    /// contains an out-of-range enum discriminant, or a length prefix that
    /// would run past the end of the buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut cursor = Cursor::new(bytes);
        let message = cursor.read_string()?;
        let info_type = InfoType::from_u8(cursor.read_u8()?)?;
        let seq_num = cursor.read_u32()?;
        let ack_num = cursor.read_u32()?;
        let priority = DataPriority::from_u8(cursor.read_u8()?)?;
        let source_id = cursor.read_u32()?;
        let target_id = cursor.read_u32()?;
        let file_id = cursor.read_string()?;
        let file_name = cursor.read_string()?;
        let file_size = cursor.read_i64()?;
        let chunk_index = cursor.read_u32()?;
        let total_chunks = cursor.read_u32()?;
        let chunk_data = cursor.read_bytes()?;
        let md5_hash = cursor.read_string()?;
        let chunk_md5 = cursor.read_string()?;

        Ok(CommunicationData {
            message,
            info_type,
            seq_num,
            ack_num,
            priority,
            source_id,
            target_id,
            file_id,
            file_name,
            file_size,
            chunk_index,
            total_chunks,
            chunk_data,
            md5_hash,
            chunk_md5,
        })
    }
}

fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
}

/// Minimal forward-only byte cursor used to decode [`CommunicationData`]
/// without pulling in a generic parser-combinator dependency.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                FrameError::MalformedPayload(format!(
                    "field of length {len} runs past end of payload at offset {}",
                    self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, FrameError> {
        let slice = self.take(4)?;
        Ok(u32::from_be_bytes(slice.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64, FrameError> {
        let slice = self.take(8)?;
        Ok(i64::from_be_bytes(slice.try_into().unwrap()))
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, FrameError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn read_string(&mut self) -> Result<String, FrameError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| FrameError::MalformedPayload(format!("invalid UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_every_field() {
        let data = CommunicationData {
            message: "hello".to_string(),
            info_type: InfoType::CtsFile,
            seq_num: 42,
            ack_num: 0,
            priority: DataPriority::Low,
            source_id: 3,
            target_id: 9,
            file_id: "file-123".to_string(),
            file_name: "report.pdf".to_string(),
            file_size: 1_048_576,
            chunk_index: 2,
            total_chunks: 3,
            chunk_data: vec![1, 2, 3, 4, 5],
            md5_hash: "deadbeef".to_string(),
            chunk_md5: "feedface".to_string(),
        };

        let bytes = data.to_bytes();
        let decoded = CommunicationData::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn from_bytes_rejects_truncated_payload() {
        let data = CommunicationData::heartbeat(1, 1);
        let mut bytes = data.to_bytes();
        bytes.truncate(bytes.len() - 1);
        assert!(CommunicationData::from_bytes(&bytes).is_err());
    }

    #[test]
    fn ack_for_heartbeat_echoes_seq_num_and_carries_ack_message() {
        let hb = CommunicationData::heartbeat(5, 17);
        let ack = CommunicationData::ack_for(&hb);
        assert_eq!(ack.ack_num, 17);
        assert_eq!(ack.message, "ACK");
        assert_eq!(ack.info_type, InfoType::Ack);
        assert_eq!(ack.priority, DataPriority::High);
    }

    #[test]
    fn priority_all_is_high_to_low() {
        assert_eq!(
            DataPriority::all(),
            [DataPriority::High, DataPriority::Medium, DataPriority::Low]
        );
    }
}
