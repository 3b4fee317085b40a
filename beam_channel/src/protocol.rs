//! Chunk protocol spoken over a direct channel
//!
//! JSON text frames, like the signaling plane. `chunkIndex` is redundant on
//! an ordered channel but carried anyway for auditability and for future
//! transports that may reorder.

use crate::TransferError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ChannelMsg {
    /// Transfer metadata, sent before the first chunk
    FileStart {
        file_id: String,
        filename: String,
        size: u64,
        total_chunks: u64,
    },
    /// One 64 KiB slice, base64-encoded
    FileChunk {
        file_id: String,
        chunk_index: u64,
        payload: String,
    },
    /// All chunks sent
    FileEnd { file_id: String },
    /// Sender gave up; the receiver discards everything buffered
    FileCancel { file_id: String },
}

impl ChannelMsg {
    pub fn encode(&self) -> Bytes {
        // The enum always serializes; a failure here would be a serde bug
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(frame: &[u8]) -> Result<Self, TransferError> {
        serde_json::from_slice(frame).map_err(|e| TransferError::Protocol(e.to_string()))
    }
}

pub fn encode_chunk_data(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn decode_chunk_data(data: &str) -> Result<Bytes, TransferError> {
    BASE64
        .decode(data)
        .map(Bytes::from)
        .map_err(|e| TransferError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_message_tags() {
        let msg = ChannelMsg::FileChunk {
            file_id: "f-1".into(),
            chunk_index: 42,
            payload: encode_chunk_data(b"hello"),
        };
        let json = String::from_utf8(msg.encode().to_vec()).unwrap();
        assert!(json.contains(r#""type":"file-chunk""#));
        assert!(json.contains(r#""fileId":"f-1""#));
        assert!(json.contains(r#""chunkIndex":42"#));
    }

    #[test]
    fn test_decode_round_trip() {
        let msg = ChannelMsg::FileStart {
            file_id: "f-2".into(),
            filename: "notes.txt".into(),
            size: 128,
            total_chunks: 1,
        };
        let decoded = ChannelMsg::decode(&msg.encode()).unwrap();
        match decoded {
            ChannelMsg::FileStart { filename, total_chunks, .. } => {
                assert_eq!(filename, "notes.txt");
                assert_eq!(total_chunks, 1);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(ChannelMsg::decode(b"not json").is_err());
        assert!(decode_chunk_data("!!!").is_err());
    }
}
