//! Direct-channel file beaming
//!
//! Everything that happens after the coordination service has done its job:
//! the chunk protocol spoken between two peers over an established ordered
//! channel, the flow-controlled sender, the reassembling receiver, and the
//! injected handshake capability that turns relayed signaling blobs into
//! open channels.

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod channel;
pub mod handshake;
pub mod protocol;
pub mod receiver;
pub mod sender;

pub use channel::{DirectChannel, MemoryChannel};
pub use protocol::ChannelMsg;
pub use receiver::TransferReceiver;
pub use sender::{broadcast_file, send_file};

/// Fixed slice size for outbound files (64 KiB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// In-flight byte threshold before the sender starts queueing (64 KiB)
pub const MAX_BUFFERED_AMOUNT: usize = 64 * 1024;

/// Chunk read+send operations in flight per transfer, overlapping file I/O
/// with network latency
pub const READ_AHEAD_CHUNKS: usize = 4;

/// Bounded fallback interval for re-checking a drain wait, in case the
/// channel's low-water event is missed or absent
pub const DRAIN_RECHECK_MS: u64 = 50;

/// Sender-generated transfer id, unique per send
pub fn generate_file_id() -> String {
    Uuid::new_v4().to_string()
}

/// Lifecycle of one transfer, identical on both sides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// Progress and terminal reports from senders and receivers
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Receiver observed a `file-start`
    Incoming {
        file_id: String,
        file_name: String,
        total_size: u64,
        total_chunks: u64,
    },
    /// Sender initiated a transfer
    Outgoing {
        file_id: String,
        file_name: String,
        total_size: u64,
        total_chunks: u64,
    },
    Progress {
        file_id: String,
        done_chunks: u64,
        total_chunks: u64,
        direction: Direction,
    },
    /// Sender pushed the final chunk and the `file-end`
    Sent { file_id: String },
    /// Receiver saw `file-end` with every chunk accounted for; `data` is the
    /// reassembled artifact
    Received {
        file_id: String,
        file_name: String,
        data: Bytes,
    },
    Failed {
        file_id: String,
        direction: Direction,
        message: String,
    },
    Cancelled {
        file_id: String,
        direction: Direction,
    },
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Tunables of the flow controller. Defaults match the protocol constants.
#[derive(Debug, Clone)]
pub struct FlowControlConfig {
    pub chunk_size: usize,
    pub max_buffered: usize,
    pub read_ahead: usize,
    pub drain_recheck: Duration,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_buffered: MAX_BUFFERED_AMOUNT,
            read_ahead: READ_AHEAD_CHUNKS,
            drain_recheck: Duration::from_millis(DRAIN_RECHECK_MS),
        }
    }
}
