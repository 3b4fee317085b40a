//! Transfer flow controller, receiver side
//!
//! Consumes decoded frames in channel order. Chunks are buffered in arrival
//! order (which on an ordered channel is chunk-index order) and only
//! concatenated into the final artifact once `file-end` arrives with every
//! chunk accounted for.

use crate::protocol::{self, ChannelMsg};
use crate::{Direction, TransferEvent, TransferStatus};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// State of one inbound transfer
pub struct IncomingTransfer {
    pub file_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub total_chunks: u64,
    pub status: TransferStatus,
    pub received_count: u64,
    chunks: Vec<Bytes>,
}

/// Tracks every inbound transfer on one channel.
pub struct TransferReceiver {
    transfers: HashMap<String, IncomingTransfer>,
    event_tx: mpsc::Sender<TransferEvent>,
}

impl TransferReceiver {
    pub fn new(event_tx: mpsc::Sender<TransferEvent>) -> Self {
        Self {
            transfers: HashMap::new(),
            event_tx,
        }
    }

    /// Drive the receiver from a stream of raw frames until the channel
    /// closes. Any transfer still in flight at that point is failed.
    pub async fn run(&mut self, mut inbox: mpsc::UnboundedReceiver<Bytes>) {
        while let Some(frame) = inbox.recv().await {
            match ChannelMsg::decode(&frame) {
                Ok(msg) => self.handle(msg).await,
                Err(e) => tracing::warn!("Undecodable channel frame: {}", e),
            }
        }
        for transfer in self.transfers.values_mut() {
            if !transfer.status.is_terminal() {
                transfer.status = TransferStatus::Failed;
                transfer.chunks = Vec::new();
                let _ = self
                    .event_tx
                    .send(TransferEvent::Failed {
                        file_id: transfer.file_id.clone(),
                        direction: Direction::Received,
                        message: "Channel closed mid-transfer".to_string(),
                    })
                    .await;
            }
        }
    }

    pub async fn handle(&mut self, msg: ChannelMsg) {
        match msg {
            ChannelMsg::FileStart {
                file_id,
                filename,
                size,
                total_chunks,
            } => {
                if self.transfers.contains_key(&file_id) {
                    tracing::warn!("Duplicate file-start for {} ignored", file_id);
                    return;
                }
                tracing::info!(
                    "Receiving {} ({} bytes, {} chunks) as {}",
                    filename,
                    size,
                    total_chunks,
                    file_id
                );
                self.transfers.insert(
                    file_id.clone(),
                    IncomingTransfer {
                        file_id: file_id.clone(),
                        file_name: filename.clone(),
                        total_size: size,
                        total_chunks,
                        status: TransferStatus::Pending,
                        received_count: 0,
                        chunks: Vec::with_capacity(total_chunks as usize),
                    },
                );
                let _ = self
                    .event_tx
                    .send(TransferEvent::Incoming {
                        file_id,
                        file_name: filename,
                        total_size: size,
                        total_chunks,
                    })
                    .await;
            }

            ChannelMsg::FileChunk {
                file_id, payload, ..
            } => {
                let Some(transfer) = self.transfers.get_mut(&file_id) else {
                    tracing::debug!("Chunk for unknown transfer {} dropped", file_id);
                    return;
                };
                if transfer.status.is_terminal() {
                    return;
                }
                let decoded = match protocol::decode_chunk_data(&payload) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        transfer.status = TransferStatus::Failed;
                        transfer.chunks = Vec::new();
                        let _ = self
                            .event_tx
                            .send(TransferEvent::Failed {
                                file_id,
                                direction: Direction::Received,
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                };
                transfer.chunks.push(decoded);
                transfer.received_count += 1;
                transfer.status = TransferStatus::Transferring;
                let _ = self
                    .event_tx
                    .send(TransferEvent::Progress {
                        file_id,
                        done_chunks: transfer.received_count,
                        total_chunks: transfer.total_chunks,
                        direction: Direction::Received,
                    })
                    .await;
            }

            ChannelMsg::FileEnd { file_id } => {
                let Some(transfer) = self.transfers.get_mut(&file_id) else {
                    tracing::warn!("file-end for unknown transfer {} ignored", file_id);
                    return;
                };
                if transfer.status.is_terminal() {
                    return;
                }
                if transfer.received_count != transfer.total_chunks {
                    transfer.status = TransferStatus::Failed;
                    transfer.chunks = Vec::new();
                    let _ = self
                        .event_tx
                        .send(TransferEvent::Failed {
                            file_id,
                            direction: Direction::Received,
                            message: format!(
                                "file-end after {} of {} chunks",
                                transfer.received_count, transfer.total_chunks
                            ),
                        })
                        .await;
                    return;
                }
                transfer.status = TransferStatus::Completed;
                let mut artifact = BytesMut::with_capacity(transfer.total_size as usize);
                for chunk in transfer.chunks.drain(..) {
                    artifact.extend_from_slice(&chunk);
                }
                tracing::info!(
                    "Transfer {} complete: {} ({} bytes)",
                    file_id,
                    transfer.file_name,
                    artifact.len()
                );
                let _ = self
                    .event_tx
                    .send(TransferEvent::Received {
                        file_id,
                        file_name: transfer.file_name.clone(),
                        data: artifact.freeze(),
                    })
                    .await;
            }

            ChannelMsg::FileCancel { file_id } => {
                let Some(transfer) = self.transfers.get_mut(&file_id) else {
                    return;
                };
                // A cancel arriving after file-end is a no-op
                if transfer.status.is_terminal() {
                    return;
                }
                transfer.status = TransferStatus::Cancelled;
                transfer.chunks = Vec::new();
                tracing::info!("Transfer {} cancelled by sender", file_id);
                let _ = self
                    .event_tx
                    .send(TransferEvent::Cancelled {
                        file_id,
                        direction: Direction::Received,
                    })
                    .await;
            }
        }
    }

    pub fn status(&self, file_id: &str) -> Option<TransferStatus> {
        self.transfers.get(file_id).map(|t| t.status)
    }

    pub fn received_count(&self, file_id: &str) -> Option<u64> {
        self.transfers.get(file_id).map(|t| t.received_count)
    }

    /// Number of chunk payload bytes currently buffered for `file_id`.
    pub fn buffered_bytes(&self, file_id: &str) -> usize {
        self.transfers
            .get(file_id)
            .map(|t| t.chunks.iter().map(|c| c.len()).sum())
            .unwrap_or(0)
    }

    /// Drop records of finished transfers that the application no longer
    /// displays.
    pub fn gc_terminal(&mut self) {
        self.transfers.retain(|_, t| !t.status.is_terminal());
    }
}
