//! Transfer flow controller, sender side
//!
//! One invocation per outbound file per destination. The source is sliced
//! into fixed 64 KiB chunks; a reader task keeps a small read-ahead pipeline
//! full so file I/O overlaps with sends, while the dispatch loop issues
//! `send` calls in ascending chunk index only; the channel's own ordering
//! guarantee then makes receive-side reassembly trivial. Dispatch pauses
//! whenever the channel's unflushed byte count is above the configured
//! threshold and resumes on the low-water event.

use crate::channel::DirectChannel;
use crate::protocol::{self, ChannelMsg};
use crate::{Direction, FlowControlConfig, TransferError, TransferEvent};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Send one file over one channel. Cancelling the token stops chunk dispatch
/// immediately, pushes a `file-cancel` to the destination, and reports the
/// transfer as cancelled.
pub async fn send_file<C: DirectChannel>(
    channel: &C,
    path: &Path,
    file_id: &str,
    config: &FlowControlConfig,
    event_tx: &mpsc::Sender<TransferEvent>,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    match run_send(channel, path, file_id, config, event_tx, cancel).await {
        Ok(()) => {
            let _ = event_tx
                .send(TransferEvent::Sent {
                    file_id: file_id.to_string(),
                })
                .await;
            Ok(())
        }
        Err(TransferError::Cancelled) => {
            // Best effort: the destination may already be gone
            let _ = channel.send(
                ChannelMsg::FileCancel {
                    file_id: file_id.to_string(),
                }
                .encode(),
            );
            tracing::info!("Transfer {} cancelled", file_id);
            let _ = event_tx
                .send(TransferEvent::Cancelled {
                    file_id: file_id.to_string(),
                    direction: Direction::Sent,
                })
                .await;
            Err(TransferError::Cancelled)
        }
        Err(e) => {
            tracing::error!("Transfer {} failed: {}", file_id, e);
            let _ = event_tx
                .send(TransferEvent::Failed {
                    file_id: file_id.to_string(),
                    direction: Direction::Sent,
                    message: e.to_string(),
                })
                .await;
            Err(e)
        }
    }
}

async fn run_send<C: DirectChannel>(
    channel: &C,
    path: &Path,
    file_id: &str,
    config: &FlowControlConfig,
    event_tx: &mpsc::Sender<TransferEvent>,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let file = File::open(path).await?;
    let metadata = file.metadata().await?;
    let total_size = metadata.len();
    let total_chunks = total_size.div_ceil(config.chunk_size as u64);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    tracing::info!(
        "Sending {} ({} bytes, {} chunks) as {}",
        file_name,
        total_size,
        total_chunks,
        file_id
    );
    let _ = event_tx
        .send(TransferEvent::Outgoing {
            file_id: file_id.to_string(),
            file_name: file_name.clone(),
            total_size,
            total_chunks,
        })
        .await;

    channel.send(
        ChannelMsg::FileStart {
            file_id: file_id.to_string(),
            filename: file_name,
            size: total_size,
            total_chunks,
        }
        .encode(),
    )?;

    // Read-ahead pipeline: the channel capacity bounds chunks in flight
    // between file I/O and dispatch
    let (chunk_tx, mut chunk_rx) = mpsc::channel(config.read_ahead);
    let reader = tokio::spawn(read_chunks(
        file,
        config.chunk_size,
        chunk_tx,
        cancel.clone(),
    ));

    let mut sent_chunks = 0u64;
    let result = loop {
        let Some((chunk_index, read)) = chunk_rx.recv().await else {
            break Ok(());
        };
        // Liveness flag, checked before every dispatch
        if cancel.is_cancelled() {
            break Err(TransferError::Cancelled);
        }
        if let Err(e) = wait_for_drain(channel, config, cancel).await {
            break Err(e);
        }
        let data = match read {
            Ok(data) => data,
            Err(e) => break Err(e.into()),
        };
        let msg = ChannelMsg::FileChunk {
            file_id: file_id.to_string(),
            chunk_index,
            payload: protocol::encode_chunk_data(&data),
        };
        if let Err(e) = channel.send(msg.encode()) {
            break Err(e);
        }
        sent_chunks += 1;
        let _ = event_tx
            .send(TransferEvent::Progress {
                file_id: file_id.to_string(),
                done_chunks: sent_chunks,
                total_chunks,
                direction: Direction::Sent,
            })
            .await;
    };
    reader.abort();
    result?;

    channel.send(
        ChannelMsg::FileEnd {
            file_id: file_id.to_string(),
        }
        .encode(),
    )?;
    Ok(())
}

/// Block until the channel is below its in-flight threshold. Event driven,
/// with a bounded re-check interval as a fallback, and interruptible by the
/// same liveness flag as chunk dispatch.
async fn wait_for_drain<C: DirectChannel>(
    channel: &C,
    config: &FlowControlConfig,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    while channel.buffered_amount() >= config.max_buffered {
        tokio::select! {
            _ = channel.drain_notify().notified() => {}
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            _ = tokio::time::sleep(config.drain_recheck) => {}
        }
    }
    Ok(())
}

/// Slice the source sequentially and feed the bounded pipeline. Chunk
/// indices are assigned in strictly increasing order.
async fn read_chunks(
    mut file: File,
    chunk_size: usize,
    tx: mpsc::Sender<(u64, std::io::Result<Bytes>)>,
    cancel: CancellationToken,
) {
    let mut chunk_index = 0u64;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let mut buf = vec![0u8; chunk_size];
        let mut filled = 0;
        loop {
            match file.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    if filled == chunk_size {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send((chunk_index, Err(e))).await;
                    return;
                }
            }
        }
        if filled == 0 {
            break;
        }
        buf.truncate(filled);
        if tx.send((chunk_index, Ok(Bytes::from(buf)))).await.is_err() {
            break;
        }
        chunk_index += 1;
    }
}

/// Multi-recipient send: one independent flow controller per destination,
/// all sharing the same `file_id`. A failure toward one destination never
/// cancels the others; the shared token still cancels all of them at once.
pub async fn broadcast_file<C: DirectChannel>(
    channels: Vec<(String, Arc<C>)>,
    path: &Path,
    file_id: &str,
    config: &FlowControlConfig,
    event_tx: &mpsc::Sender<TransferEvent>,
    cancel: &CancellationToken,
) -> Vec<(String, Result<(), TransferError>)> {
    let mut handles = Vec::new();
    for (peer_id, channel) in channels {
        let path = path.to_path_buf();
        let file_id = file_id.to_string();
        let config = config.clone();
        let event_tx = event_tx.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let result = send_file(
                channel.as_ref(),
                &path,
                &file_id,
                &config,
                &event_tx,
                &cancel,
            )
            .await;
            (peer_id, result)
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(outcome) => results.push(outcome),
            Err(e) => tracing::error!("Broadcast task join error: {}", e),
        }
    }
    results
}
