use beam_channel::protocol::{ChannelMsg, encode_chunk_data};
use beam_channel::receiver::TransferReceiver;
use beam_channel::sender::{broadcast_file, send_file};
use beam_channel::{
    CHUNK_SIZE, Direction, DirectChannel, FlowControlConfig, MAX_BUFFERED_AMOUNT, MemoryChannel,
    TransferError, TransferEvent, TransferStatus,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn write_temp_file(len: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&patterned(len)).unwrap();
    file.flush().unwrap();
    file
}

/// 10 MB in 64 KiB chunks: 160 chunks, received count strictly increasing
/// by one, reconstructed artifact byte-exact.
#[tokio::test]
async fn test_ten_megabyte_transfer() {
    const SIZE: usize = 10 * 1024 * 1024;
    let file = write_temp_file(SIZE);

    let (sender_ch, mut receiver_ch) = MemoryChannel::pair(MAX_BUFFERED_AMOUNT);
    let inbox = receiver_ch.take_inbox().unwrap();

    let (recv_tx, mut recv_events) = mpsc::channel(512);
    let recv_task = tokio::spawn(async move {
        TransferReceiver::new(recv_tx).run(inbox).await;
    });

    let (send_tx, _send_events) = mpsc::channel(512);
    let cancel = CancellationToken::new();
    send_file(
        &sender_ch,
        file.path(),
        "file-10mb",
        &FlowControlConfig::default(),
        &send_tx,
        &cancel,
    )
    .await
    .unwrap();

    let expected_chunks = (SIZE as u64).div_ceil(CHUNK_SIZE as u64);
    assert_eq!(expected_chunks, 160);

    let mut seen_chunks = 0u64;
    let artifact = loop {
        match recv_events.recv().await.expect("receiver events ended early") {
            TransferEvent::Incoming {
                total_size,
                total_chunks,
                ..
            } => {
                assert_eq!(total_size, SIZE as u64);
                assert_eq!(total_chunks, expected_chunks);
            }
            TransferEvent::Progress {
                done_chunks,
                direction: Direction::Received,
                ..
            } => {
                seen_chunks += 1;
                assert_eq!(done_chunks, seen_chunks, "received count must step by one");
            }
            TransferEvent::Received { data, .. } => break data,
            other => panic!("unexpected event: {:?}", other),
        }
    };

    assert_eq!(seen_chunks, expected_chunks);
    assert_eq!(artifact.len(), SIZE);
    assert_eq!(&artifact[..], &patterned(SIZE)[..]);

    recv_task.abort();
}

/// Cancelling mid-flight: the receiver ends up cancelled, never completed,
/// and no file-end arrives for the id.
#[tokio::test]
async fn test_cancel_mid_transfer() {
    const SIZE: usize = 10 * 1024 * 1024;
    let file = write_temp_file(SIZE);

    // Paced delivery so the transfer is slow enough to cancel mid-flight
    let (sender_ch, mut receiver_ch) =
        MemoryChannel::pair_with(MAX_BUFFERED_AMOUNT, Some(Duration::from_millis(1)));
    let inbox = receiver_ch.take_inbox().unwrap();

    let (recv_tx, mut recv_events) = mpsc::channel(512);
    let recv_task = tokio::spawn(async move {
        TransferReceiver::new(recv_tx).run(inbox).await;
    });

    let (send_tx, mut send_events) = mpsc::channel(512);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        while let Some(event) = send_events.recv().await {
            if let TransferEvent::Progress { done_chunks: 50, .. } = event {
                trigger.cancel();
                break;
            }
        }
    });

    let result = send_file(
        &sender_ch,
        file.path(),
        "file-cancelled",
        &FlowControlConfig::default(),
        &send_tx,
        &cancel,
    )
    .await;
    assert!(matches!(result, Err(TransferError::Cancelled)));

    // The receiver observes the cancel, never a completion
    loop {
        match recv_events.recv().await.expect("receiver events ended early") {
            TransferEvent::Cancelled {
                direction: Direction::Received,
                ..
            } => break,
            TransferEvent::Received { .. } => panic!("cancelled transfer completed"),
            TransferEvent::Sent { .. } => panic!("unexpected sender event on receiver channel"),
            _ => {}
        }
    }

    watcher.abort();
    recv_task.abort();
}

/// The receiver throws away everything it buffered when the sender cancels,
/// and a file-end after that changes nothing.
#[tokio::test]
async fn test_receiver_discards_buffer_on_cancel() {
    let (tx, _events) = mpsc::channel(64);
    let mut receiver = TransferReceiver::new(tx);

    receiver
        .handle(ChannelMsg::FileStart {
            file_id: "f".into(),
            filename: "a.bin".into(),
            size: 24,
            total_chunks: 3,
        })
        .await;
    for i in 0..3 {
        receiver
            .handle(ChannelMsg::FileChunk {
                file_id: "f".into(),
                chunk_index: i,
                payload: encode_chunk_data(&[7u8; 8]),
            })
            .await;
    }
    assert_eq!(receiver.received_count("f"), Some(3));
    assert!(receiver.buffered_bytes("f") > 0);

    receiver
        .handle(ChannelMsg::FileCancel { file_id: "f".into() })
        .await;
    assert_eq!(receiver.status("f"), Some(TransferStatus::Cancelled));
    assert_eq!(receiver.buffered_bytes("f"), 0);

    receiver
        .handle(ChannelMsg::FileEnd { file_id: "f".into() })
        .await;
    assert_eq!(receiver.status("f"), Some(TransferStatus::Cancelled));
}

/// A cancel that arrives after file-end is a no-op.
#[tokio::test]
async fn test_cancel_after_end_is_noop() {
    let (tx, mut events) = mpsc::channel(64);
    let mut receiver = TransferReceiver::new(tx);

    receiver
        .handle(ChannelMsg::FileStart {
            file_id: "f".into(),
            filename: "tiny.bin".into(),
            size: 8,
            total_chunks: 1,
        })
        .await;
    receiver
        .handle(ChannelMsg::FileChunk {
            file_id: "f".into(),
            chunk_index: 0,
            payload: encode_chunk_data(&[1u8; 8]),
        })
        .await;
    receiver
        .handle(ChannelMsg::FileEnd { file_id: "f".into() })
        .await;
    assert_eq!(receiver.status("f"), Some(TransferStatus::Completed));

    receiver
        .handle(ChannelMsg::FileCancel { file_id: "f".into() })
        .await;
    assert_eq!(receiver.status("f"), Some(TransferStatus::Completed));

    // Once the application is done displaying it, the record can go
    receiver.gc_terminal();
    assert_eq!(receiver.status("f"), None);

    // Incoming, progress, received; no cancelled event
    let mut saw_received = false;
    while let Ok(event) = events.try_recv() {
        match event {
            TransferEvent::Received { data, .. } => {
                saw_received = true;
                assert_eq!(&data[..], &[1u8; 8]);
            }
            TransferEvent::Cancelled { .. } => panic!("cancel after end must be a no-op"),
            _ => {}
        }
    }
    assert!(saw_received);
}

/// The sender never piles more than one frame past the in-flight threshold
/// onto the channel.
#[tokio::test]
async fn test_backpressure_bounds_in_flight_bytes() {
    let config = FlowControlConfig {
        chunk_size: 8 * 1024,
        max_buffered: 16 * 1024,
        read_ahead: 4,
        drain_recheck: Duration::from_millis(10),
    };
    let file = write_temp_file(512 * 1024); // 64 chunks

    let (sender_ch, mut receiver_ch) =
        MemoryChannel::pair_with(config.max_buffered, Some(Duration::from_millis(2)));
    let _inbox = receiver_ch.take_inbox().unwrap();

    let sender_ch = Arc::new(sender_ch);
    let sampled = sender_ch.clone();
    let (send_tx, _send_events) = mpsc::channel(512);
    let cancel = CancellationToken::new();
    let path = file.path().to_path_buf();
    let task_config = config.clone();
    let send_task = tokio::spawn(async move {
        send_file(
            sender_ch.as_ref(),
            &path,
            "file-bp",
            &task_config,
            &send_tx,
            &cancel,
        )
        .await
    });

    // One encoded 8 KiB chunk is ~11 KiB of JSON; the buffer may exceed the
    // threshold by at most one such frame
    let bound = config.max_buffered + 12 * 1024;
    for _ in 0..50 {
        assert!(
            sampled.buffered_amount() <= bound,
            "in-flight bytes exceeded threshold: {}",
            sampled.buffered_amount()
        );
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    send_task.await.unwrap().unwrap();
}

/// Broadcast: a dead destination fails alone, the healthy one completes.
#[tokio::test]
async fn test_broadcast_failure_is_isolated() {
    let file = write_temp_file(CHUNK_SIZE); // exactly one chunk

    let (good_ch, mut good_peer) = MemoryChannel::pair(MAX_BUFFERED_AMOUNT);
    let (bad_ch, _bad_peer) = MemoryChannel::pair(MAX_BUFFERED_AMOUNT);
    bad_ch.close();

    let inbox = good_peer.take_inbox().unwrap();
    let (recv_tx, mut recv_events) = mpsc::channel(64);
    tokio::spawn(async move {
        TransferReceiver::new(recv_tx).run(inbox).await;
    });

    let (send_tx, _send_events) = mpsc::channel(512);
    let cancel = CancellationToken::new();
    let results = broadcast_file(
        vec![
            ("peer-good".to_string(), Arc::new(good_ch)),
            ("peer-bad".to_string(), Arc::new(bad_ch)),
        ],
        file.path(),
        "file-bcast",
        &FlowControlConfig::default(),
        &send_tx,
        &cancel,
    )
    .await;

    assert_eq!(results.len(), 2);
    for (peer, result) in &results {
        match peer.as_str() {
            "peer-good" => assert!(result.is_ok()),
            "peer-bad" => assert!(matches!(result, Err(TransferError::ChannelClosed))),
            other => panic!("unexpected peer {}", other),
        }
    }

    // The healthy destination still gets the whole file
    loop {
        match recv_events.recv().await.expect("receiver events ended early") {
            TransferEvent::Received { data, .. } => {
                assert_eq!(data.len(), CHUNK_SIZE);
                break;
            }
            TransferEvent::Failed { message, .. } => panic!("healthy transfer failed: {}", message),
            _ => {}
        }
    }
}

/// An unreadable source fails that transfer with an I/O error.
#[tokio::test]
async fn test_missing_source_file_fails() {
    let (sender_ch, _receiver_ch) = MemoryChannel::pair(MAX_BUFFERED_AMOUNT);
    let (send_tx, mut send_events) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    let result = send_file(
        &sender_ch,
        Path::new("/definitely/not/here.bin"),
        "file-io",
        &FlowControlConfig::default(),
        &send_tx,
        &cancel,
    )
    .await;
    assert!(matches!(result, Err(TransferError::Io(_))));

    match send_events.recv().await.unwrap() {
        TransferEvent::Failed {
            direction: Direction::Sent,
            ..
        } => {}
        other => panic!("expected failed event, got {:?}", other),
    }
}

/// Zero-byte file: no chunks, still completes with an empty artifact.
#[tokio::test]
async fn test_empty_file_transfer() {
    let file = write_temp_file(0);

    let (sender_ch, mut receiver_ch) = MemoryChannel::pair(MAX_BUFFERED_AMOUNT);
    let inbox = receiver_ch.take_inbox().unwrap();
    let (recv_tx, mut recv_events) = mpsc::channel(64);
    tokio::spawn(async move {
        TransferReceiver::new(recv_tx).run(inbox).await;
    });

    let (send_tx, _send_events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    send_file(
        &sender_ch,
        file.path(),
        "file-empty",
        &FlowControlConfig::default(),
        &send_tx,
        &cancel,
    )
    .await
    .unwrap();

    loop {
        match recv_events.recv().await.expect("receiver events ended early") {
            TransferEvent::Incoming { total_chunks, .. } => assert_eq!(total_chunks, 0),
            TransferEvent::Received { data, .. } => {
                assert!(data.is_empty());
                break;
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
