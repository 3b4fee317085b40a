//! Direct-channel abstraction
//!
//! The handshake that produces a channel is external; this module only
//! defines what the flow controller needs from one: ordered enqueue, a view
//! of the unflushed byte count, and a low-water-mark drain event.
//! `MemoryChannel` is the in-process implementation used by tests and the
//! loopback handshake.

use crate::TransferError;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

/// Ordered, reliable, message-oriented duplex channel between two peers.
///
/// `send` must preserve call order on the wire; that guarantee is what lets
/// the receiver reassemble without consulting `chunkIndex`.
pub trait DirectChannel: Send + Sync + 'static {
    /// Queue one message frame for delivery. Never blocks; backpressure is
    /// observed through `buffered_amount`.
    fn send(&self, frame: Bytes) -> Result<(), TransferError>;

    /// Bytes accepted but not yet flushed to the wire.
    fn buffered_amount(&self) -> usize;

    /// Notified when the buffered amount falls below the channel's low-water
    /// mark. Waiters must still re-check `buffered_amount`.
    fn drain_notify(&self) -> &Notify;
}

struct EndpointShared {
    queue: Mutex<VecDeque<Bytes>>,
    buffered: AtomicUsize,
    notify_drain: Notify,
    notify_pump: Notify,
    closed: AtomicBool,
    low_water: usize,
}

/// In-memory channel endpoint. A background pump moves queued frames to the
/// peer's inbox one at a time, optionally paced to exercise backpressure.
pub struct MemoryChannel {
    out: Arc<EndpointShared>,
    inbox: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl MemoryChannel {
    /// Linked endpoint pair with the given low-water mark and no pacing.
    pub fn pair(low_water: usize) -> (MemoryChannel, MemoryChannel) {
        Self::pair_with(low_water, None)
    }

    /// Linked endpoint pair; `pace` inserts a delay per delivered frame so
    /// the outbound buffer actually fills up under load.
    pub fn pair_with(low_water: usize, pace: Option<Duration>) -> (MemoryChannel, MemoryChannel) {
        let (a_inbox_tx, a_inbox_rx) = mpsc::unbounded_channel();
        let (b_inbox_tx, b_inbox_rx) = mpsc::unbounded_channel();

        let a_out = Arc::new(EndpointShared::new(low_water));
        let b_out = Arc::new(EndpointShared::new(low_water));

        tokio::spawn(run_pump(a_out.clone(), b_inbox_tx, pace));
        tokio::spawn(run_pump(b_out.clone(), a_inbox_tx, pace));

        (
            MemoryChannel {
                out: a_out,
                inbox: Some(a_inbox_rx),
            },
            MemoryChannel {
                out: b_out,
                inbox: Some(b_inbox_rx),
            },
        )
    }

    /// Take the stream of frames arriving from the peer. Yields `None` once
    /// the peer closes.
    pub fn take_inbox(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.inbox.take()
    }

    /// Stop accepting sends; queued frames still drain to the peer.
    pub fn close(&self) {
        self.out.closed.store(true, Ordering::SeqCst);
        self.out.notify_pump.notify_waiters();
        self.out.notify_drain.notify_waiters();
    }
}

impl EndpointShared {
    fn new(low_water: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            buffered: AtomicUsize::new(0),
            notify_drain: Notify::new(),
            notify_pump: Notify::new(),
            closed: AtomicBool::new(false),
            low_water,
        }
    }
}

impl DirectChannel for MemoryChannel {
    fn send(&self, frame: Bytes) -> Result<(), TransferError> {
        if self.out.closed.load(Ordering::SeqCst) {
            return Err(TransferError::ChannelClosed);
        }
        self.out.buffered.fetch_add(frame.len(), Ordering::SeqCst);
        self.out
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(frame);
        self.out.notify_pump.notify_one();
        Ok(())
    }

    fn buffered_amount(&self) -> usize {
        self.out.buffered.load(Ordering::SeqCst)
    }

    fn drain_notify(&self) -> &Notify {
        &self.out.notify_drain
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_pump(
    out: Arc<EndpointShared>,
    peer_inbox: mpsc::UnboundedSender<Bytes>,
    pace: Option<Duration>,
) {
    loop {
        let frame = loop {
            let popped = out
                .queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .pop_front();
            match popped {
                Some(frame) => break Some(frame),
                None if out.closed.load(Ordering::SeqCst) => break None,
                None => out.notify_pump.notified().await,
            }
        };
        let Some(frame) = frame else { break };

        if let Some(delay) = pace {
            tokio::time::sleep(delay).await;
        }

        let len = frame.len();
        if peer_inbox.send(frame).is_err() {
            break;
        }
        let before = out.buffered.fetch_sub(len, Ordering::SeqCst);
        if before.saturating_sub(len) < out.low_water {
            out.notify_drain.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_arrive_in_send_order() {
        let (a, mut b) = MemoryChannel::pair(1024);
        let mut inbox = b.take_inbox().unwrap();

        for i in 0u8..10 {
            a.send(Bytes::from(vec![i])).unwrap();
        }
        for i in 0u8..10 {
            let frame = inbox.recv().await.unwrap();
            assert_eq!(frame[0], i);
        }
    }

    #[tokio::test]
    async fn test_buffered_amount_drains() {
        let (a, mut b) = MemoryChannel::pair_with(8, Some(Duration::from_millis(5)));
        let _inbox = b.take_inbox().unwrap();

        a.send(Bytes::from(vec![0u8; 64])).unwrap();
        assert!(a.buffered_amount() > 0);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while a.buffered_amount() > 0 {
            assert!(tokio::time::Instant::now() < deadline, "channel never drained");
            tokio::select! {
                _ = a.drain_notify().notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (a, _b) = MemoryChannel::pair(1024);
        a.close();
        assert!(matches!(
            a.send(Bytes::from_static(b"x")),
            Err(TransferError::ChannelClosed)
        ));
    }
}
