use conductor_core::protocol::ControlMessage;
use conductor_core::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Bounded per-session outbound frame queue.
///
/// Critical frames (`ControlMessage::is_critical`) block the caller until
/// space frees up, up to `send_timeout`, and are never dropped. Any
/// other frame drops the oldest queued frame instead of blocking — the
/// same policy `conductor-transport` applies on the agent's outbound
/// `LogChunk`/`Heartbeat` side using this same type.
pub struct OutboundQueue {
    inner: Mutex<VecDeque<ControlMessage>>,
    capacity: usize,
    send_timeout: Duration,
    space_available: Notify,
    item_available: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl OutboundQueue {
    pub fn new(capacity: usize, send_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            send_timeout,
            space_available: Notify::new(),
            item_available: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn enqueue(&self, message: ControlMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::AgentDisconnected("session closed".into()));
        }
        if message.is_critical() {
            self.enqueue_critical(message).await
        } else {
            self.enqueue_droppable(message);
            Ok(())
        }
    }

    async fn enqueue_critical(&self, message: ControlMessage) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.send_timeout;
        let mut message = Some(message);
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.len() < self.capacity {
                    inner.push_back(message.take().unwrap());
                    self.item_available.notify_one();
                    return Ok(());
                }
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::SendTimeout(format!("{:?}", message.unwrap())));
            }
            let _ = tokio::time::timeout(remaining, self.space_available.notified()).await;
        }
    }

    fn enqueue_droppable(&self, message: ControlMessage) {
        let mut inner = self.inner.lock().unwrap();
        if inner.len() >= self.capacity {
            inner.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        inner.push_back(message);
        self.item_available.notify_one();
    }

    /// Pops the next frame, waiting if the queue is empty. Returns `None`
    /// once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<ControlMessage> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(msg) = inner.pop_front() {
                    self.space_available.notify_one();
                    return Some(msg);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.item_available.notified().await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.space_available.notify_waiters();
        self.item_available.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close_msg(reason: &str) -> ControlMessage {
        ControlMessage::Close { reason: reason.into() }
    }

    fn drain_msg() -> ControlMessage {
        ControlMessage::Drain
    }

    #[tokio::test]
    async fn droppable_frames_drop_oldest_when_full() {
        let queue = OutboundQueue::new(2, Duration::from_millis(100));
        queue.enqueue(drain_msg()).await.unwrap();
        queue.enqueue(drain_msg()).await.unwrap();
        queue.enqueue(drain_msg()).await.unwrap();
        assert_eq!(queue.dropped_count(), 1);
    }

    #[tokio::test]
    async fn critical_frame_times_out_when_queue_stays_full() {
        let queue = OutboundQueue::new(1, Duration::from_millis(20));
        queue.enqueue(close_msg("a")).await.unwrap();
        let err = queue.enqueue(close_msg("b")).await.unwrap_err();
        assert!(matches!(err, Error::SendTimeout(_)));
    }

    #[tokio::test]
    async fn critical_frame_unblocks_once_space_frees() {
        let queue = std::sync::Arc::new(OutboundQueue::new(1, Duration::from_millis(500)));
        queue.enqueue(close_msg("a")).await.unwrap();
        let q2 = queue.clone();
        let handle = tokio::spawn(async move { q2.enqueue(close_msg("b")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.dequeue().await, Some(close_msg("a")));
        handle.await.unwrap().unwrap();
    }
}
