//! Freshest-wins hand-off between the stream receiver and the broadcaster.
//!
//! The upstream controller can push colors far faster than Bluetooth LE can
//! deliver them.  Buffering would only add latency, so the queue holds at most
//! one frame: publishing replaces whatever has not been consumed yet, and the
//! consumer always gets the newest frame.
//!
//! # Why `std::sync::Mutex` plus `tokio::sync::Notify`? (for beginners)
//!
//! The producer is a plain OS thread (the blocking UDP receive loop) while the
//! consumer is an async task.  A `std::sync::Mutex` can be locked from both
//! worlds without an `.await`, and the critical section is a single
//! `Option::replace`, so it never blocks for long.  `Notify` lets the async
//! consumer sleep until something is published instead of polling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use melkoleaf_core::Frame;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Single-slot queue.  Shared as `Arc<FrameQueue>`.
#[derive(Debug, Default)]
pub struct FrameQueue {
    slot: Mutex<Option<Frame>>,
    notify: Notify,
    published: AtomicU64,
    superseded: AtomicU64,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `frame`, dropping any frame that has not been consumed yet.
    ///
    /// Never blocks on the consumer and never fails.  Safe to call from
    /// blocking threads and async tasks alike.
    pub fn publish(&self, frame: Frame) {
        let previous = self.lock().replace(frame);
        if previous.is_some() {
            self.superseded.fetch_add(1, Ordering::Relaxed);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Takes the pending frame, if any, without waiting.
    pub fn try_take(&self) -> Option<Frame> {
        self.lock().take()
    }

    /// Waits up to `timeout` for a frame.
    ///
    /// Returns immediately when a frame is already pending.  Returns `None`
    /// if nothing was published before the timeout elapsed.
    pub async fn take_next(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking the slot so a publish that
            // lands in between still wakes us.
            let notified = self.notify.notified();
            if let Some(frame) = self.try_take() {
                return Some(frame);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_take();
            }
        }
    }

    /// Total frames published.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames that were replaced before anyone consumed them.
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        // The slot holds plain data; a panic elsewhere cannot leave it torn.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use melkoleaf_core::Rgb;

    use super::*;

    fn frame(v: u8) -> Frame {
        Frame::now(Rgb::new(v, v, v))
    }

    #[test]
    fn test_try_take_on_empty_queue_returns_none() {
        let queue = FrameQueue::new();
        assert_eq!(queue.try_take(), None);
    }

    #[test]
    fn test_publish_replaces_unconsumed_frame() {
        // Arrange
        let queue = FrameQueue::new();

        // Act
        queue.publish(frame(1));
        queue.publish(frame(2));
        queue.publish(frame(3));

        // Assert
        assert_eq!(queue.try_take().map(|f| f.color), Some(Rgb::new(3, 3, 3)));
        assert_eq!(queue.try_take(), None, "only one frame is ever held");
        assert_eq!(queue.published(), 3);
        assert_eq!(queue.superseded(), 2);
    }

    #[tokio::test]
    async fn test_take_next_returns_pending_frame_immediately() {
        let queue = FrameQueue::new();
        queue.publish(frame(7));

        let taken = queue.take_next(Duration::from_secs(5)).await;

        assert_eq!(taken.map(|f| f.color), Some(Rgb::new(7, 7, 7)));
    }

    #[tokio::test]
    async fn test_take_next_times_out_without_frame() {
        let queue = FrameQueue::new();

        let started = std::time::Instant::now();
        let taken = queue.take_next(Duration::from_millis(30)).await;

        assert_eq!(taken, None);
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_take_next_wakes_when_thread_publishes() {
        // Arrange: a blocking thread publishes after a short delay, the way
        // the UDP receiver does.
        let queue = Arc::new(FrameQueue::new());
        let producer = Arc::clone(&queue);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.publish(frame(9));
        });

        // Act
        let taken = queue.take_next(Duration::from_secs(5)).await;

        // Assert
        assert_eq!(taken.map(|f| f.color), Some(Rgb::new(9, 9, 9)));
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_stale_notification_does_not_return_none_early() {
        // A publish consumed by try_take leaves a Notify permit behind; the
        // next wait must not treat that permit as a frame.
        let queue = FrameQueue::new();
        queue.publish(frame(1));
        assert!(queue.try_take().is_some());

        let taken = queue.take_next(Duration::from_millis(20)).await;

        assert_eq!(taken, None);
    }
}
