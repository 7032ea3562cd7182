//! The explicit context object shared by every execution unit of one run.
//!
//! There is no global state: the stream receiver, the broadcaster, the HTTP
//! handlers, the reconnect supervisor, and the control surface all receive a
//! clone of [`BridgeContext`] and reach the queue, counters and registry only
//! through it.  A restart builds a fresh context; the old one is torn down
//! explicitly by triggering its [`ShutdownSignal`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::application::frame_queue::FrameQueue;
use crate::application::registry::{DeviceRegistry, LedTransport};
use crate::application::stream_state::StreamState;
use crate::domain::config::BridgeConfig;

/// One-shot cancellation signal observed by every unit of a run.
///
/// Blocking threads poll [`ShutdownSignal::is_triggered`] between timed
/// reads; async tasks await [`ShutdownSignal::wait`].
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal.  Idempotent.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once [`ShutdownSignal::trigger`] has been called.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a trigger in between is not lost.
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

/// Everything one run of the bridge shares between its units.
#[derive(Clone)]
pub struct BridgeContext {
    pub config: Arc<BridgeConfig>,
    pub queue: Arc<FrameQueue>,
    pub state: Arc<StreamState>,
    pub registry: Arc<DeviceRegistry>,
    pub shutdown: ShutdownSignal,
}

impl BridgeContext {
    /// Builds a fresh context for one run over the given transport.
    pub fn new(config: Arc<BridgeConfig>, transport: Arc<dyn LedTransport>) -> Self {
        let registry = DeviceRegistry::new(
            transport,
            config.retry.clone(),
            config.power_on_at_connect,
        );
        Self {
            config,
            queue: Arc::new(FrameQueue::new()),
            state: Arc::new(StreamState::new()),
            registry: Arc::new(registry),
            shutdown: ShutdownSignal::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_triggered() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let result = tokio::time::timeout(Duration::from_millis(100), signal.wait()).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_trigger_wakes_every_waiter() {
        // Arrange
        let signal = ShutdownSignal::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let s = signal.clone();
                tokio::spawn(async move { s.wait().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Act
        signal.trigger();

        // Assert
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter must wake")
                .unwrap();
        }
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_pends_until_triggered() {
        let signal = ShutdownSignal::new();
        let result = tokio::time::timeout(Duration::from_millis(30), signal.wait()).await;
        assert!(result.is_err());
    }
}
