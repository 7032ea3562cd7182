//! Fan-out writer: takes the freshest frame and writes it to every strip.
//!
//! # One cycle
//!
//! ```text
//! take_next(idle_timeout) ──none──► Idle
//!        │
//!     paused? ──yes──► discard, forget last color ──► Drained
//!        │
//!  wait for cadence tick, re-take if a newer frame arrived
//!        │
//!  same color as last sent? ──yes──► Unchanged
//!        │
//!  encode once ──► write to every connected device concurrently,
//!                  each bounded by write_timeout ──► Sent(CycleReport)
//! ```
//!
//! The cadence bounds the output rate (30 Hz by default) no matter how fast
//! frames arrive.  Because the queue holds a single slot, whatever arrives
//! between two ticks collapses into the newest frame.
//!
//! Writes are issued in parallel and each is bounded, so one unresponsive
//! strip delays nobody else.  Failures are handed to the registry, which
//! marks the strip disconnected and schedules a reconnect; delivery is
//! best-effort across the fleet.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use melkoleaf_core::{encode_color, DeviceAddress, Frame, Rgb};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::application::context::{BridgeContext, ShutdownSignal};
use crate::application::frame_queue::FrameQueue;
use crate::application::registry::DeviceRegistry;
use crate::application::stream_state::StreamState;
use crate::domain::config::BroadcastSettings;

/// Log the first few commands, then every Nth.
const LOG_FIRST_COMMANDS: u64 = 3;
const LOG_EVERY_NTH_COMMAND: u64 = 30;

/// Result of writing one color to the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub color: Rgb,
    pub delivered: Vec<DeviceAddress>,
    pub failed: Vec<(DeviceAddress, String)>,
}

/// The waiting half of a cycle either yields a frame to write or ends the
/// cycle early.
enum Next {
    Write(Frame),
    Done(StepOutcome),
}

/// What one call to [`Broadcaster::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// No frame arrived within the idle timeout.
    Idle,
    /// Paused: a frame was taken and thrown away.
    Drained,
    /// The frame repeated the last color sent.
    Unchanged,
    /// The color was written; see the report for per-device results.
    Sent(CycleReport),
}

pub struct Broadcaster {
    queue: Arc<FrameQueue>,
    state: Arc<StreamState>,
    registry: Arc<DeviceRegistry>,
    settings: BroadcastSettings,
    cadence: Option<Interval>,
    last_sent: Option<Rgb>,
}

impl Broadcaster {
    pub fn new(
        queue: Arc<FrameQueue>,
        state: Arc<StreamState>,
        registry: Arc<DeviceRegistry>,
        settings: BroadcastSettings,
    ) -> Self {
        Self {
            queue,
            state,
            registry,
            settings,
            cadence: None,
            last_sent: None,
        }
    }

    pub fn from_context(ctx: &BridgeContext) -> Self {
        Self::new(
            Arc::clone(&ctx.queue),
            Arc::clone(&ctx.state),
            Arc::clone(&ctx.registry),
            ctx.config.broadcast.clone(),
        )
    }

    /// Runs one cycle.
    pub async fn step(&mut self) -> StepOutcome {
        match self.next_color().await {
            Next::Write(frame) => self.deliver(frame).await,
            Next::Done(outcome) => outcome,
        }
    }

    /// Loops [`Broadcaster::step`] until `shutdown` fires.
    ///
    /// Shutdown interrupts the wait for a frame or a tick, never a fan-out
    /// already under way; that one finishes within the write timeout.
    pub async fn run(mut self, shutdown: ShutdownSignal) {
        info!(
            "broadcaster running at up to {} Hz",
            self.settings.max_fps.max(1)
        );
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                next = self.next_color() => next,
            };
            if let Next::Write(frame) = next {
                self.deliver(frame).await;
            }
        }
        info!("broadcaster stopped");
    }

    /// Waits for a frame and the next cadence tick.
    async fn next_color(&mut self) -> Next {
        let Some(frame) = self.queue.take_next(self.settings.idle_timeout).await else {
            return Next::Done(StepOutcome::Idle);
        };

        if self.state.is_paused() {
            // Forgetting the last color makes the first frame after resume
            // go out even if it matches what the strips showed before.
            self.last_sent = None;
            return Next::Done(StepOutcome::Drained);
        }

        self.wait_for_tick().await;
        let frame = self.queue.try_take().unwrap_or(frame);

        // Pause may have been requested while waiting for the tick.
        if self.state.is_paused() {
            self.last_sent = None;
            return Next::Done(StepOutcome::Drained);
        }

        if self.last_sent == Some(frame.color) {
            return Next::Done(StepOutcome::Unchanged);
        }
        Next::Write(frame)
    }

    async fn deliver(&mut self, frame: Frame) -> StepOutcome {
        let color = frame.color;
        let report = self.fan_out(color).await;
        if !report.delivered.is_empty() {
            self.last_sent = Some(color);
            let sent = self.state.record_command_sent();
            if sent <= LOG_FIRST_COMMANDS || sent % LOG_EVERY_NTH_COMMAND == 0 {
                debug!(
                    command = sent,
                    color = %color,
                    delivered = report.delivered.len(),
                    failed = report.failed.len(),
                    latency_ms = frame.age().as_millis() as u64,
                    "broadcast"
                );
            }
        }
        StepOutcome::Sent(report)
    }

    async fn wait_for_tick(&mut self) {
        let period = self.settings.cadence();
        let cadence = self.cadence.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        cadence.tick().await;
    }

    async fn fan_out(&self, color: Rgb) -> CycleReport {
        let command = encode_color(color);
        let write_timeout = self.settings.write_timeout;
        let links = self.registry.connected_links().await;

        let results = join_all(links.into_iter().map(|(address, link)| async move {
            let result = match tokio::time::timeout(write_timeout, link.write(&command)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("write timed out after {}", fmt_ms(write_timeout))),
            };
            (address, link, result)
        }))
        .await;

        let mut report = CycleReport {
            color,
            delivered: Vec::new(),
            failed: Vec::new(),
        };
        for (address, link, result) in results {
            match result {
                Ok(()) => {
                    self.registry.record_sent(address, color).await;
                    report.delivered.push(address);
                }
                Err(reason) => {
                    self.registry.mark_failed(address, &link, &reason).await;
                    report.failed.push((address, reason));
                }
            }
        }
        report.delivered.sort();
        report.failed.sort();
        report
    }
}

fn fmt_ms(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{DeviceSource, RetryPolicy};
    use crate::infrastructure::ble::mock::MockTransport;

    fn addr(last: u8) -> DeviceAddress {
        DeviceAddress::from_octets([0xBE, 0xEF, 0, 0, 0, last])
    }

    fn settings() -> BroadcastSettings {
        BroadcastSettings {
            max_fps: 50,
            write_timeout: Duration::from_millis(50),
            idle_timeout: Duration::from_millis(30),
        }
    }

    async fn fixture(devices: &[DeviceAddress]) -> (Broadcaster, MockTransport, Arc<FrameQueue>, Arc<StreamState>) {
        let transport = MockTransport::with_devices(devices);
        let registry = Arc::new(DeviceRegistry::new(
            Arc::new(transport.clone()),
            RetryPolicy::default(),
            false,
        ));
        registry
            .discover(&DeviceSource::Configured(devices.to_vec()))
            .await;
        let queue = Arc::new(FrameQueue::new());
        let state = Arc::new(StreamState::new());
        let broadcaster = Broadcaster::new(
            Arc::clone(&queue),
            Arc::clone(&state),
            registry,
            settings(),
        );
        (broadcaster, transport, queue, state)
    }

    #[tokio::test]
    async fn test_step_without_frame_is_idle() {
        let (mut broadcaster, _, _, _) = fixture(&[addr(1)]).await;
        assert_eq!(broadcaster.step().await, StepOutcome::Idle);
    }

    #[tokio::test]
    async fn test_step_writes_color_to_every_device() {
        // Arrange
        let (mut broadcaster, transport, queue, state) = fixture(&[addr(1), addr(2)]).await;
        queue.publish(Frame::now(Rgb::new(10, 20, 30)));

        // Act
        let outcome = broadcaster.step().await;

        // Assert
        let expected = encode_color(Rgb::new(10, 20, 30)).to_vec();
        assert_eq!(transport.writes_to(addr(1)), vec![expected.clone()]);
        assert_eq!(transport.writes_to(addr(2)), vec![expected]);
        assert_eq!(state.commands_sent(), 1);
        match outcome {
            StepOutcome::Sent(report) => {
                assert_eq!(report.delivered, vec![addr(1), addr(2)]);
                assert!(report.failed.is_empty());
            }
            other => panic!("expected Sent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_repeated_color_is_skipped() {
        let (mut broadcaster, transport, queue, _) = fixture(&[addr(1)]).await;
        queue.publish(Frame::now(Rgb::new(5, 5, 5)));
        broadcaster.step().await;

        queue.publish(Frame::now(Rgb::new(5, 5, 5)));
        let outcome = broadcaster.step().await;

        assert_eq!(outcome, StepOutcome::Unchanged);
        assert_eq!(transport.writes_to(addr(1)).len(), 1);
    }

    #[tokio::test]
    async fn test_paused_step_drains_without_writing() {
        // Arrange
        let (mut broadcaster, transport, queue, state) = fixture(&[addr(1)]).await;
        state.set_paused(true);
        queue.publish(Frame::now(Rgb::new(1, 1, 1)));

        // Act
        let outcome = broadcaster.step().await;

        // Assert
        assert_eq!(outcome, StepOutcome::Drained);
        assert!(transport.writes_to(addr(1)).is_empty());
        assert_eq!(queue.try_take(), None, "frame must be consumed");
    }

    #[tokio::test]
    async fn test_same_color_after_pause_is_sent_again() {
        let (mut broadcaster, transport, queue, state) = fixture(&[addr(1)]).await;
        queue.publish(Frame::now(Rgb::new(8, 8, 8)));
        broadcaster.step().await;

        state.set_paused(true);
        queue.publish(Frame::now(Rgb::new(8, 8, 8)));
        broadcaster.step().await;
        state.set_paused(false);
        queue.publish(Frame::now(Rgb::new(8, 8, 8)));
        let outcome = broadcaster.step().await;

        assert!(matches!(outcome, StepOutcome::Sent(_)));
        assert_eq!(transport.writes_to(addr(1)).len(), 2);
    }

    #[tokio::test]
    async fn test_failing_device_does_not_block_others() {
        // Arrange: one device rejects writes, one hangs past the timeout.
        let (mut broadcaster, transport, queue, state) =
            fixture(&[addr(1), addr(2), addr(3)]).await;
        transport.fail_writes(addr(2), true);
        transport.delay_writes(addr(3), Duration::from_secs(5));
        queue.publish(Frame::now(Rgb::new(0, 255, 0)));

        // Act
        let started = std::time::Instant::now();
        let outcome = broadcaster.step().await;

        // Assert
        assert!(started.elapsed() < Duration::from_secs(1));
        let StepOutcome::Sent(report) = outcome else {
            panic!("expected Sent");
        };
        assert_eq!(report.delivered, vec![addr(1)]);
        let failed: Vec<DeviceAddress> = report.failed.iter().map(|(a, _)| *a).collect();
        assert_eq!(failed, vec![addr(2), addr(3)]);
        assert!(report.failed[1].1.contains("timed out"));
        assert_eq!(state.commands_sent(), 1);
        assert_eq!(broadcaster.registry.connected_count().await, 1);
    }

    #[tokio::test]
    async fn test_no_devices_completes_with_empty_report() {
        let (mut broadcaster, _, queue, state) = fixture(&[]).await;
        queue.publish(Frame::now(Rgb::new(3, 3, 3)));

        let outcome = broadcaster.step().await;

        let StepOutcome::Sent(report) = outcome else {
            panic!("expected Sent");
        };
        assert!(report.delivered.is_empty());
        assert_eq!(state.commands_sent(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_writes_at_most_once_per_tick() {
        // Arrange: a new color every 2 ms for ten cadence periods.
        let (broadcaster, transport, queue, _) = fixture(&[addr(1)]).await;
        let cadence = settings().cadence();
        let ticks = 10;
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(broadcaster.run(shutdown.clone()));

        // Act
        for i in 1..=100u8 {
            queue.publish(Frame::now(Rgb::new(i, 0, 0)));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        tokio::time::sleep(cadence * 3).await;
        shutdown.trigger();
        task.await.unwrap();

        // Assert
        let writes = transport.writes_to(addr(1));
        assert!(
            writes.len() <= ticks + 1,
            "{} writes over {ticks} ticks",
            writes.len()
        );
        for pair in transport.write_times_to(addr(1)).windows(2) {
            assert!(pair[1] - pair[0] >= cadence, "writes closer than one tick");
        }
        assert_eq!(
            writes.last(),
            Some(&encode_color(Rgb::new(100, 0, 0)).to_vec())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_in_flight_fan_out_finish() {
        // Arrange: one slow strip keeps the fan-out busy.
        let (broadcaster, transport, queue, _) = fixture(&[addr(1), addr(2)]).await;
        transport.delay_writes(addr(2), Duration::from_millis(30));
        queue.publish(Frame::now(Rgb::new(9, 9, 9)));
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(broadcaster.run(shutdown.clone()));

        // Act: shut down while the slow write is still in flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.writes_to(addr(1)).len(), 1);
        assert!(transport.writes_to(addr(2)).is_empty());
        shutdown.trigger();
        task.await.unwrap();

        // Assert
        assert_eq!(
            transport.writes_to(addr(2)),
            vec![encode_color(Rgb::new(9, 9, 9)).to_vec()]
        );
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let (broadcaster, _, _, _) = fixture(&[addr(1)]).await;
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(broadcaster.run(shutdown.clone()));

        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("broadcaster must stop")
            .unwrap();
    }
}
