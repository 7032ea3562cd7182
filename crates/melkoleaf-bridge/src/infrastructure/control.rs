//! Presentation-agnostic control surface.
//!
//! A [`BridgeController`] is what a tray icon, a CLI, or a test uses to
//! observe and steer the bridge.  It never owns a run: the supervisor
//! attaches each run's context when it starts and detaches it before
//! stopping it, so the controller survives restarts and always reports on
//! whichever run is current.
//!
//! `pause()`, `resume()` and `rescan()` act on the current run directly.
//! `restart()` and `shutdown()` only enqueue a [`ControlCommand`]; the
//! supervisor in `runtime` performs them.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use melkoleaf_core::Frame;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::application::context::BridgeContext;
use crate::application::status::{ServerState, StatusSnapshot};

/// Lifecycle commands consumed by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Restart,
    Shutdown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    /// No run is attached (starting up, restarting, or stopped).
    #[error("bridge is not running")]
    NotRunning,
    /// The supervisor has exited and no longer accepts commands.
    #[error("bridge supervisor has stopped")]
    SupervisorStopped,
}

struct RunView {
    ctx: BridgeContext,
    advertised: Option<SocketAddr>,
}

struct ControllerInner {
    current: RwLock<Option<RunView>>,
    server_state: Mutex<ServerState>,
    commands: mpsc::UnboundedSender<ControlCommand>,
}

/// Cloneable handle for observing and steering the bridge.
#[derive(Clone)]
pub struct BridgeController {
    inner: Arc<ControllerInner>,
}

impl BridgeController {
    /// Creates a controller and the command stream the supervisor reads.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ControlCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Self {
            inner: Arc::new(ControllerInner {
                current: RwLock::new(None),
                server_state: Mutex::new(ServerState::Stopped),
                commands: tx,
            }),
        };
        (controller, rx)
    }

    /// Makes `ctx` the current run.
    pub async fn attach(&self, ctx: BridgeContext, advertised: Option<SocketAddr>) {
        *self.inner.current.write().await = Some(RunView { ctx, advertised });
        self.set_server_state(ServerState::Running);
    }

    /// Forgets the current run.  Called before the run is stopped.
    pub async fn detach(&self) {
        *self.inner.current.write().await = None;
        self.set_server_state(ServerState::Stopped);
    }

    pub fn set_server_state(&self, state: ServerState) {
        *self
            .inner
            .server_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn server_state(&self) -> ServerState {
        *self
            .inner
            .server_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Status of the current run, or an idle snapshot if none is attached.
    pub async fn snapshot(&self) -> StatusSnapshot {
        let server_state = self.server_state();
        match self.inner.current.read().await.as_ref() {
            Some(run) => StatusSnapshot::collect(server_state, &run.ctx, run.advertised).await,
            None => StatusSnapshot::idle(server_state),
        }
    }

    /// Stops sending colors to the strips.  The stream keeps being received
    /// and counted.
    pub async fn pause(&self) -> Result<(), ControlError> {
        let current = self.inner.current.read().await;
        let run = current.as_ref().ok_or(ControlError::NotRunning)?;
        if !run.ctx.state.set_paused(true) {
            info!("broadcast paused");
        }
        Ok(())
    }

    /// Resumes sending.  The latest received color is republished so the
    /// strips catch up immediately instead of waiting for the next datagram.
    pub async fn resume(&self) -> Result<(), ControlError> {
        let current = self.inner.current.read().await;
        let run = current.as_ref().ok_or(ControlError::NotRunning)?;
        if run.ctx.state.set_paused(false) {
            if let Some(color) = run.ctx.state.last_color() {
                run.ctx.queue.publish(Frame::now(color));
            }
            info!("broadcast resumed");
        }
        Ok(())
    }

    /// Repeats device discovery on the current run.  Strips that used up
    /// their reconnect attempts get a fresh budget.
    ///
    /// Returns the number of connected strips afterwards.
    pub async fn rescan(&self) -> Result<usize, ControlError> {
        let registry = {
            let current = self.inner.current.read().await;
            let run = current.as_ref().ok_or(ControlError::NotRunning)?;
            Arc::clone(&run.ctx.registry)
        };
        info!("rescanning for devices");
        Ok(registry.rescan().await)
    }

    /// Asks the supervisor to stop the current run and start a fresh one.
    pub fn restart(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Restart)
    }

    /// Asks the supervisor to stop the current run and exit.
    pub fn shutdown(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Shutdown)
    }

    fn send(&self, command: ControlCommand) -> Result<(), ControlError> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| ControlError::SupervisorStopped)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use melkoleaf_core::Rgb;

    use super::*;
    use crate::domain::config::{BridgeConfig, DeviceSource, RetryPolicy};
    use crate::infrastructure::ble::mock::MockTransport;

    fn context() -> BridgeContext {
        BridgeContext::new(
            Arc::new(BridgeConfig::default()),
            Arc::new(MockTransport::new()),
        )
    }

    #[tokio::test]
    async fn test_snapshot_without_run_is_idle() {
        let (controller, _rx) = BridgeController::new();

        let snapshot = controller.snapshot().await;

        assert_eq!(snapshot, StatusSnapshot::idle(ServerState::Stopped));
    }

    #[tokio::test]
    async fn test_attach_reports_running_context() {
        // Arrange
        let (controller, _rx) = BridgeController::new();
        let ctx = context();
        ctx.state.record_packet(Rgb::new(1, 2, 3));
        let advertised: SocketAddr = "192.168.1.20:16021".parse().unwrap();

        // Act
        controller.attach(ctx, Some(advertised)).await;
        let snapshot = controller.snapshot().await;

        // Assert
        assert_eq!(snapshot.server_state, ServerState::Running);
        assert_eq!(snapshot.udp_packet_count, 1);
        assert_eq!(snapshot.advertised_address.as_deref(), Some("192.168.1.20:16021"));
    }

    #[tokio::test]
    async fn test_pause_without_run_is_rejected() {
        let (controller, _rx) = BridgeController::new();
        assert_eq!(controller.pause().await, Err(ControlError::NotRunning));
    }

    #[tokio::test]
    async fn test_resume_republishes_latest_color() {
        // Arrange
        let (controller, _rx) = BridgeController::new();
        let ctx = context();
        controller.attach(ctx.clone(), None).await;
        controller.pause().await.unwrap();
        ctx.state.record_packet(Rgb::new(9, 9, 9));
        ctx.queue.try_take();

        // Act
        controller.resume().await.unwrap();

        // Assert
        assert!(!ctx.state.is_paused());
        let frame = ctx.queue.take_next(Duration::from_millis(50)).await;
        assert_eq!(frame.map(|f| f.color), Some(Rgb::new(9, 9, 9)));
    }

    #[tokio::test]
    async fn test_resume_when_not_paused_publishes_nothing() {
        let (controller, _rx) = BridgeController::new();
        let ctx = context();
        ctx.state.set_last_color(Rgb::new(1, 1, 1));
        controller.attach(ctx.clone(), None).await;

        controller.resume().await.unwrap();

        assert!(ctx.queue.try_take().is_none());
    }

    #[tokio::test]
    async fn test_rescan_without_run_is_rejected() {
        let (controller, _rx) = BridgeController::new();
        assert_eq!(controller.rescan().await, Err(ControlError::NotRunning));
    }

    #[tokio::test]
    async fn test_rescan_reconnects_strip_that_gave_up() {
        // Arrange: a strip that used its single attempt and is no longer retried.
        let address = melkoleaf_core::DeviceAddress::from_octets([0xBE, 0xEF, 0, 0, 0, 1]);
        let transport = MockTransport::with_devices(&[address]);
        transport.fail_connects(address, 1);
        let config = BridgeConfig {
            devices: DeviceSource::Configured(vec![address]),
            power_on_at_connect: false,
            retry: RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
            ..BridgeConfig::default()
        };
        let ctx = BridgeContext::new(Arc::new(config), Arc::new(transport.clone()));
        ctx.registry.discover(&ctx.config.devices).await;
        assert!(!ctx.registry.snapshot().await[0].retry_scheduled);
        let (controller, _rx) = BridgeController::new();
        controller.attach(ctx.clone(), None).await;

        // Act
        let connected = controller.rescan().await;

        // Assert
        assert_eq!(connected, Ok(1));
        assert_eq!(transport.connect_attempts(address), 2);
    }

    #[tokio::test]
    async fn test_commands_reach_supervisor() {
        let (controller, mut rx) = BridgeController::new();

        controller.restart().unwrap();
        controller.shutdown().unwrap();

        assert_eq!(rx.recv().await, Some(ControlCommand::Restart));
        assert_eq!(rx.recv().await, Some(ControlCommand::Shutdown));
    }

    #[tokio::test]
    async fn test_commands_fail_once_supervisor_is_gone() {
        let (controller, rx) = BridgeController::new();
        drop(rx);

        assert_eq!(controller.shutdown(), Err(ControlError::SupervisorStopped));
    }

    #[tokio::test]
    async fn test_detach_returns_to_idle() {
        let (controller, _rx) = BridgeController::new();
        controller.attach(context(), None).await;

        controller.detach().await;

        assert_eq!(controller.snapshot().await.server_state, ServerState::Stopped);
        assert_eq!(controller.pause().await, Err(ControlError::NotRunning));
    }
}
