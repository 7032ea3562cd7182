//! Run lifecycle and the supervisor loop.
//!
//! A [`BridgeRun`] is one start-to-stop cycle of every execution unit:
//!
//! ```text
//!                 ┌──────────────── BridgeContext ────────────────┐
//! UDP ──► receiver thread ──► FrameQueue ──► broadcaster task ──► strips
//! HTTP ─► axum task ─────────────┘            registry ◄── reconnect task
//!                                   mDNS daemon (optional)
//! ```
//!
//! Startup order matters: both sockets are bound before any task is spawned
//! so a port conflict aborts the run cleanly.  Shutdown triggers the shared
//! [`ShutdownSignal`](crate::application::context::ShutdownSignal), withdraws
//! the advertisement, joins every unit with a bound, and finally disconnects
//! the strips.
//!
//! [`run_supervisor`] owns the loop around runs.  The auth token is created
//! once, before the first run, so a restart does not force the controller
//! to pair again.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::broadcaster::Broadcaster;
use crate::application::context::BridgeContext;
use crate::application::registry::LedTransport;
use crate::application::status::ServerState;
use crate::domain::auth::AuthToken;
use crate::domain::config::{BridgeConfig, DeviceSource};
use crate::infrastructure::control::{BridgeController, ControlCommand};
use crate::infrastructure::emulation::{
    bind_http, local_ipv4, serve_http, Advertisement, EmulationState,
};
use crate::infrastructure::stream_receiver::{start_stream_receiver, StreamReceiverHandle};

/// Upper bound on how long each unit may take to stop.
const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// One running instance of the bridge.
pub struct BridgeRun {
    ctx: BridgeContext,
    receiver: Option<StreamReceiverHandle>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    advertisement: Option<Advertisement>,
    http_addr: SocketAddr,
    advertised_addr: SocketAddr,
}

impl BridgeRun {
    /// Binds both listeners and spawns every unit.
    ///
    /// # Errors
    ///
    /// Fails if either socket cannot be bound.  Nothing is left running in
    /// that case.
    pub async fn start(
        config: Arc<BridgeConfig>,
        transport: Arc<dyn LedTransport>,
        token: AuthToken,
    ) -> anyhow::Result<Self> {
        let ctx = BridgeContext::new(Arc::clone(&config), transport);

        let receiver = start_stream_receiver(
            config.stream_addr(),
            Arc::clone(&ctx.queue),
            Arc::clone(&ctx.state),
            ctx.shutdown.clone(),
        )
        .context("failed to start the stream receiver")?;

        let listener = match bind_http(config.http_addr()).await {
            Ok(listener) => listener,
            Err(e) => {
                ctx.shutdown.trigger();
                join_receiver(receiver).await;
                return Err(e).context("failed to start the HTTP emulation");
            }
        };
        let http_addr = listener.local_addr().unwrap_or_else(|_| config.http_addr());

        let lan_ip = match config.bind_ip {
            IpAddr::V4(ip) if !ip.is_unspecified() => ip,
            _ => local_ipv4(),
        };
        let advertised_addr = SocketAddr::new(IpAddr::V4(lan_ip), http_addr.port());

        let mut tasks = Vec::new();

        let http_state = EmulationState {
            ctx: ctx.clone(),
            token,
            stream_ip: IpAddr::V4(lan_ip),
        };
        let shutdown = ctx.shutdown.clone();
        tasks.push((
            "http",
            tokio::spawn(async move {
                if let Err(e) = serve_http(listener, http_state, shutdown).await {
                    warn!("{e}");
                }
            }),
        ));

        let registry = Arc::clone(&ctx.registry);
        let source = config.devices.clone();
        let shutdown = ctx.shutdown.clone();
        tasks.push((
            "devices",
            tokio::spawn(async move { registry.maintain(&source, shutdown).await }),
        ));

        tasks.push((
            "broadcaster",
            tokio::spawn(Broadcaster::from_context(&ctx).run(ctx.shutdown.clone())),
        ));

        let advertisement = if config.advertise {
            match Advertisement::publish(lan_ip, http_addr.port(), &config.device_id) {
                Ok(ad) => Some(ad),
                Err(e) => {
                    warn!("mDNS advertisement unavailable: {e}");
                    None
                }
            }
        } else {
            debug!("mDNS advertisement disabled");
            None
        };

        info!(
            http = %http_addr,
            stream = %receiver.local_addr(),
            advertised = %advertised_addr,
            "bridge running"
        );

        Ok(Self {
            ctx,
            receiver: Some(receiver),
            tasks,
            advertisement,
            http_addr,
            advertised_addr,
        })
    }

    pub fn context(&self) -> &BridgeContext {
        &self.ctx
    }

    /// Address the HTTP listener is bound to.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Address the UDP receiver is bound to.
    pub fn stream_addr(&self) -> Option<SocketAddr> {
        self.receiver.as_ref().map(StreamReceiverHandle::local_addr)
    }

    /// `lan-ip:http-port` as handed to controllers.
    pub fn advertised_addr(&self) -> SocketAddr {
        self.advertised_addr
    }

    /// Stops every unit and disconnects the strips.
    pub async fn stop(mut self) {
        info!("stopping bridge");
        self.ctx.shutdown.trigger();

        if let Some(ad) = self.advertisement.take() {
            if tokio::task::spawn_blocking(move || ad.withdraw()).await.is_err() {
                warn!("advertisement withdrawal panicked");
            }
        }

        for (name, mut task) in self.tasks.drain(..) {
            match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
                Ok(Ok(())) => debug!("{name} stopped"),
                Ok(Err(e)) => warn!("{name} task failed: {e}"),
                Err(_) => {
                    warn!("{name} did not stop within {STOP_TIMEOUT:?}; aborting");
                    task.abort();
                }
            }
        }

        if let Some(receiver) = self.receiver.take() {
            join_receiver(receiver).await;
        }

        self.ctx.registry.disconnect_all().await;
        info!("bridge stopped");
    }
}

async fn join_receiver(receiver: StreamReceiverHandle) {
    let joined = tokio::task::spawn_blocking(move || receiver.join());
    match tokio::time::timeout(STOP_TIMEOUT, joined).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("stream receiver join failed: {e}"),
        Err(_) => warn!("stream receiver did not stop within {STOP_TIMEOUT:?}"),
    }
}

/// Runs the bridge until a [`ControlCommand::Shutdown`] arrives.
///
/// Each [`ControlCommand::Restart`] stops the current run and starts a new
/// one with the same configuration, transport, and auth token.
///
/// # Errors
///
/// Fails if the configured auth token is unusable or a run cannot start.
pub async fn run_supervisor(
    config: Arc<BridgeConfig>,
    transport: Arc<dyn LedTransport>,
    controller: BridgeController,
    mut commands: mpsc::UnboundedReceiver<ControlCommand>,
) -> anyhow::Result<()> {
    let token = AuthToken::configured_or_generated(config.auth_token.as_deref())
        .context("configured auth token is invalid")?;
    info!(device_id = %config.device_id, "bridge identity ready");

    loop {
        controller.set_server_state(ServerState::Starting);
        let run = match BridgeRun::start(Arc::clone(&config), Arc::clone(&transport), token.clone()).await {
            Ok(run) => run,
            Err(e) => {
                controller.set_server_state(ServerState::Stopped);
                return Err(e);
            }
        };
        controller
            .attach(run.context().clone(), Some(run.advertised_addr()))
            .await;

        let command = commands.recv().await.unwrap_or(ControlCommand::Shutdown);
        controller.detach().await;
        run.stop().await;

        match command {
            ControlCommand::Restart => info!("restarting bridge"),
            ControlCommand::Shutdown => break,
        }
    }

    controller.set_server_state(ServerState::Stopped);
    info!("supervisor exited");
    Ok(())
}

/// Loopback-only configuration with OS-assigned ports and no advertisement.
pub fn ephemeral_config(devices: DeviceSource) -> BridgeConfig {
    BridgeConfig {
        bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        http_port: 0,
        stream_port: 0,
        advertise: false,
        devices,
        ..BridgeConfig::default()
    }
}
