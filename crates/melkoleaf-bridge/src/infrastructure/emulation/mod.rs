//! Emulation of the upstream peer device: the HTTP API and its DNS-SD record.
//!
//! - **`http`**       – axum router answering the controller's API calls.
//! - **`advertiser`** – mDNS publication so the controller can find us.

pub mod advertiser;
pub mod http;

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::application::context::ShutdownSignal;

pub use advertiser::{local_ipv4, AdvertiseError, Advertisement};
pub use http::{router, EmulationState};

/// Error type for the HTTP side of the emulation.
#[derive(Debug, Error)]
pub enum EmulationError {
    /// The listener could not be bound.
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The server stopped with an I/O error.
    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Binds the HTTP listener.  Done before any task is spawned so a port
/// conflict aborts startup.
pub async fn bind_http(addr: SocketAddr) -> Result<TcpListener, EmulationError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| EmulationError::BindFailed { addr, source })
}

/// Serves the emulated API on `listener` until `shutdown` fires.
pub async fn serve_http(
    listener: TcpListener,
    state: EmulationState,
    shutdown: ShutdownSignal,
) -> Result<(), EmulationError> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP emulation listening on {addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(EmulationError::Serve)?;
    info!("HTTP emulation stopped");
    Ok(())
}
