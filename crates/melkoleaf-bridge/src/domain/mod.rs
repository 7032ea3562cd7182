//! Domain types for the bridge process.
//!
//! Nothing in here performs I/O.  The types describe what the bridge is
//! configured to do ([`config`]), who may talk to it ([`auth`]), and what the
//! emulated HTTP API accepts and returns ([`api`]).

pub mod api;
pub mod auth;
pub mod config;

pub use auth::{AuthToken, AuthTokenError};
pub use config::{BridgeConfig, BroadcastSettings, DeviceSource, RetryPolicy};
