//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration file from the
//! platform-appropriate directory, supplies defaults when it does not exist
//! yet, and turns it into the validated runtime
//! [`BridgeConfig`](crate::domain::config::BridgeConfig).

pub mod config;

pub use config::{load_config, save_config, AppConfig, ConfigError};
