//! Runtime configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for every runtime setting.
//! It is built once at startup by the infrastructure layer (TOML file, then
//! environment, then CLI flags), validated, and shared read-only by every
//! execution unit through the `BridgeContext`.
//!
//! # Design rationale
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! variable reads inside the domain) makes every unit easy to construct in
//! tests with exactly the settings the test needs.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use melkoleaf_core::DeviceAddress;

/// Well-known HTTP port of the Nanoleaf OpenAPI.
pub const DEFAULT_HTTP_PORT: u16 = 16021;

/// Well-known UDP port for extControl streaming.
pub const DEFAULT_STREAM_PORT: u16 = 60222;

/// Stable device identifier; the controller keys its device cache on it.
pub const DEFAULT_DEVICE_ID: &str = "melkoa-bridge-1";

/// Where the initial set of strips comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSource {
    /// Connect to exactly these addresses.
    Configured(Vec<DeviceAddress>),
    /// Scan for advertisements whose name contains `MELK`.
    Scan { timeout: Duration },
}

/// Settings for the fan-out broadcast loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Upper bound on commands per second.
    pub max_fps: u32,
    /// Bound on a single device write.
    pub write_timeout: Duration,
    /// How long one cycle waits for a frame before reporting idle.
    pub idle_timeout: Duration,
}

impl BroadcastSettings {
    /// Interval between two consecutive broadcast cycles.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use melkoleaf_bridge::domain::config::BroadcastSettings;
    /// use std::time::Duration;
    ///
    /// let settings = BroadcastSettings { max_fps: 20, ..BroadcastSettings::default() };
    /// assert_eq!(settings.cadence(), Duration::from_millis(50));
    /// ```
    pub fn cadence(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.max_fps.max(1)))
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            max_fps: 30,
            write_timeout: Duration::from_millis(250),
            idle_timeout: Duration::from_millis(500),
        }
    }
}

/// Connection bound and exponential backoff for reconnecting dropped strips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Bound on one connect attempt, including the power-on commands.
    /// An attempt that runs out counts as a failed attempt.
    pub connect_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// After this many failed reconnects the device waits for a rescan.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based).
    ///
    /// Doubles from `initial_backoff` and saturates at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// `true` once `attempts` reconnects have failed and no more are scheduled.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            max_attempts: 5,
        }
    }
}

/// All runtime configuration for one bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the HTTP and UDP listeners bind to.
    pub bind_ip: IpAddr,
    pub http_port: u16,
    pub stream_port: u16,
    /// Fixed auth token; a random one is issued when `None`.
    pub auth_token: Option<String>,
    pub device_id: String,
    /// Publish the mDNS advertisement.
    pub advertise: bool,
    pub devices: DeviceSource,
    /// Send "power on, full brightness" once after connecting.
    pub power_on_at_connect: bool,
    pub broadcast: BroadcastSettings,
    pub retry: RetryPolicy,
}

impl BridgeConfig {
    /// Socket address of the HTTP listener.
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.http_port)
    }

    /// Socket address of the UDP stream listener.
    pub fn stream_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.stream_port)
    }
}

impl Default for BridgeConfig {
    /// | Field               | Default                 |
    /// |---------------------|-------------------------|
    /// | bind_ip             | `0.0.0.0`               |
    /// | http_port           | `16021`                 |
    /// | stream_port         | `60222`                 |
    /// | devices             | scan for 12 seconds     |
    /// | broadcast.max_fps   | 30                      |
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: DEFAULT_HTTP_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            auth_token: None,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            advertise: true,
            devices: DeviceSource::Scan {
                timeout: Duration::from_secs(12),
            },
            power_on_at_connect: true,
            broadcast: BroadcastSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports_match_nanoleaf() {
        // Arrange / Act
        let cfg = BridgeConfig::default();

        // Assert
        assert_eq!(cfg.http_addr().port(), 16021);
        assert_eq!(cfg.stream_addr().port(), 60222);
    }

    #[test]
    fn test_default_devices_are_scanned() {
        let cfg = BridgeConfig::default();
        assert!(matches!(cfg.devices, DeviceSource::Scan { .. }));
    }

    #[test]
    fn test_default_cadence_is_thirty_hz() {
        let settings = BroadcastSettings::default();
        assert_eq!(settings.cadence(), Duration::from_micros(33_333));
    }

    #[test]
    fn test_cadence_with_zero_fps_does_not_divide_by_zero() {
        let settings = BroadcastSettings {
            max_fps: 0,
            ..BroadcastSettings::default()
        };
        assert_eq!(settings.cadence(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_doubles_then_saturates() {
        // Arrange
        let policy = RetryPolicy::default();

        // Act / Assert
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(30), Duration::from_secs(8));
    }

    #[test]
    fn test_policy_is_exhausted_at_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));
    }
}
