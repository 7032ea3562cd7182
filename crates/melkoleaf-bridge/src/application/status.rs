//! Read-only status snapshot for presentation layers.

use std::net::SocketAddr;

use melkoleaf_core::Rgb;
use serde::Serialize;

use crate::application::context::BridgeContext;
use crate::application::registry::{DeviceSnapshot, Readiness};

/// Lifecycle of the bridge's servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerState {
    Starting,
    Running,
    Stopped,
}

/// Everything a status display needs, captured at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub server_state: ServerState,
    pub paused: bool,
    pub streaming_active: bool,
    pub udp_packet_count: u64,
    pub decode_errors: u64,
    pub commands_sent: u64,
    pub ble_readiness: Readiness,
    pub connected_device_count: usize,
    pub devices: Vec<DeviceSnapshot>,
    /// `ip:port` of the HTTP surface as advertised, if running.
    pub advertised_address: Option<String>,
    pub last_color: Option<Rgb>,
}

impl StatusSnapshot {
    /// Captures the state of a running context.
    pub async fn collect(
        server_state: ServerState,
        ctx: &BridgeContext,
        advertised: Option<SocketAddr>,
    ) -> Self {
        let devices = ctx.registry.snapshot().await;
        Self {
            server_state,
            paused: ctx.state.is_paused(),
            streaming_active: ctx.state.is_streaming_active(),
            udp_packet_count: ctx.state.packets_received(),
            decode_errors: ctx.state.decode_errors(),
            commands_sent: ctx.state.commands_sent(),
            ble_readiness: ctx.registry.readiness(),
            connected_device_count: devices.iter().filter(|d| d.connected).count(),
            devices,
            advertised_address: advertised.map(|a| a.to_string()),
            last_color: ctx.state.last_color(),
        }
    }

    /// Snapshot used while no run is attached.
    pub fn idle(server_state: ServerState) -> Self {
        Self {
            server_state,
            paused: false,
            streaming_active: false,
            udp_packet_count: 0,
            decode_errors: 0,
            commands_sent: 0,
            ble_readiness: Readiness::Starting,
            connected_device_count: 0,
            devices: Vec::new(),
            advertised_address: None,
            last_color: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use melkoleaf_core::DeviceAddress;

    use super::*;
    use crate::domain::config::{BridgeConfig, DeviceSource};
    use crate::infrastructure::ble::mock::MockTransport;

    #[tokio::test]
    async fn test_collect_reflects_counters_and_devices() {
        // Arrange
        let address = DeviceAddress::from_octets([1, 2, 3, 4, 5, 6]);
        let transport = Arc::new(MockTransport::with_devices(&[address]));
        let ctx = BridgeContext::new(Arc::new(BridgeConfig::default()), transport);
        ctx.registry
            .discover(&DeviceSource::Configured(vec![address]))
            .await;
        ctx.state.record_packet(Rgb::new(9, 9, 9));
        ctx.state.record_decode_error();

        // Act
        let snapshot = StatusSnapshot::collect(
            ServerState::Running,
            &ctx,
            Some("192.168.1.5:16021".parse().unwrap()),
        )
        .await;

        // Assert
        assert_eq!(snapshot.udp_packet_count, 1);
        assert_eq!(snapshot.decode_errors, 1);
        assert_eq!(snapshot.connected_device_count, 1);
        assert_eq!(snapshot.ble_readiness, Readiness::Ready);
        assert_eq!(snapshot.advertised_address.as_deref(), Some("192.168.1.5:16021"));
        assert_eq!(snapshot.last_color, Some(Rgb::new(9, 9, 9)));
    }

    #[test]
    fn test_snapshot_serializes_with_camel_case_keys() {
        let json = serde_json::to_value(StatusSnapshot::idle(ServerState::Stopped)).unwrap();
        assert_eq!(json["serverState"], "stopped");
        assert_eq!(json["udpPacketCount"], 0);
        assert_eq!(json["bleReadiness"]["state"], "starting");
        assert_eq!(json["connectedDeviceCount"], 0);
        assert!(json["advertisedAddress"].is_null());
    }
}
