//! DNS-SD advertisement of the emulated panel.
//!
//! Controllers browse for `_nanoleafapi._tcp` on the LAN and connect to the
//! first instance they see.  The record points at this host's IPv4 address
//! and HTTP port; the TXT record carries the fields controllers read before
//! they ever issue an HTTP request.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::api::{DEVICE_MODEL, DEVICE_NAME};

/// mDNS service type controllers browse for.
pub const SERVICE_TYPE: &str = "_nanoleafapi._tcp.local.";

/// Host name placed in the SRV record.
pub const HOST_NAME: &str = "melkoleaf.local.";

/// Base path of the HTTP API, published in the TXT record.
pub const API_PATH: &str = "/api/v1/";

const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(1);

/// Error type for the advertiser.
#[derive(Debug, Error)]
pub enum AdvertiseError {
    #[error("mDNS daemon unavailable: {0}")]
    Daemon(#[source] mdns_sd::Error),
    #[error("invalid service record: {0}")]
    Record(#[source] mdns_sd::Error),
    #[error("failed to register service: {0}")]
    Register(#[source] mdns_sd::Error),
}

/// A published service record.  Dropping it without calling
/// [`Advertisement::withdraw`] leaves the record to expire on its own.
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Advertisement {
    /// Publishes the panel at `ip:port` under `device_id`.
    pub fn publish(ip: Ipv4Addr, port: u16, device_id: &str) -> Result<Self, AdvertiseError> {
        let daemon = ServiceDaemon::new().map_err(AdvertiseError::Daemon)?;
        let properties = [("path", API_PATH), ("md", DEVICE_MODEL), ("id", device_id)];
        let service = ServiceInfo::new(
            SERVICE_TYPE,
            DEVICE_NAME,
            HOST_NAME,
            IpAddr::V4(ip),
            port,
            &properties[..],
        )
        .map_err(AdvertiseError::Record)?;
        let fullname = service.get_fullname().to_string();

        daemon.register(service).map_err(AdvertiseError::Register)?;
        info!("advertising {fullname} at {ip}:{port}");
        Ok(Self { daemon, fullname })
    }

    /// The full DNS-SD instance name.
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Sends goodbye packets and stops the daemon.  Failures are logged.
    pub fn withdraw(self) {
        match self.daemon.unregister(&self.fullname) {
            Ok(status) => match status.recv_timeout(UNREGISTER_TIMEOUT) {
                Ok(status) => debug!("unregistered {}: {status:?}", self.fullname),
                Err(e) => debug!("no unregister confirmation for {}: {e}", self.fullname),
            },
            Err(e) => warn!("failed to unregister {}: {e}", self.fullname),
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!("mDNS daemon shutdown: {e}");
        }
        info!("advertisement withdrawn");
    }
}

/// The IPv4 address this host uses to reach the LAN.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outbound interface.  Falls back to loopback when there is no route.
pub fn local_ipv4() -> Ipv4Addr {
    let detect = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    match detect() {
        Ok(IpAddr::V4(ip)) if !ip.is_unspecified() => ip,
        Ok(other) => {
            debug!("unexpected local address {other}; using loopback");
            Ipv4Addr::LOCALHOST
        }
        Err(e) => {
            debug!("no outbound route ({e}); using loopback");
            Ipv4Addr::LOCALHOST
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_is_fully_qualified() {
        assert!(SERVICE_TYPE.starts_with('_'));
        assert!(SERVICE_TYPE.ends_with(".local."));
        assert!(HOST_NAME.ends_with(".local."));
    }

    #[test]
    fn test_local_ipv4_is_never_unspecified() {
        assert!(!local_ipv4().is_unspecified());
    }
}
