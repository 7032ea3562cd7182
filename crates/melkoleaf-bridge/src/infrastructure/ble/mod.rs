//! Bluetooth LE transport for MELK strips, built on `btleplug`.
//!
//! Only the first adapter reported by the platform is used.  Connections are
//! plain GATT writes to the strip's command characteristic; nothing is read
//! back from the device.

pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use melkoleaf_core::DeviceAddress;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::application::registry::{
    is_melk_name, DeviceLink, DiscoveredDevice, LedTransport, TransportError,
};

/// Command characteristic exposed by MELK strips.
pub const MELK_WRITE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb);

/// Scan window used when a configured device is not yet known to the adapter.
const CONNECT_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// The system's Bluetooth LE central.
pub struct BleTransport {
    adapter: Adapter,
}

impl BleTransport {
    /// Opens the first available adapter.
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(backend)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(backend)?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;
        if let Ok(info) = adapter.adapter_info().await {
            info!("using Bluetooth adapter {info}");
        }
        Ok(Self { adapter })
    }

    async fn scan_for(&self, window: Duration) -> Result<(), TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(backend)?;
        tokio::time::sleep(window).await;
        self.adapter.stop_scan().await.map_err(backend)
    }

    async fn find(&self, address: &DeviceAddress) -> Result<Option<Peripheral>, TransportError> {
        let wanted = BDAddr::from(address.octets());
        Ok(self
            .adapter
            .peripherals()
            .await
            .map_err(backend)?
            .into_iter()
            .find(|p| p.address() == wanted))
    }
}

#[async_trait]
impl LedTransport for BleTransport {
    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>, TransportError> {
        self.scan_for(timeout).await?;

        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await.map_err(backend)? {
            let Some(properties) = peripheral.properties().await.map_err(backend)? else {
                continue;
            };
            let Some(name) = properties.local_name else {
                continue;
            };
            if !is_melk_name(&name) {
                trace!("ignoring {} ({name})", properties.address);
                continue;
            }
            let address = DeviceAddress::from_octets(properties.address.into_inner());
            debug!("found {name} at {address}");
            found.push(DiscoveredDevice {
                address,
                name: Some(name),
            });
        }
        Ok(found)
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<Arc<dyn DeviceLink>, TransportError> {
        let peripheral = match self.find(address).await? {
            Some(p) => p,
            None => {
                self.scan_for(CONNECT_SCAN_WINDOW).await?;
                self.find(address)
                    .await?
                    .ok_or(TransportError::NotFound(*address))?
            }
        };

        if !peripheral.is_connected().await.map_err(backend)? {
            peripheral.connect().await.map_err(backend)?;
        }
        peripheral.discover_services().await.map_err(backend)?;

        let characteristic = writable_characteristic(&peripheral)
            .ok_or(TransportError::NoWritableCharacteristic(*address))?;
        debug!("{address}: writing to characteristic {}", characteristic.uuid);

        Ok(Arc::new(BleLink {
            peripheral,
            characteristic,
        }))
    }
}

/// The strip's command characteristic, or any writable one if it is absent.
fn writable_characteristic(peripheral: &Peripheral) -> Option<Characteristic> {
    let characteristics = peripheral.characteristics();
    characteristics
        .iter()
        .find(|c| c.uuid == MELK_WRITE_CHARACTERISTIC)
        .or_else(|| {
            characteristics.iter().find(|c| {
                c.properties
                    .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
            })
        })
        .cloned()
}

struct BleLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

#[async_trait]
impl DeviceLink for BleLink {
    async fn write(&self, command: &[u8]) -> Result<(), TransportError> {
        let write_type = if self
            .characteristic
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        self.peripheral
            .write(&self.characteristic, command, write_type)
            .await
            .map_err(backend)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await.map_err(backend)
    }
}

fn backend(e: btleplug::Error) -> TransportError {
    TransportError::Backend(e.to_string())
}
