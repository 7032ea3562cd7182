//! In-memory transport for tests and `--simulate`.
//!
//! Behaves like a room full of strips without any Bluetooth hardware: scans
//! return whatever was advertised, connections succeed unless told to fail,
//! and every write is recorded so tests can assert on the exact bytes each
//! strip received.  Clones share state, so a test can keep one handle while
//! the registry owns another.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use melkoleaf_core::DeviceAddress;
use tracing::trace;

use crate::application::registry::{
    is_melk_name, DeviceLink, DiscoveredDevice, LedTransport, TransportError,
};

/// Name given to devices created by [`MockTransport::with_devices`].
pub const MOCK_DEVICE_NAME: &str = "MELK-OA (simulated)";

#[derive(Default)]
struct MockState {
    advertised: Vec<DiscoveredDevice>,
    /// Remaining connect failures per device; `u32::MAX` never succeeds.
    connect_failures: HashMap<DeviceAddress, u32>,
    connect_attempts: HashMap<DeviceAddress, u32>,
    connect_delays: HashMap<DeviceAddress, Duration>,
    failing_writes: HashSet<DeviceAddress>,
    write_delays: HashMap<DeviceAddress, Duration>,
    writes: Vec<(DeviceAddress, Vec<u8>)>,
    write_times: Vec<(DeviceAddress, Instant)>,
    disconnects: HashMap<DeviceAddress, u32>,
}

/// A recording, scriptable [`LedTransport`].
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport on which every address in `addresses` is advertised.
    pub fn with_devices(addresses: &[DeviceAddress]) -> Self {
        let transport = Self::new();
        for address in addresses {
            transport.advertise(*address, MOCK_DEVICE_NAME);
        }
        transport
    }

    /// Makes `address` visible to scans under `name`.
    pub fn advertise(&self, address: DeviceAddress, name: &str) {
        self.lock().advertised.push(DiscoveredDevice {
            address,
            name: Some(name.to_string()),
        });
    }

    /// The next `times` connects to `address` fail.  `0` clears the failure.
    pub fn fail_connects(&self, address: DeviceAddress, times: u32) {
        self.lock().connect_failures.insert(address, times);
    }

    /// Delays every connect to `address`.  A long delay stands in for a
    /// peripheral that never answers.
    pub fn delay_connects(&self, address: DeviceAddress, delay: Duration) {
        self.lock().connect_delays.insert(address, delay);
    }

    /// Makes every write to `address` fail (or succeed again).
    pub fn fail_writes(&self, address: DeviceAddress, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing_writes.insert(address);
        } else {
            state.failing_writes.remove(&address);
        }
    }

    /// Delays every write to `address`.
    pub fn delay_writes(&self, address: DeviceAddress, delay: Duration) {
        self.lock().write_delays.insert(address, delay);
    }

    /// All successful writes, in order.
    pub fn writes(&self) -> Vec<(DeviceAddress, Vec<u8>)> {
        self.lock().writes.clone()
    }

    /// Successful writes to one device, in order.
    pub fn writes_to(&self, address: DeviceAddress) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .iter()
            .filter(|(a, _)| *a == address)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    /// When each successful write to `address` landed, in order.
    pub fn write_times_to(&self, address: DeviceAddress) -> Vec<Instant> {
        self.lock()
            .write_times
            .iter()
            .filter(|(a, _)| *a == address)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn connect_attempts(&self, address: DeviceAddress) -> u32 {
        self.lock().connect_attempts.get(&address).copied().unwrap_or(0)
    }

    pub fn disconnects(&self, address: DeviceAddress) -> u32 {
        self.lock().disconnects.get(&address).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }
}

#[async_trait]
impl LedTransport for MockTransport {
    async fn scan(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>, TransportError> {
        Ok(self
            .lock()
            .advertised
            .iter()
            .filter(|d| d.name.as_deref().is_some_and(is_melk_name))
            .cloned()
            .collect())
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<Arc<dyn DeviceLink>, TransportError> {
        let delay = {
            let mut state = self.lock();
            *state.connect_attempts.entry(*address).or_insert(0) += 1;
            state.connect_delays.get(address).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(remaining) = state.connect_failures.get_mut(address) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(TransportError::Backend("simulated connect failure".to_string()));
            }
        }
        if !state.advertised.iter().any(|d| d.address == *address) {
            return Err(TransportError::NotFound(*address));
        }

        Ok(Arc::new(MockLink {
            address: *address,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockLink {
    address: DeviceAddress,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl DeviceLink for MockLink {
    async fn write(&self, command: &[u8]) -> Result<(), TransportError> {
        let delay = lock(&self.state).write_delays.get(&self.address).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if state.failing_writes.contains(&self.address) {
            return Err(TransportError::Backend("simulated write failure".to_string()));
        }
        trace!(device = %self.address, bytes = ?command, "simulated write");
        state.writes.push((self.address, command.to_vec()));
        state.write_times.push((self.address, Instant::now()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        *lock(&self.state).disconnects.entry(self.address).or_insert(0) += 1;
        Ok(())
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
