//! Device registry: the set of known strips and their connection state.
//!
//! The registry is the only owner of connection handles.  Discovery and the
//! reconnect supervisor add and replace handles; the broadcaster borrows a
//! snapshot of them for one cycle; observers see [`DeviceSnapshot`] values.
//!
//! # Connection lifecycle
//!
//! ```text
//!            connect ok                      write fails
//! (new) ───────────────► Connected ─────────────────────────┐
//!   │                        ▲                              ▼
//!   │ connect fails          │ retry ok              Disconnected, retry at
//!   └───────────────────────►┴──────────────────────  now + backoff(attempts)
//!                                                           │
//!                               attempts == max_attempts    ▼
//!                                                   Disconnected, idle until rescan
//! ```
//!
//! # Locking
//!
//! The map sits behind a `tokio::sync::RwLock`.  No lock is ever held across
//! Bluetooth I/O: callers copy out the `Arc<dyn DeviceLink>` handles they need,
//! release the lock, and only then talk to the device.  A concurrent add or
//! remove therefore never races with an in-flight write; the write simply
//! finishes on the handle it already holds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use melkoleaf_core::{DeviceAddress, Rgb, WireCommand};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::context::ShutdownSignal;
use crate::domain::config::{DeviceSource, RetryPolicy};

/// Advertisement names containing this marker are MELK strips.
pub const MELK_NAME_MARKER: &str = "MELK";

/// Pause between the two initialisation commands.
const INIT_STEP_DELAY: Duration = Duration::from_millis(200);

/// How often the reconnect supervisor looks for due retries.
const RECONNECT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// `true` if an advertised name identifies a MELK strip.
pub fn is_melk_name(name: &str) -> bool {
    name.to_ascii_uppercase().contains(MELK_NAME_MARKER)
}

// ── Transport seam ────────────────────────────────────────────────────────────

/// Errors reported by a transport or a device link.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no Bluetooth adapter available")]
    NoAdapter,
    #[error("device {0} not found")]
    NotFound(DeviceAddress),
    #[error("device {0} exposes no writable characteristic")]
    NoWritableCharacteristic(DeviceAddress),
    #[error("bluetooth error: {0}")]
    Backend(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A strip seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: DeviceAddress,
    pub name: Option<String>,
}

/// An open connection to one strip.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Writes one encoded command.
    async fn write(&self, command: &[u8]) -> Result<(), TransportError>;

    /// Closes the connection.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// A way of finding and connecting to strips.
///
/// The Bluetooth LE implementation lives in `infrastructure::ble`; tests and
/// `--simulate` use the in-memory `infrastructure::ble::mock::MockTransport`.
#[async_trait]
pub trait LedTransport: Send + Sync {
    /// Scans for `timeout` and returns every MELK strip seen.
    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>, TransportError>;

    /// Opens a connection to `address`.
    async fn connect(&self, address: &DeviceAddress) -> Result<Arc<dyn DeviceLink>, TransportError>;
}

// ── Observable state ──────────────────────────────────────────────────────────

/// Overall readiness of the downstream side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum Readiness {
    /// Discovery has not finished yet.
    Starting,
    /// At least one strip is connected.
    Ready,
    /// No strip is connected; the reason says why.
    NotReady(String),
}

/// Read-only view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub connected: bool,
    pub last_color_sent: Option<Rgb>,
    pub reconnect_attempts: u32,
    pub retry_scheduled: bool,
    pub last_error: Option<String>,
}

struct DeviceEntry {
    name: Option<String>,
    link: Option<Arc<dyn DeviceLink>>,
    last_color_sent: Option<Rgb>,
    attempts: u32,
    next_retry_at: Option<Instant>,
    last_error: Option<String>,
    /// A connect attempt is in flight.
    connecting: bool,
}

impl DeviceEntry {
    fn new(name: Option<String>) -> Self {
        Self {
            name,
            link: None,
            last_color_sent: None,
            attempts: 0,
            next_retry_at: None,
            last_error: None,
            connecting: false,
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// In-memory registry of every strip the bridge knows about.  One entry per
/// hardware address; nothing is persisted.
pub struct DeviceRegistry {
    transport: Arc<dyn LedTransport>,
    retry: RetryPolicy,
    power_on_at_connect: bool,
    devices: RwLock<HashMap<DeviceAddress, DeviceEntry>>,
    readiness: Mutex<Readiness>,
    last_source: Mutex<Option<DeviceSource>>,
}

impl DeviceRegistry {
    pub fn new(
        transport: Arc<dyn LedTransport>,
        retry: RetryPolicy,
        power_on_at_connect: bool,
    ) -> Self {
        Self {
            transport,
            retry,
            power_on_at_connect,
            devices: RwLock::new(HashMap::new()),
            readiness: Mutex::new(Readiness::Starting),
            last_source: Mutex::new(None),
        }
    }

    /// Finds candidates from `source` and connects all of them in parallel.
    ///
    /// Candidates that are connected or already being connected are
    /// skipped; every other candidate starts with a fresh retry budget.
    /// Devices that fail to connect within the connect timeout stay in the
    /// registry, disconnected, with a retry scheduled.
    ///
    /// Returns the number of connected devices afterwards.
    pub async fn discover(&self, source: &DeviceSource) -> usize {
        self.set_readiness(Readiness::Starting);
        *lock(&self.last_source) = Some(source.clone());

        let candidates = match source {
            DeviceSource::Configured(addresses) => {
                info!("connecting to {} configured device(s)", addresses.len());
                addresses
                    .iter()
                    .map(|&address| DiscoveredDevice {
                        address,
                        name: None,
                    })
                    .collect::<Vec<_>>()
            }
            DeviceSource::Scan { timeout } => {
                info!("scanning for MELK devices for {timeout:?}");
                match self.transport.scan(*timeout).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!("device scan failed: {e}");
                        self.set_readiness(Readiness::NotReady(format!("scan failed: {e}")));
                        return self.connected_count().await;
                    }
                }
            }
        };

        let pending: Vec<DeviceAddress> = {
            let mut devices = self.devices.write().await;
            candidates
                .into_iter()
                .filter_map(|candidate| {
                    let entry = devices
                        .entry(candidate.address)
                        .or_insert_with(|| DeviceEntry::new(candidate.name.clone()));
                    if candidate.name.is_some() {
                        entry.name = candidate.name;
                    }
                    if entry.link.is_some() || entry.connecting {
                        return None;
                    }
                    entry.attempts = 0;
                    entry.next_retry_at = None;
                    entry.connecting = true;
                    Some(candidate.address)
                })
                .collect()
        };

        join_all(pending.iter().map(|address| self.connect_device(*address))).await;

        let (connected, total) = self.refresh_readiness().await;
        info!("discovery finished: {connected}/{total} device(s) connected");
        connected
    }

    /// Discovers `source` while the reconnect supervisor already runs, so a
    /// strip that failed its first connect is retried even while another
    /// is still connecting.  Returns when `shutdown` fires.
    pub async fn maintain(&self, source: &DeviceSource, shutdown: ShutdownSignal) {
        let discovery = async {
            tokio::select! {
                _ = shutdown.wait() => {}
                connected = self.discover(source) => {
                    if connected == 0 {
                        warn!("no MELK device connected; colors will be dropped until one is");
                    }
                }
            }
        };
        tokio::join!(discovery, self.run_reconnect_loop(shutdown.clone()));
    }

    /// Repeats the last discovery.  Devices that exhausted their retries get
    /// a fresh budget.
    pub async fn rescan(&self) -> usize {
        let source = lock(&self.last_source).clone();
        match source {
            Some(source) => self.discover(&source).await,
            None => self.connected_count().await,
        }
    }

    /// Reconnects every disconnected device whose retry time has passed.
    ///
    /// Returns how many of them connected.
    pub async fn retry_due(&self) -> usize {
        let due = self.take_due().await;
        if due.is_empty() {
            return 0;
        }

        let results = join_all(due.iter().map(|address| self.connect_device(*address))).await;
        self.refresh_readiness().await;
        results.into_iter().filter(|ok| *ok).count()
    }

    /// Retries due devices until `shutdown` fires.
    ///
    /// Each attempt runs on its own, so a strip that takes the whole connect
    /// timeout never holds back the retries of the others.
    pub async fn run_reconnect_loop(&self, shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(RECONNECT_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut in_flight = FuturesUnordered::new();
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    for address in self.take_due().await {
                        in_flight.push(self.connect_device(address));
                    }
                }
                Some(_) = in_flight.next(), if !in_flight.is_empty() => {
                    self.refresh_readiness().await;
                }
            }
        }
        debug!("reconnect supervisor stopped");
    }

    /// Marks a device disconnected after `link` failed a write and schedules
    /// a reconnect.  The handle is closed in the background.
    ///
    /// Nothing happens if the device has been reconnected since `link` was
    /// handed out.
    pub async fn mark_failed(&self, address: DeviceAddress, link: &Arc<dyn DeviceLink>, reason: &str) {
        let old_link = {
            let mut devices = self.devices.write().await;
            let Some(entry) = devices.get_mut(&address) else {
                return;
            };
            if !entry.link.as_ref().is_some_and(|current| Arc::ptr_eq(current, link)) {
                debug!("ignoring failure of a stale link to {address}: {reason}");
                return;
            }
            entry.attempts = 0;
            entry.next_retry_at = Some(Instant::now() + self.retry.backoff_for(1));
            entry.last_error = Some(reason.to_string());
            warn!("device {address} failed: {reason}; reconnect scheduled");
            entry.link.take()
        };

        if let Some(link) = old_link {
            close_in_background(address, link);
        }
    }

    /// Remembers the last color successfully written to `address`.
    pub async fn record_sent(&self, address: DeviceAddress, color: Rgb) {
        if let Some(entry) = self.devices.write().await.get_mut(&address) {
            entry.last_color_sent = Some(color);
        }
    }

    /// Handles of every connected device, copied out under the read lock.
    pub async fn connected_links(&self) -> Vec<(DeviceAddress, Arc<dyn DeviceLink>)> {
        self.devices
            .read()
            .await
            .iter()
            .filter_map(|(address, entry)| entry.link.clone().map(|link| (*address, link)))
            .collect()
    }

    pub async fn connected_count(&self) -> usize {
        self.devices
            .read()
            .await
            .values()
            .filter(|e| e.link.is_some())
            .count()
    }

    /// Snapshot of every entry, ordered by address.
    pub async fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let devices = self.devices.read().await;
        let mut snapshot: Vec<DeviceSnapshot> = devices
            .iter()
            .map(|(address, entry)| DeviceSnapshot {
                address: *address,
                name: entry.name.clone(),
                connected: entry.link.is_some(),
                last_color_sent: entry.last_color_sent,
                reconnect_attempts: entry.attempts,
                retry_scheduled: entry.next_retry_at.is_some(),
                last_error: entry.last_error.clone(),
            })
            .collect();
        snapshot.sort_by_key(|d| d.address);
        snapshot
    }

    pub fn readiness(&self) -> Readiness {
        lock(&self.readiness).clone()
    }

    /// Closes every connection and cancels pending retries.
    pub async fn disconnect_all(&self) {
        let links: Vec<(DeviceAddress, Arc<dyn DeviceLink>)> = {
            let mut devices = self.devices.write().await;
            devices
                .iter_mut()
                .filter_map(|(address, entry)| {
                    entry.next_retry_at = None;
                    entry.link.take().map(|link| (*address, link))
                })
                .collect()
        };

        let count = links.len();
        join_all(links.into_iter().map(|(address, link)| async move {
            if let Err(e) = link.disconnect().await {
                warn!("failed to disconnect {address}: {e}");
            }
        }))
        .await;

        self.set_readiness(Readiness::NotReady("disconnected".to_string()));
        info!("disconnected {count} device(s)");
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Disconnected devices whose retry time has passed, marked as
    /// connecting so the next poll skips them.
    async fn take_due(&self) -> Vec<DeviceAddress> {
        let now = Instant::now();
        let mut devices = self.devices.write().await;
        let due: Vec<DeviceAddress> = devices
            .iter_mut()
            .filter(|(_, e)| {
                e.link.is_none() && !e.connecting && e.next_retry_at.is_some_and(|at| at <= now)
            })
            .map(|(address, entry)| {
                entry.next_retry_at = None;
                entry.connecting = true;
                *address
            })
            .collect();
        if !due.is_empty() {
            debug!("retrying {} device(s)", due.len());
        }
        due
    }

    /// Connects one device within the connect timeout and updates its
    /// entry.  Returns `true` on success.
    async fn connect_device(&self, address: DeviceAddress) -> bool {
        let limit = self.retry.connect_timeout;
        let deadline = Instant::now() + limit;
        let result = match tokio::time::timeout_at(deadline, self.transport.connect(&address)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        };
        let result = match result {
            Ok(link) if self.power_on_at_connect => {
                if tokio::time::timeout_at(deadline, initialise(address, link.as_ref()))
                    .await
                    .is_ok()
                {
                    Ok(link)
                } else {
                    close_in_background(address, link);
                    Err(TransportError::Timeout(limit))
                }
            }
            other => other,
        };

        match result {
            Ok(link) => {
                let mut devices = self.devices.write().await;
                let entry = devices
                    .entry(address)
                    .or_insert_with(|| DeviceEntry::new(None));
                entry.connecting = false;
                entry.link = Some(link);
                entry.attempts = 0;
                entry.next_retry_at = None;
                entry.last_error = None;
                entry.last_color_sent = None;
                info!("connected to {address}");
                true
            }
            Err(e) => {
                let mut devices = self.devices.write().await;
                let entry = devices
                    .entry(address)
                    .or_insert_with(|| DeviceEntry::new(None));
                entry.connecting = false;
                entry.attempts += 1;
                entry.last_error = Some(e.to_string());
                if self.retry.exhausted(entry.attempts) {
                    entry.next_retry_at = None;
                    warn!(
                        "giving up on {address} after {} attempt(s): {e}; waiting for rescan",
                        entry.attempts
                    );
                } else {
                    let delay = self.retry.backoff_for(entry.attempts);
                    entry.next_retry_at = Some(Instant::now() + delay);
                    warn!("failed to connect to {address}: {e}; retrying in {delay:?}");
                }
                false
            }
        }
    }

    /// Recomputes readiness from the map; returns `(connected, total)`.
    async fn refresh_readiness(&self) -> (usize, usize) {
        let (connected, total) = {
            let devices = self.devices.read().await;
            let connected = devices.values().filter(|e| e.link.is_some()).count();
            (connected, devices.len())
        };
        let readiness = if connected > 0 {
            Readiness::Ready
        } else if total == 0 {
            Readiness::NotReady("no MELK devices found".to_string())
        } else {
            Readiness::NotReady(format!("none of {total} device(s) connected"))
        };
        self.set_readiness(readiness);
        (connected, total)
    }

    fn set_readiness(&self, readiness: Readiness) {
        *lock(&self.readiness) = readiness;
    }
}

/// Best-effort "power on, full brightness".  Failures are only logged; a
/// strip that ignores these still shows streamed colors.
async fn initialise(address: DeviceAddress, link: &dyn DeviceLink) {
    if let Err(e) = link.write(&WireCommand::PowerOn.encode()).await {
        warn!("power-on for {address} failed: {e}");
        return;
    }
    tokio::time::sleep(INIT_STEP_DELAY).await;
    if let Err(e) = link.write(&WireCommand::brightness(100).encode()).await {
        warn!("brightness init for {address} failed: {e}");
    }
}

fn close_in_background(address: DeviceAddress, link: Arc<dyn DeviceLink>) {
    tokio::spawn(async move {
        if let Err(e) = link.disconnect().await {
            debug!("closing link to {address}: {e}");
        }
    });
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
