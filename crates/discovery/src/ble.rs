// Bluetooth discovery - advertises the service UUID while scanning for it
// Peers must do both at once to find each other symmetrically

use crate::permissions::{self, PermissionProvider, PermissionStatus};
use crate::platform::{self, TransportSupport};
use crate::registry::{SightingRegistry, SweepPolicy};
use crate::{DiscoveryConfig, DiscoveryError, DiscoveryStatus, Result, Transport};
use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use std::sync::Arc;
use storage::{LogCategory, LogStore};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Service UUID peers advertise and filter on. The advertisement carries
/// nothing else - no device name - to keep the broadcast payload small.
pub const SERVICE_UUID: Uuid = Uuid::from_bytes([
    0x12, 0x34, 0x56, 0x78, 0x12, 0x34, 0x56, 0x78, 0x12, 0x34, 0x56, 0x78, 0x12, 0x34, 0x56, 0x78,
]);

const EVENT_CHANNEL_CAPACITY: usize = 64;
const PERIPHERAL_POLL_SECS: u64 = 2;

/// Raw scan event emitted by a [`BleLink`] before registry ingestion.
#[derive(Debug, Clone)]
pub struct BleSighting {
    /// Device address of the advertiser
    pub address: String,
    /// Advertised local name, when the platform surfaces one
    pub name: Option<String>,
}

/// Raw advertise/scan primitives, one implementation per platform backend.
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Begin advertising the given service UUID.
    async fn start_advertising(&self, service: Uuid) -> Result<()>;

    /// Stop advertising.
    async fn stop_advertising(&self) -> Result<()>;

    /// Begin scanning; discovered advertisers are pushed into `events`.
    async fn start_scan(&self, service: Uuid, events: mpsc::Sender<BleSighting>) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// The local controller's own address, when the backend can surface
    /// it. Used to drop self-sightings; `None` skips that suppression.
    async fn local_address(&self) -> Option<String>;
}

/// btleplug-backed [`BleLink`].
pub struct BtleplugLink {
    adapter: Adapter,
    scanning: Arc<RwLock<bool>>,
    advertising: Arc<RwLock<bool>>,
    poll_shutdown: Arc<Notify>,
}

impl BtleplugLink {
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| DiscoveryError::Ble(format!("Failed to create BLE manager: {}", e)))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| DiscoveryError::Ble(format!("Failed to get BLE adapters: {}", e)))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| DiscoveryError::Ble("No BLE adapter found".to_string()))?;

        Ok(Self {
            adapter,
            scanning: Arc::new(RwLock::new(false)),
            advertising: Arc::new(RwLock::new(false)),
            poll_shutdown: Arc::new(Notify::new()),
        })
    }
}

#[async_trait]
impl BleLink for BtleplugLink {
    async fn start_advertising(&self, service: Uuid) -> Result<()> {
        let mut advertising = self.advertising.write().await;
        if *advertising {
            warn!("BLE advertising already active");
            return Ok(());
        }

        info!("Starting BLE advertising for service {}", service);

        // btleplug has no peripheral mode; shipping this path needs the
        // platform APIs directly (BluetoothLeAdvertiser on Android,
        // CBPeripheralManager on iOS, BlueZ D-Bus on Linux)
        warn!("BLE advertising not fully supported by btleplug - platform-specific implementation required");

        *advertising = true;
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        let mut advertising = self.advertising.write().await;
        if !*advertising {
            return Ok(());
        }
        info!("Stopping BLE advertising");
        *advertising = false;
        Ok(())
    }

    async fn start_scan(&self, service: Uuid, events: mpsc::Sender<BleSighting>) -> Result<()> {
        let mut scanning = self.scanning.write().await;
        if *scanning {
            warn!("BLE scan already active");
            return Ok(());
        }

        info!("Starting BLE scan");
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await
            .map_err(|e| DiscoveryError::Ble(format!("Failed to start BLE scan: {}", e)))?;

        *scanning = true;

        let adapter = self.adapter.clone();
        let scan_active = Arc::clone(&self.scanning);
        let shutdown = Arc::clone(&self.poll_shutdown);

        tokio::spawn(async move {
            let mut poll = interval(std::time::Duration::from_secs(PERIPHERAL_POLL_SECS));

            loop {
                tokio::select! {
                    _ = poll.tick() => {
                        if !*scan_active.read().await {
                            debug!("BLE scan no longer active, ending poll task");
                            break;
                        }

                        let peripherals = match adapter.peripherals().await {
                            Ok(peripherals) => peripherals,
                            Err(e) => {
                                debug!("Failed to list peripherals: {}", e);
                                continue;
                            }
                        };

                        for peripheral in peripherals {
                            let properties = match peripheral.properties().await {
                                Ok(Some(properties)) => properties,
                                Ok(None) => continue, // No advertisement data yet
                                Err(e) => {
                                    debug!("Failed to read peripheral properties: {}", e);
                                    continue;
                                }
                            };

                            if !properties.services.iter().any(|uuid| uuid == &service) {
                                continue; // Not our service
                            }

                            let sighting = BleSighting {
                                address: peripheral.address().to_string(),
                                name: properties.local_name.clone(),
                            };
                            if events.send(sighting).await.is_err() {
                                debug!("BLE event receiver dropped, ending poll task");
                                return;
                            }
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }

            debug!("BLE poll task terminated");
        });

        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut scanning = self.scanning.write().await;
        if !*scanning {
            return Ok(());
        }

        info!("Stopping BLE scan");
        // Flag first: the poll task stops on its next tick even when the
        // adapter call below fails
        *scanning = false;
        self.poll_shutdown.notify_waiters();
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| DiscoveryError::Ble(format!("Failed to stop BLE scan: {}", e)))?;

        Ok(())
    }

    async fn local_address(&self) -> Option<String> {
        // btleplug does not expose the controller's own address portably,
        // so self-sighting suppression is skipped with this backend
        None
    }
}

/// Bluetooth peer registry: gates on permissions, runs advertise+scan
/// through a [`BleLink`], feeds raw sightings into its registry, and
/// sweeps heartbeats on an interval.
///
/// `start_scanning` is idempotent, and `stop_scanning` leaves already
/// accumulated sightings in place - only the scan, the advertisement and
/// the periodic tasks are torn down.
pub struct BluetoothDiscovery {
    registry: Arc<SightingRegistry>,
    link: Arc<dyn BleLink>,
    permissions: Arc<dyn PermissionProvider>,
    logs: Arc<LogStore>,
    config: DiscoveryConfig,
    support: TransportSupport,
    status: Arc<RwLock<DiscoveryStatus>>,
    scanning: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
}

impl BluetoothDiscovery {
    pub fn new(
        link: Arc<dyn BleLink>,
        permissions: Arc<dyn PermissionProvider>,
        logs: Arc<LogStore>,
        config: DiscoveryConfig,
    ) -> Self {
        Self::with_support(link, permissions, logs, config, platform::bluetooth_support())
    }

    /// Build with an explicit support probe result instead of the
    /// compile-target default.
    pub fn with_support(
        link: Arc<dyn BleLink>,
        permissions: Arc<dyn PermissionProvider>,
        logs: Arc<LogStore>,
        config: DiscoveryConfig,
        support: TransportSupport,
    ) -> Self {
        Self {
            registry: Arc::new(SightingRegistry::new(Transport::Bluetooth)),
            link,
            permissions,
            logs,
            config,
            support,
            status: Arc::new(RwLock::new(DiscoveryStatus::Idle)),
            scanning: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Registry of currently-visible Bluetooth peers.
    pub fn registry(&self) -> Arc<SightingRegistry> {
        Arc::clone(&self.registry)
    }

    pub async fn status(&self) -> DiscoveryStatus {
        self.status.read().await.clone()
    }

    pub async fn is_scanning(&self) -> bool {
        *self.scanning.read().await
    }

    /// Start advertising and scanning.
    ///
    /// Fails up front on an unsupported platform or a permission denial;
    /// either way the observable status reflects the blocked state. A
    /// second call while already scanning is a no-op.
    pub async fn start_scanning(&self) -> Result<()> {
        if let TransportSupport::Unsupported(reason) = self.support {
            *self.status.write().await = DiscoveryStatus::Unsupported(reason.to_string());
            self.logs.log(LogCategory::Bluetooth, reason).await;
            return Err(DiscoveryError::Unsupported(reason.to_string()));
        }

        let mut scanning = self.scanning.write().await;
        if *scanning {
            warn!("Bluetooth discovery already scanning");
            return Ok(());
        }

        // Permission gate: nothing starts while any required grant is denied
        let required = permissions::required_permissions();
        let statuses = self.permissions.request_permissions(&required).await?;
        let denied: Vec<String> = statuses
            .iter()
            .filter(|(_, status)| **status == PermissionStatus::Denied)
            .map(|(permission, _)| permission.to_string())
            .collect();
        if !denied.is_empty() {
            let detail = denied.join(", ");
            *self.status.write().await = DiscoveryStatus::PermissionDenied(detail.clone());
            self.logs
                .log(
                    LogCategory::Bluetooth,
                    format!("Scan permission denied: {}", detail),
                )
                .await;
            return Err(DiscoveryError::PermissionDenied(detail));
        }

        info!("Starting Bluetooth discovery");
        self.logs
            .log(LogCategory::Scanning, "Bluetooth scan starting")
            .await;

        // Advertise first so peers running the same loop can see us while
        // we look for them; scanning proceeds even if advertising is
        // unavailable on this backend
        let advertising = match self.link.start_advertising(SERVICE_UUID).await {
            Ok(()) => true,
            Err(e) => {
                warn!("BLE advertising unavailable: {}", e);
                self.logs
                    .log(LogCategory::Bluetooth, format!("Advertising unavailable: {}", e))
                    .await;
                false
            }
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        if let Err(e) = self.link.start_scan(SERVICE_UUID, events_tx).await {
            *self.status.write().await = DiscoveryStatus::Error(e.to_string());
            self.logs
                .log(LogCategory::Error, format!("Failed to start BLE scan: {}", e))
                .await;
            return Err(e);
        }

        let local_address = self.link.local_address().await;
        self.spawn_event_pump(events_rx, local_address);
        self.spawn_sweep_task();

        *scanning = true;
        *self.status.write().await = if advertising {
            DiscoveryStatus::Advertising
        } else {
            DiscoveryStatus::Scanning
        };
        Ok(())
    }

    /// Stop the scan, the advertisement and the periodic tasks.
    ///
    /// Accumulated sightings stay in the registry; they age out through
    /// the sweep once scanning resumes.
    pub async fn stop_scanning(&self) -> Result<()> {
        let mut scanning = self.scanning.write().await;
        if !*scanning {
            debug!("No active Bluetooth scan to stop");
            return Ok(());
        }

        info!("Stopping Bluetooth discovery");
        *scanning = false;
        self.shutdown.notify_waiters();

        if let Err(e) = self.link.stop_scan().await {
            warn!("Failed to stop BLE scan cleanly: {}", e);
        }
        if let Err(e) = self.link.stop_advertising().await {
            warn!("Failed to stop BLE advertising cleanly: {}", e);
        }

        *self.status.write().await = DiscoveryStatus::Idle;
        self.logs
            .log(LogCategory::Scanning, "Bluetooth scan stopped")
            .await;
        Ok(())
    }

    fn spawn_event_pump(
        &self,
        mut events: mpsc::Receiver<BleSighting>,
        local_address: Option<String>,
    ) {
        let registry = Arc::clone(&self.registry);
        let scanning = Arc::clone(&self.scanning);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            loop {
                // The flag catches a shutdown signalled before this task
                // first parked in the select below
                if !*scanning.read().await {
                    debug!("Bluetooth discovery inactive, stopping event pump");
                    break;
                }

                tokio::select! {
                    maybe_event = events.recv() => {
                        match maybe_event {
                            Some(event) => {
                                if let Some(local) = &local_address {
                                    if event.address.eq_ignore_ascii_case(local) {
                                        debug!("Ignoring self-sighting: {}", event.address);
                                        continue;
                                    }
                                }
                                registry
                                    .record_sighting(&event.address, event.name.as_deref())
                                    .await;
                            }
                            None => {
                                debug!("BLE event channel closed");
                                break;
                            }
                        }
                    }
                    _ = shutdown.notified() => {
                        debug!("BLE event pump received shutdown signal");
                        break;
                    }
                }
            }

            debug!("BLE event pump terminated");
        });
    }

    fn spawn_sweep_task(&self) {
        let registry = Arc::clone(&self.registry);
        let scanning = Arc::clone(&self.scanning);
        let shutdown = Arc::clone(&self.shutdown);
        let policy = SweepPolicy::from_config(&self.config);
        let sweep_every = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut sweep_interval = interval(sweep_every);

            loop {
                tokio::select! {
                    _ = sweep_interval.tick() => {
                        if !*scanning.read().await {
                            debug!("Bluetooth discovery inactive, stopping sweep task");
                            break;
                        }
                        registry.sweep(&policy).await;
                    }
                    _ = shutdown.notified() => {
                        debug!("Bluetooth sweep task received shutdown signal");
                        break;
                    }
                }
            }

            debug!("Bluetooth sweep task terminated");
        });
    }
}
