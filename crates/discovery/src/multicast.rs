// WiFi discovery over UDP multicast. Every peer periodically announces
// itself to the group and records the announcements it hears; the source
// IP of a datagram doubles as the peer id.

use crate::platform::{self, TransportSupport};
use crate::registry::{SightingRegistry, SweepPolicy};
use crate::{DiscoveryConfig, DiscoveryError, DiscoveryStatus, Result, Transport};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use storage::{LogCategory, LogStore};
use tokio::net::UdpSocket;
use tokio::sync::{Notify, RwLock};
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_DATAGRAM_SIZE: usize = 2048;
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(250);
const SOCKET_WAIT_POLL: Duration = Duration::from_millis(500);

/// Display name of the transient sighting a self-test probe creates when
/// it loops back. Not a real peer; it ages out through the normal sweep.
pub const SELF_TEST_NAME: &str = "SELF_TEST";

/// Wire envelope for a discovery datagram.
///
/// Presence announcements carry the service namespace and a display name.
/// Self-test probes additionally set `test` and carry an opaque `testId`;
/// a probe that loops back is recorded as a transient sighting under that
/// id, which then ages out through the normal sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub service: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub test: bool,
    #[serde(rename = "testId", default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Announcement {
    fn presence(service: &str, name: &str) -> Self {
        Self {
            service: service.to_string(),
            name: name.to_string(),
            test: false,
            test_id: None,
        }
    }

    fn probe(service: &str, name: &str, test_id: &str) -> Self {
        Self {
            service: service.to_string(),
            name: name.to_string(),
            test: true,
            test_id: Some(test_id.to_string()),
        }
    }
}

/// WiFi peer registry over UDP multicast.
///
/// `start` is never fatal past the platform gate: a failed bind or group
/// join degrades the component and the announce task keeps trying to
/// rebuild the socket. `stop` tears down the socket and the periodic
/// tasks but leaves accumulated sightings in place.
pub struct MulticastDiscovery {
    registry: Arc<SightingRegistry>,
    logs: Arc<LogStore>,
    config: DiscoveryConfig,
    support: TransportSupport,
    display_name: Arc<RwLock<String>>,
    socket: Arc<RwLock<Option<Arc<UdpSocket>>>>,
    socket_changed: Arc<Notify>,
    status: Arc<RwLock<DiscoveryStatus>>,
    active: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
}

impl MulticastDiscovery {
    pub fn new(logs: Arc<LogStore>, config: DiscoveryConfig) -> Self {
        Self::with_support(logs, config, platform::multicast_support())
    }

    /// Build with an explicit support probe result instead of the
    /// compile-target default.
    pub fn with_support(
        logs: Arc<LogStore>,
        config: DiscoveryConfig,
        support: TransportSupport,
    ) -> Self {
        Self {
            registry: Arc::new(SightingRegistry::new(Transport::Wifi)),
            logs,
            config,
            support,
            display_name: Arc::new(RwLock::new(String::new())),
            socket: Arc::new(RwLock::new(None)),
            socket_changed: Arc::new(Notify::new()),
            status: Arc::new(RwLock::new(DiscoveryStatus::Idle)),
            active: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Registry of currently-visible WiFi peers.
    pub fn registry(&self) -> Arc<SightingRegistry> {
        Arc::clone(&self.registry)
    }

    pub async fn status(&self) -> DiscoveryStatus {
        self.status.read().await.clone()
    }

    pub async fn is_active(&self) -> bool {
        *self.active.read().await
    }

    /// Name carried in outgoing announcements. Takes effect on the next
    /// announce tick; the socket and the tasks stay up.
    pub async fn set_display_name(&self, name: impl Into<String>) {
        let name = name.into();
        info!("Display name changed to {}", name);
        *self.display_name.write().await = name;
    }

    /// Open the socket and start the announce, receive and sweep tasks.
    ///
    /// A second call while already running is a no-op.
    pub async fn start(&self) -> Result<()> {
        if let TransportSupport::Unsupported(reason) = self.support {
            *self.status.write().await = DiscoveryStatus::Unsupported(reason.to_string());
            self.logs.log(LogCategory::Wifi, reason).await;
            return Err(DiscoveryError::Unsupported(reason.to_string()));
        }

        let mut active = self.active.write().await;
        if *active {
            warn!("Multicast discovery already running");
            return Ok(());
        }

        info!(
            group = %self.config.multicast_addr,
            port = self.config.port,
            "Starting multicast discovery"
        );
        self.logs
            .log(LogCategory::Wifi, "WiFi discovery starting")
            .await;

        match Self::open_socket(&self.config) {
            Ok((socket, joined)) => {
                *self.socket.write().await = Some(Arc::new(socket));
                *self.status.write().await = if joined {
                    DiscoveryStatus::Scanning
                } else {
                    // Announcements still go out; we just may not hear peers
                    self.logs
                        .log(
                            LogCategory::Wifi,
                            "Multicast group join failed, receive path degraded",
                        )
                        .await;
                    DiscoveryStatus::Degraded("multicast group join failed".to_string())
                };
            }
            Err(e) => {
                // The announce task retries the socket, so a failed bind
                // degrades the component instead of killing it
                warn!("Failed to open discovery socket: {}", e);
                self.logs
                    .log(
                        LogCategory::Error,
                        format!("Failed to open discovery socket: {}", e),
                    )
                    .await;
                *self.status.write().await = DiscoveryStatus::Error(e.to_string());
            }
        }

        self.spawn_receive_task();
        self.spawn_announce_task();
        self.spawn_sweep_task();

        *active = true;
        Ok(())
    }

    /// Stop the periodic tasks and drop the socket.
    ///
    /// Accumulated sightings stay in the registry; they age out through
    /// the sweep once discovery resumes.
    pub async fn stop(&self) {
        let mut active = self.active.write().await;
        if !*active {
            debug!("No active multicast discovery to stop");
            return;
        }

        info!("Stopping multicast discovery");
        *active = false;
        self.shutdown.notify_waiters();

        *self.socket.write().await = None;
        *self.status.write().await = DiscoveryStatus::Idle;
        self.logs
            .log(LogCategory::Wifi, "WiFi discovery stopped")
            .await;
    }

    /// Send a loopback probe through the multicast group and return its
    /// test id right away.
    ///
    /// If the local network delivers multicast back to us, the echo shows
    /// up in the registry as a transient sighting keyed by the test id
    /// (named [`SELF_TEST_NAME`]); callers give the network a moment and
    /// then poll the registry for that id.
    pub async fn test_multicast_connectivity(&self) -> Result<String> {
        let test_id = new_test_id();
        let name = self.display_name.read().await.clone();
        let payload = serde_json::to_vec(&Announcement::probe(
            &self.config.service_id,
            &name,
            &test_id,
        ))?;

        let socket = self
            .socket
            .read()
            .await
            .clone()
            .ok_or_else(|| DiscoveryError::Socket("discovery socket not open".to_string()))?;

        let target = SocketAddr::from((self.config.multicast_addr, self.config.port));
        socket
            .send_to(&payload, target)
            .await
            .map_err(|e| DiscoveryError::Send(e.to_string()))?;

        info!("Multicast self-test {} sent", test_id);
        self.logs
            .log(LogCategory::Wifi, format!("Multicast self-test {} sent", test_id))
            .await;
        Ok(test_id)
    }

    /// Bind the discovery socket and join the group. Returns the socket
    /// plus whether the group join succeeded; loopback is enabled so our
    /// own probes come back to us.
    fn open_socket(config: &DiscoveryConfig) -> Result<(UdpSocket, bool)> {
        let std_socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port))?;

        let joined = match std_socket.join_multicast_v4(&config.multicast_addr, &Ipv4Addr::UNSPECIFIED)
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to join multicast group {}: {}",
                    config.multicast_addr, e
                );
                false
            }
        };

        if let Err(e) = std_socket.set_multicast_loop_v4(true) {
            warn!("Failed to enable multicast loopback: {}", e);
        }

        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;
        Ok((socket, joined))
    }

    fn spawn_receive_task(&self) {
        let registry = Arc::clone(&self.registry);
        let socket_slot = Arc::clone(&self.socket);
        let socket_changed = Arc::clone(&self.socket_changed);
        let active = Arc::clone(&self.active);
        let shutdown = Arc::clone(&self.shutdown);
        let display_name = Arc::clone(&self.display_name);
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                if !*active.read().await {
                    debug!("Multicast discovery inactive, stopping receive task");
                    break;
                }

                let socket = socket_slot.read().await.clone();
                match socket {
                    Some(socket) => {
                        tokio::select! {
                            received = socket.recv_from(&mut buf) => {
                                match received {
                                    Ok((len, source)) => {
                                        ingest_datagram(
                                            &buf[..len],
                                            source,
                                            &config,
                                            &registry,
                                            &display_name,
                                        )
                                        .await;
                                    }
                                    Err(e) => {
                                        debug!("Discovery socket receive error: {}", e);
                                        sleep(RECEIVE_ERROR_BACKOFF).await;
                                    }
                                }
                            }
                            _ = socket_changed.notified() => {
                                debug!("Discovery socket replaced, re-reading");
                            }
                            _ = shutdown.notified() => {
                                debug!("Receive task received shutdown signal");
                                break;
                            }
                        }
                    }
                    None => {
                        // No socket yet; wait for the announce task to build one
                        tokio::select! {
                            _ = socket_changed.notified() => {}
                            _ = sleep(SOCKET_WAIT_POLL) => {}
                            _ = shutdown.notified() => {
                                debug!("Receive task received shutdown signal");
                                break;
                            }
                        }
                    }
                }
            }

            debug!("Receive task terminated");
        });
    }

    fn spawn_announce_task(&self) {
        let socket_slot = Arc::clone(&self.socket);
        let socket_changed = Arc::clone(&self.socket_changed);
        let status = Arc::clone(&self.status);
        let active = Arc::clone(&self.active);
        let shutdown = Arc::clone(&self.shutdown);
        let logs = Arc::clone(&self.logs);
        let display_name = Arc::clone(&self.display_name);
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut announce = interval(config.announce_interval);
            let target = SocketAddr::from((config.multicast_addr, config.port));

            loop {
                tokio::select! {
                    _ = announce.tick() => {
                        if !*active.read().await {
                            debug!("Multicast discovery inactive, stopping announce task");
                            break;
                        }

                        let socket = socket_slot.read().await.clone();
                        let socket = match socket {
                            Some(socket) => socket,
                            None => {
                                rebuild_socket(&config, &socket_slot, &socket_changed, &status, &logs)
                                    .await;
                                continue;
                            }
                        };

                        let name = display_name.read().await.clone();
                        let payload = match serde_json::to_vec(&Announcement::presence(
                            &config.service_id,
                            &name,
                        )) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!("Failed to encode announcement: {}", e);
                                continue;
                            }
                        };

                        if let Err(e) = socket.send_to(&payload, target).await {
                            warn!("Announcement send failed, retrying: {}", e);
                            // One retry after a pause, then give up on this
                            // socket and rebuild it
                            sleep(config.send_retry_delay).await;
                            if !*active.read().await {
                                break;
                            }
                            if let Err(e) = socket.send_to(&payload, target).await {
                                warn!("Announcement retry failed, rebuilding socket: {}", e);
                                logs.log(
                                    LogCategory::Wifi,
                                    format!("Announcement retry failed: {}", e),
                                )
                                .await;
                                rebuild_socket(&config, &socket_slot, &socket_changed, &status, &logs)
                                    .await;
                            }
                        }
                    }
                    _ = shutdown.notified() => {
                        debug!("Announce task received shutdown signal");
                        break;
                    }
                }
            }

            debug!("Announce task terminated");
        });
    }

    fn spawn_sweep_task(&self) {
        let registry = Arc::clone(&self.registry);
        let active = Arc::clone(&self.active);
        let shutdown = Arc::clone(&self.shutdown);
        let policy = SweepPolicy::from_config(&self.config);
        let sweep_every = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut sweep_interval = interval(sweep_every);

            loop {
                tokio::select! {
                    _ = sweep_interval.tick() => {
                        if !*active.read().await {
                            debug!("Multicast discovery inactive, stopping sweep task");
                            break;
                        }
                        registry.sweep(&policy).await;
                    }
                    _ = shutdown.notified() => {
                        debug!("Multicast sweep task received shutdown signal");
                        break;
                    }
                }
            }

            debug!("Multicast sweep task terminated");
        });
    }
}

/// Replace the socket in `slot` with a freshly-bound one and wake the
/// receive task so it picks the replacement up.
async fn rebuild_socket(
    config: &DiscoveryConfig,
    slot: &RwLock<Option<Arc<UdpSocket>>>,
    changed: &Notify,
    status: &RwLock<DiscoveryStatus>,
    logs: &LogStore,
) {
    match MulticastDiscovery::open_socket(config) {
        Ok((socket, joined)) => {
            *slot.write().await = Some(Arc::new(socket));
            changed.notify_waiters();
            *status.write().await = if joined {
                DiscoveryStatus::Scanning
            } else {
                DiscoveryStatus::Degraded("multicast group join failed".to_string())
            };
            info!("Discovery socket rebuilt");
            logs.log(LogCategory::Wifi, "Discovery socket rebuilt").await;
        }
        Err(e) => {
            warn!("Socket rebuild failed: {}", e);
            *status.write().await = DiscoveryStatus::Error(e.to_string());
        }
    }
}

/// Parse one datagram and apply it.
///
/// Malformed payloads and foreign services are dropped quietly; anything
/// can broadcast to the group. Self-test probes become transient
/// sightings keyed by their test id instead of real peers, and our own
/// presence announcements (matched by display name, since loopback hands
/// them back to us) are ignored.
async fn ingest_datagram(
    datagram: &[u8],
    source: SocketAddr,
    config: &DiscoveryConfig,
    registry: &SightingRegistry,
    local_name: &RwLock<String>,
) {
    let announcement: Announcement = match serde_json::from_slice(datagram) {
        Ok(announcement) => announcement,
        Err(e) => {
            debug!("Ignoring malformed datagram from {}: {}", source, e);
            return;
        }
    };

    if announcement.service != config.service_id {
        debug!(
            "Ignoring announcement for foreign service {}",
            announcement.service
        );
        return;
    }

    if announcement.test {
        // The echo proves to its sender that the group delivers locally;
        // the entry ages out through the sweep like everything else
        if let Some(test_id) = announcement.test_id {
            debug!("Self-test probe received: {}", test_id);
            registry
                .record_sighting(&test_id, Some(SELF_TEST_NAME))
                .await;
        }
        return;
    }

    if announcement.name == *local_name.read().await {
        debug!("Ignoring own announcement");
        return;
    }

    let peer_id = source.ip().to_string();
    registry
        .record_sighting(&peer_id, Some(&announcement.name))
        .await;
}

/// Short opaque id tying a self-test probe to its echo.
fn new_test_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
