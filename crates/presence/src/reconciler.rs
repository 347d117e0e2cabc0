// Presence reconciliation: live sighting events flip matching contacts
// online immediately, and a periodic sweep flips quiet ones offline.

use crate::store::AppStateStore;
use anyhow::Result as AnyResult;
use discovery::{SightingEvent, SightingRegistry, Transport};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Timing knobs for presence reconciliation.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// How often the presence sweep runs
    pub reconcile_interval: Duration,
    /// Quiet time after which an online contact is flipped offline
    pub offline_after: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(5),
            offline_after: Duration::from_secs(15),
        }
    }
}

impl PresenceConfig {
    pub fn from_env() -> AnyResult<Self> {
        Ok(Self {
            reconcile_interval: millis_var("PRESENCE_RECONCILE_INTERVAL_MS", 5_000)?,
            offline_after: millis_var("PRESENCE_OFFLINE_AFTER_MS", 15_000)?,
        })
    }
}

fn millis_var(name: &str, default_ms: u64) -> AnyResult<Duration> {
    let ms: u64 = env::var(name)
        .unwrap_or_else(|_| default_ms.to_string())
        .parse()?;
    Ok(Duration::from_millis(ms))
}

/// Drives contact presence from live sighting events.
///
/// One consumer task per subscribed registry marks matching contacts
/// seen as events arrive; one sweep task flips quiet contacts offline.
/// All tasks share one shutdown signal, so `stop` tears the whole group
/// down together. A sighting eviction does not directly flip a contact
/// offline; the sweep owns that transition.
pub struct PresenceReconciler {
    store: Arc<AppStateStore>,
    config: PresenceConfig,
    running: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
}

impl PresenceReconciler {
    pub fn new(store: Arc<AppStateStore>, config: PresenceConfig) -> Self {
        Self {
            store,
            config,
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Subscribe to each registry and start the sweep. A second call
    /// while already running is a no-op.
    pub async fn start(&self, registries: &[Arc<SightingRegistry>]) {
        let mut running = self.running.write().await;
        if *running {
            warn!("Presence reconciler already running");
            return;
        }

        info!("Starting presence reconciler");
        for registry in registries {
            self.spawn_event_consumer(registry.subscribe(), registry.transport());
        }
        self.spawn_sweep_task();
        *running = true;
    }

    /// Stop the consumers and the sweep together.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        if !*running {
            debug!("No running presence reconciler to stop");
            return;
        }

        info!("Stopping presence reconciler");
        *running = false;
        self.shutdown.notify_waiters();
    }

    fn spawn_event_consumer(
        &self,
        mut events: broadcast::Receiver<SightingEvent>,
        transport: Transport,
    ) {
        let store = Arc::clone(&self.store);
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            loop {
                // The flag catches a shutdown signalled before this task
                // first parked in the select below
                if !*running.read().await {
                    debug!("{} presence consumer stopping, reconciler inactive", transport);
                    break;
                }

                tokio::select! {
                    event = events.recv() => match event {
                        Ok(SightingEvent::Seen(sighting)) => {
                            match store
                                .mark_contact_seen(&sighting.peer_id, sighting.last_seen)
                                .await
                            {
                                Ok(true) => debug!("Presence refreshed for {}", sighting.peer_id),
                                Ok(false) => {}
                                Err(e) => {
                                    warn!("Failed to refresh presence for {}: {}", sighting.peer_id, e)
                                }
                            }
                        }
                        Ok(SightingEvent::Expired(peer_id)) => {
                            // The transport went quiet; the sweep decides
                            // when that means offline
                            debug!("Sighting expired for {}", peer_id);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(
                                "{} presence consumer lagged, skipped {} events",
                                transport, skipped
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("{} sighting channel closed", transport);
                            break;
                        }
                    },
                    _ = shutdown.notified() => {
                        debug!("{} presence consumer received shutdown signal", transport);
                        break;
                    }
                }
            }

            debug!("{} presence consumer terminated", transport);
        });
    }

    fn spawn_sweep_task(&self) {
        let store = Arc::clone(&self.store);
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        let offline_after =
            chrono::Duration::milliseconds(self.config.offline_after.as_millis() as i64);
        let sweep_every = self.config.reconcile_interval;

        tokio::spawn(async move {
            let mut sweep = interval(sweep_every);

            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        if !*running.read().await {
                            debug!("Presence reconciler inactive, stopping sweep task");
                            break;
                        }
                        if let Err(e) = store.sweep_presence(offline_after).await {
                            warn!("Presence sweep failed: {}", e);
                        }
                    }
                    _ = shutdown.notified() => {
                        debug!("Presence sweep received shutdown signal");
                        break;
                    }
                }
            }

            debug!("Presence sweep terminated");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Contact, ContactSource};
    use chrono::Utc;
    use storage::Storage;
    use tokio::time::sleep;

    async fn fixture() -> (tempfile::TempDir, Arc<AppStateStore>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).await.unwrap());
        let store = Arc::new(AppStateStore::load(storage).await);
        (dir, store)
    }

    fn offline_contact(id: &str, name: &str, quiet_secs: i64) -> Contact {
        Contact {
            id: id.to_string(),
            name: name.to_string(),
            source: ContactSource::Wifi,
            online: false,
            last_seen: Utc::now() - chrono::Duration::seconds(quiet_secs),
        }
    }

    fn fast_config() -> PresenceConfig {
        PresenceConfig {
            reconcile_interval: Duration::from_millis(25),
            offline_after: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_seen_event_marks_contact_online() {
        let (_dir, store) = fixture().await;
        store
            .add_contact(offline_contact("192.168.1.20", "Phone2", 60))
            .await
            .unwrap();

        let registry = Arc::new(SightingRegistry::new(Transport::Wifi));
        let reconciler = PresenceReconciler::new(Arc::clone(&store), PresenceConfig::default());
        reconciler.start(&[Arc::clone(&registry)]).await;

        registry.record_sighting("192.168.1.20", Some("Phone2")).await;
        sleep(Duration::from_millis(50)).await;

        let contact = store.get_contact("192.168.1.20").await.unwrap();
        assert!(contact.online);

        reconciler.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_peers_do_not_create_contacts() {
        let (_dir, store) = fixture().await;
        let registry = Arc::new(SightingRegistry::new(Transport::Bluetooth));
        let reconciler = PresenceReconciler::new(Arc::clone(&store), PresenceConfig::default());
        reconciler.start(&[Arc::clone(&registry)]).await;

        registry.record_sighting("AA:BB", Some("Stranger")).await;
        sleep(Duration::from_millis(50)).await;

        assert!(store.contacts().await.is_empty());

        reconciler.stop().await;
    }

    #[tokio::test]
    async fn test_sweep_flips_quiet_contact_offline() {
        let (_dir, store) = fixture().await;
        let mut contact = offline_contact("192.168.1.20", "Phone2", 0);
        contact.online = true;
        contact.last_seen = Utc::now() - chrono::Duration::seconds(1);
        store.add_contact(contact).await.unwrap();

        let reconciler = PresenceReconciler::new(Arc::clone(&store), fast_config());
        reconciler.start(&[]).await;

        sleep(Duration::from_millis(100)).await;
        assert!(!store.get_contact("192.168.1.20").await.unwrap().online);

        reconciler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_halts_event_consumption() {
        let (_dir, store) = fixture().await;
        store
            .add_contact(offline_contact("192.168.1.20", "Phone2", 60))
            .await
            .unwrap();

        let registry = Arc::new(SightingRegistry::new(Transport::Wifi));
        let reconciler = PresenceReconciler::new(Arc::clone(&store), PresenceConfig::default());
        reconciler.start(&[Arc::clone(&registry)]).await;
        reconciler.stop().await;
        sleep(Duration::from_millis(20)).await;

        registry.record_sighting("192.168.1.20", Some("Phone2")).await;
        sleep(Duration::from_millis(50)).await;

        assert!(!store.get_contact("192.168.1.20").await.unwrap().online);
        assert!(!reconciler.is_running().await);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (_dir, store) = fixture().await;
        let reconciler = PresenceReconciler::new(store, PresenceConfig::default());

        reconciler.start(&[]).await;
        reconciler.start(&[]).await;
        assert!(reconciler.is_running().await);

        reconciler.stop().await;
        assert!(!reconciler.is_running().await);
    }

    #[test]
    fn test_config_defaults() {
        let config = PresenceConfig::default();
        assert_eq!(config.reconcile_interval, Duration::from_secs(5));
        assert_eq!(config.offline_after, Duration::from_secs(15));
    }

    #[test]
    fn test_from_env_falls_back_to_defaults() {
        // No PRESENCE_* vars set in the test environment
        let config = PresenceConfig::from_env().unwrap();
        assert_eq!(
            config.reconcile_interval,
            PresenceConfig::default().reconcile_interval
        );
    }
}
