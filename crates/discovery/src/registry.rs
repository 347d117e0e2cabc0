// Per-transport sighting registry
// Deduplicates raw transport events by peer id and tracks liveness.
// Each transport owns its own registry; the two are never merged except
// through the pure merge_sightings function at the presentation boundary.

use crate::{DiscoveryConfig, PeerId, Sighting, SightingEvent, Transport};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Thresholds the heartbeat sweep classifies entries with.
#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    /// Quiet time after which an entry is evicted
    pub expiry_window: Duration,
    /// Quiet time after which an entry misses a heartbeat
    pub degrade_threshold: Duration,
    /// Missed heartbeats before an entry is flagged degraded
    pub degraded_after_missed: u32,
}

impl SweepPolicy {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            expiry_window: Duration::milliseconds(config.expiry_window.as_millis() as i64),
            degrade_threshold: Duration::milliseconds(config.degrade_threshold.as_millis() as i64),
            degraded_after_missed: config.degraded_after_missed,
        }
    }
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self::from_config(&DiscoveryConfig::default())
    }
}

/// Deduplicated table of currently-visible peers on one transport.
///
/// Upserts are keyed by `peer_id`: the newest event wins for
/// `display_name`, refreshes `last_seen`, and resets the heartbeat
/// counters. The periodic sweep evicts entries older than the expiry
/// window and advances `missed_heartbeats`/`degraded` for the rest.
/// Every change is published on a broadcast channel so downstream
/// consumers (presence reconciliation, UIs) can follow along without
/// polling.
pub struct SightingRegistry {
    transport: Transport,
    sightings: Arc<RwLock<HashMap<PeerId, Sighting>>>,
    events: broadcast::Sender<SightingEvent>,
}

impl SightingRegistry {
    pub fn new(transport: Transport) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            sightings: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Transport this registry tracks.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Subscribe to sighting changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SightingEvent> {
        self.events.subscribe()
    }

    /// Upsert a sighting from a raw transport event.
    ///
    /// An existing entry keeps its `first_seen`, takes the newest
    /// non-empty name, moves `last_seen` to now, and drops back to a
    /// healthy heartbeat state. Returns the stored entry.
    pub async fn record_sighting(&self, peer_id: &str, display_name: Option<&str>) -> Sighting {
        let snapshot = {
            let mut sightings = self.sightings.write().await;

            match sightings.get_mut(peer_id) {
                Some(existing) => {
                    existing.last_seen = Utc::now();
                    if let Some(name) = display_name.filter(|name| !name.is_empty()) {
                        existing.display_name = name.to_string();
                    }
                    existing.missed_heartbeats = 0;
                    existing.degraded = false;
                    debug!("Updated {} sighting: {}", self.transport, peer_id);
                    existing.clone()
                }
                None => {
                    let sighting = Sighting::new(peer_id, display_name, self.transport);
                    info!(
                        "New {} sighting: {} ({})",
                        self.transport, sighting.display_name, peer_id
                    );
                    sightings.insert(peer_id.to_string(), sighting.clone());
                    sighting
                }
            }
        };

        let _ = self.events.send(SightingEvent::Seen(snapshot.clone()));
        snapshot
    }

    /// Insert a fully-formed sighting, replacing any existing entry.
    ///
    /// Used for seeding demo data and restoring snapshots; normal
    /// transport ingestion goes through `record_sighting`.
    pub async fn insert(&self, sighting: Sighting) {
        {
            let mut sightings = self.sightings.write().await;
            sightings.insert(sighting.peer_id.clone(), sighting.clone());
        }
        let _ = self.events.send(SightingEvent::Seen(sighting));
    }

    /// Run one heartbeat sweep.
    ///
    /// Entries quiet for longer than the expiry window are deleted (no
    /// terminal "expired" state is kept). Survivors past the degrade
    /// threshold accumulate a missed heartbeat, anything fresher drops
    /// back to zero, and `degraded` follows the missed count.
    pub async fn sweep(&self, policy: &SweepPolicy) {
        let now = Utc::now();
        let mut evicted = Vec::new();

        {
            let mut sightings = self.sightings.write().await;

            sightings.retain(|peer_id, sighting| {
                let quiet = now - sighting.last_seen;
                if quiet > policy.expiry_window {
                    debug!(
                        "Evicting stale {} sighting: {} (last seen {})",
                        self.transport, peer_id, sighting.last_seen
                    );
                    evicted.push(peer_id.clone());
                    false
                } else {
                    true
                }
            });

            for sighting in sightings.values_mut() {
                let quiet = now - sighting.last_seen;
                if quiet > policy.degrade_threshold {
                    sighting.missed_heartbeats += 1;
                } else {
                    sighting.missed_heartbeats = 0;
                }
                sighting.degraded = sighting.missed_heartbeats >= policy.degraded_after_missed;
            }
        }

        if !evicted.is_empty() {
            info!(
                "Sweep evicted {} stale {} sighting(s)",
                evicted.len(),
                self.transport
            );
        }
        for peer_id in evicted {
            let _ = self.events.send(SightingEvent::Expired(peer_id));
        }
    }

    /// Snapshot of all current sightings, in no particular order.
    pub async fn sightings(&self) -> Vec<Sighting> {
        self.sightings.read().await.values().cloned().collect()
    }

    /// Look up a single sighting by peer id.
    pub async fn get(&self, peer_id: &str) -> Option<Sighting> {
        self.sightings.read().await.get(peer_id).cloned()
    }

    /// Whether a peer id is currently tracked.
    pub async fn contains(&self, peer_id: &str) -> bool {
        self.sightings.read().await.contains_key(peer_id)
    }

    pub async fn len(&self) -> usize {
        self.sightings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sightings.read().await.is_empty()
    }

    /// Drop all entries without publishing eviction events.
    pub async fn clear(&self) {
        self.sightings.write().await.clear();
    }
}

/// Merge the per-transport views into one presentation list.
///
/// Pure selection only: the inputs stay untouched, and a peer visible on
/// both transports keeps both entries because the id schemes (device
/// address vs. source IP) are incompatible namespaces.
pub fn merge_sightings(bluetooth: &[Sighting], wifi: &[Sighting]) -> Vec<Sighting> {
    let mut merged: Vec<Sighting> = bluetooth.iter().chain(wifi.iter()).cloned().collect();
    merged.sort_by(|a, b| {
        a.display_name
            .to_lowercase()
            .cmp(&b.display_name.to_lowercase())
            .then_with(|| a.peer_id.cmp(&b.peer_id))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backdated(peer_id: &str, name: &str, transport: Transport, seconds_ago: i64) -> Sighting {
        let mut sighting = Sighting::new(peer_id, Some(name), transport);
        sighting.first_seen = Utc::now() - Duration::seconds(seconds_ago);
        sighting.last_seen = Utc::now() - Duration::seconds(seconds_ago);
        sighting
    }

    #[tokio::test]
    async fn test_record_sighting_deduplicates_by_peer_id() {
        let registry = SightingRegistry::new(Transport::Bluetooth);

        registry.record_sighting("AA:BB", Some("Phone1")).await;
        registry.record_sighting("AA:BB", Some("Phone1-renamed")).await;

        let sightings = registry.sightings().await;
        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].display_name, "Phone1-renamed");
        assert_eq!(sightings[0].missed_heartbeats, 0);
        assert!(!sightings[0].degraded);
    }

    #[tokio::test]
    async fn test_record_sighting_keeps_first_seen() {
        let registry = SightingRegistry::new(Transport::Wifi);

        let first = registry.record_sighting("192.168.1.20", Some("Phone2")).await;
        let second = registry.record_sighting("192.168.1.20", Some("Phone2")).await;

        assert_eq!(first.first_seen, second.first_seen);
        assert!(second.last_seen >= first.last_seen);
    }

    #[tokio::test]
    async fn test_record_sighting_without_name_keeps_existing_name() {
        let registry = SightingRegistry::new(Transport::Bluetooth);

        registry.record_sighting("AA:BB", Some("Phone1")).await;
        registry.record_sighting("AA:BB", None).await;

        let sighting = registry.get("AA:BB").await.unwrap();
        assert_eq!(sighting.display_name, "Phone1");
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired_entries() {
        let registry = SightingRegistry::new(Transport::Bluetooth);
        let policy = SweepPolicy::default();

        registry
            .insert(backdated("old", "Old", Transport::Bluetooth, 11))
            .await;
        registry.record_sighting("fresh", Some("Fresh")).await;

        registry.sweep(&policy).await;

        assert!(!registry.contains("old").await);
        assert!(registry.contains("fresh").await);
    }

    #[tokio::test]
    async fn test_sweep_increments_missed_heartbeats_until_degraded() {
        let registry = SightingRegistry::new(Transport::Wifi);
        let policy = SweepPolicy::default();

        // Quiet for 4s: past the 3s degrade threshold, well short of expiry
        registry
            .insert(backdated("quiet", "Quiet", Transport::Wifi, 4))
            .await;

        registry.sweep(&policy).await;
        assert_eq!(registry.get("quiet").await.unwrap().missed_heartbeats, 1);
        assert!(!registry.get("quiet").await.unwrap().degraded);

        registry.sweep(&policy).await;
        assert_eq!(registry.get("quiet").await.unwrap().missed_heartbeats, 2);

        registry.sweep(&policy).await;
        let sighting = registry.get("quiet").await.unwrap();
        assert_eq!(sighting.missed_heartbeats, 3);
        assert!(sighting.degraded);
    }

    #[tokio::test]
    async fn test_fresh_event_resets_degraded_state() {
        let registry = SightingRegistry::new(Transport::Wifi);
        let policy = SweepPolicy::default();

        registry
            .insert(backdated("peer", "Peer", Transport::Wifi, 4))
            .await;
        for _ in 0..3 {
            registry.sweep(&policy).await;
        }
        assert!(registry.get("peer").await.unwrap().degraded);

        registry.record_sighting("peer", Some("Peer")).await;

        let sighting = registry.get("peer").await.unwrap();
        assert_eq!(sighting.missed_heartbeats, 0);
        assert!(!sighting.degraded);
    }

    #[tokio::test]
    async fn test_sweep_resets_counter_for_recently_seen_peers() {
        let registry = SightingRegistry::new(Transport::Bluetooth);
        let policy = SweepPolicy::default();

        let mut sighting = backdated("peer", "Peer", Transport::Bluetooth, 1);
        sighting.missed_heartbeats = 2;
        registry.insert(sighting).await;

        registry.sweep(&policy).await;

        assert_eq!(registry.get("peer").await.unwrap().missed_heartbeats, 0);
    }

    #[tokio::test]
    async fn test_example_scenario_rename_then_expire() {
        let registry = SightingRegistry::new(Transport::Bluetooth);
        let policy = SweepPolicy::default();

        registry.record_sighting("AA:BB", Some("Phone1")).await;
        registry.record_sighting("AA:BB", Some("Phone1-renamed")).await;

        let sightings = registry.sightings().await;
        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].display_name, "Phone1-renamed");
        assert_eq!(sightings[0].missed_heartbeats, 0);

        // Eleven quiet seconds later the sweep deletes the entry outright
        registry
            .insert(backdated("AA:BB", "Phone1-renamed", Transport::Bluetooth, 11))
            .await;
        registry.sweep(&policy).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_events_published_for_seen_and_expired() {
        let registry = SightingRegistry::new(Transport::Wifi);
        let policy = SweepPolicy::default();
        let mut events = registry.subscribe();

        registry.record_sighting("192.168.1.20", Some("Phone2")).await;
        match events.recv().await.unwrap() {
            SightingEvent::Seen(sighting) => assert_eq!(sighting.peer_id, "192.168.1.20"),
            other => panic!("expected Seen, got {:?}", other),
        }

        registry
            .insert(backdated("192.168.1.20", "Phone2", Transport::Wifi, 11))
            .await;
        events.recv().await.unwrap(); // Seen from the seed insert

        registry.sweep(&policy).await;
        match events.recv().await.unwrap() {
            SightingEvent::Expired(peer_id) => assert_eq!(peer_id, "192.168.1.20"),
            other => panic!("expected Expired, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_merge_keeps_transports_separate() {
        let ble = SightingRegistry::new(Transport::Bluetooth);
        let wifi = SightingRegistry::new(Transport::Wifi);

        // Same id on both transports stays two entries: the id schemes
        // are different namespaces and must never be unified
        ble.record_sighting("peer-1", Some("Alice")).await;
        wifi.record_sighting("peer-1", Some("Alice")).await;
        wifi.record_sighting("192.168.1.30", Some("Bob")).await;

        let merged = merge_sightings(&ble.sightings().await, &wifi.sightings().await);
        assert_eq!(merged.len(), 3);
        assert_eq!(
            merged
                .iter()
                .filter(|s| s.peer_id == "peer-1")
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_merge_orders_by_display_name() {
        let ble = vec![
            Sighting::new("cc", Some("zeta"), Transport::Bluetooth),
            Sighting::new("aa", Some("Alpha"), Transport::Bluetooth),
        ];
        let wifi = vec![Sighting::new("bb", Some("beta"), Transport::Wifi)];

        let merged = merge_sightings(&ble, &wifi);
        let names: Vec<&str> = merged.iter().map(|s| s.display_name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "beta", "zeta"]);
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let registry = SightingRegistry::new(Transport::Bluetooth);
        registry.record_sighting("AA:BB", Some("Phone1")).await;
        registry.record_sighting("CC:DD", Some("Phone2")).await;

        registry.clear().await;
        assert!(registry.is_empty().await);
    }
}
