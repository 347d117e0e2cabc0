use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a peer, assigned by the transport that saw it
/// (a Bluetooth device address, or the source IP of a UDP announcement).
pub type PeerId = String;

/// Transport a sighting arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    Bluetooth,
    Wifi,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Bluetooth => write!(f, "Bluetooth"),
            Transport::Wifi => write!(f, "WiFi"),
        }
    }
}

/// A peer currently visible on one transport.
///
/// Sightings are ephemeral: created on first contact, refreshed on every
/// received event, and evicted once nothing has been heard for the expiry
/// window. `degraded` is derived state - it only turns true once enough
/// heartbeat windows passed without an event, and an entry old enough to
/// expire is deleted rather than kept around in a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sighting {
    pub peer_id: PeerId,
    pub display_name: String,
    pub transport: Transport,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub missed_heartbeats: u32,
    pub degraded: bool,
}

impl Sighting {
    /// Build a fresh sighting first seen right now.
    pub fn new(peer_id: impl Into<PeerId>, display_name: Option<&str>, transport: Transport) -> Self {
        let peer_id = peer_id.into();
        let now = Utc::now();
        Self {
            display_name: display_name
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| peer_id.clone()),
            peer_id,
            transport,
            first_seen: now,
            last_seen: now,
            missed_heartbeats: 0,
            degraded: false,
        }
    }
}

/// Change notification published by a registry.
#[derive(Debug, Clone)]
pub enum SightingEvent {
    /// A peer was created or refreshed
    Seen(Sighting),
    /// A peer aged out and was evicted
    Expired(PeerId),
}

/// Observable state of a transport component.
///
/// Transport failures are folded into this status rather than escaping as
/// errors; only the initial start call reports failures directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Idle,
    Scanning,
    Advertising,
    /// Partially working, e.g. the multicast join failed but sends still go out
    Degraded(String),
    PermissionDenied(String),
    Unsupported(String),
    Error(String),
}

impl std::fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryStatus::Idle => write!(f, "Idle"),
            DiscoveryStatus::Scanning => write!(f, "Scanning"),
            DiscoveryStatus::Advertising => write!(f, "Advertising"),
            DiscoveryStatus::Degraded(reason) => write!(f, "Degraded: {}", reason),
            DiscoveryStatus::PermissionDenied(detail) => write!(f, "Permission denied: {}", detail),
            DiscoveryStatus::Unsupported(reason) => write!(f, "{}", reason),
            DiscoveryStatus::Error(detail) => write!(f, "Error: {}", detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sighting_display_name_falls_back_to_peer_id() {
        let named = Sighting::new("AA:BB:CC", Some("Phone1"), Transport::Bluetooth);
        assert_eq!(named.display_name, "Phone1");

        let unnamed = Sighting::new("AA:BB:CC", None, Transport::Bluetooth);
        assert_eq!(unnamed.display_name, "AA:BB:CC");

        let empty = Sighting::new("AA:BB:CC", Some(""), Transport::Bluetooth);
        assert_eq!(empty.display_name, "AA:BB:CC");
    }

    #[test]
    fn test_new_sighting_starts_healthy() {
        let sighting = Sighting::new("192.168.1.20", Some("Phone2"), Transport::Wifi);
        assert_eq!(sighting.missed_heartbeats, 0);
        assert!(!sighting.degraded);
        assert_eq!(sighting.first_seen, sighting.last_seen);
    }

    #[test]
    fn test_permission_denied_status_mentions_denial() {
        let status = DiscoveryStatus::PermissionDenied("Bluetooth scan".to_string());
        assert!(status.to_string().contains("denied"));
    }

    #[test]
    fn test_transport_display() {
        assert_eq!(Transport::Bluetooth.to_string(), "Bluetooth");
        assert_eq!(Transport::Wifi.to_string(), "WiFi");
    }
}
