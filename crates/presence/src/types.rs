use chrono::{DateTime, Utc};
use discovery::{Sighting, Transport};
use serde::{Deserialize, Serialize};

/// Transport a contact was discovered through when it was saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactSource {
    #[serde(rename = "BLE")]
    Ble,
    #[serde(rename = "WIFI")]
    Wifi,
}

impl From<Transport> for ContactSource {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Bluetooth => ContactSource::Ble,
            Transport::Wifi => ContactSource::Wifi,
        }
    }
}

impl std::fmt::Display for ContactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactSource::Ble => write!(f, "BLE"),
            ContactSource::Wifi => write!(f, "WIFI"),
        }
    }
}

/// A saved peer, durable across sessions.
///
/// `id` carries the originating peer id, so a contact can only be matched
/// against sightings from the transport family it was saved from (device
/// addresses and source IPs are different namespaces). `online` and
/// `last_seen` are owned by presence reconciliation, never set by the
/// user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub source: ContactSource,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

impl Contact {
    /// Capture a live sighting as a saved contact.
    pub fn from_sighting(sighting: &Sighting) -> Self {
        Self {
            id: sighting.peer_id.clone(),
            name: sighting.display_name.clone(),
            source: sighting.transport.into(),
            online: true,
            last_seen: sighting.last_seen,
        }
    }
}

/// Process-wide settings plus the contact list, persisted field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppState {
    pub contacts: Vec<Contact>,
    pub selected_contacts: Vec<String>,
    pub ble_enabled: bool,
    pub wifi_enabled: bool,
    pub mock_mode: bool,
    pub username: String,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            contacts: Vec::new(),
            selected_contacts: Vec::new(),
            // Both transports opt-out rather than opt-in
            ble_enabled: true,
            wifi_enabled: true,
            mock_mode: false,
            username: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_captures_sighting_fields() {
        let sighting = Sighting::new("192.168.1.20", Some("Phone2"), Transport::Wifi);
        let contact = Contact::from_sighting(&sighting);

        assert_eq!(contact.id, "192.168.1.20");
        assert_eq!(contact.name, "Phone2");
        assert_eq!(contact.source, ContactSource::Wifi);
        assert!(contact.online);
        assert_eq!(contact.last_seen, sighting.last_seen);
    }

    #[test]
    fn test_contact_source_serializes_in_upper_case() {
        assert_eq!(serde_json::to_string(&ContactSource::Ble).unwrap(), "\"BLE\"");
        assert_eq!(
            serde_json::to_string(&ContactSource::Wifi).unwrap(),
            "\"WIFI\""
        );

        let parsed: ContactSource = serde_json::from_str("\"BLE\"").unwrap();
        assert_eq!(parsed, ContactSource::Ble);
    }

    #[test]
    fn test_default_state_enables_both_transports() {
        let state = AppState::default();
        assert!(state.ble_enabled);
        assert!(state.wifi_enabled);
        assert!(!state.mock_mode);
        assert!(state.contacts.is_empty());
    }
}
