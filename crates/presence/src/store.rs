// Owner of the persisted AppState. All mutation goes through one RwLock
// with the storage write inside the critical section, so concurrent
// callers serialize instead of racing the read-modify-write.

use crate::error::{PresenceError, Result};
use crate::types::{AppState, Contact};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use storage::{keys, Storage};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Durable store for settings and the contact list.
///
/// Every field lives under its own storage key and is written back on
/// each mutation; loading fills defaults for anything missing or
/// unreadable rather than failing.
pub struct AppStateStore {
    storage: Arc<Storage>,
    state: Arc<RwLock<AppState>>,
}

impl AppStateStore {
    /// Load persisted state. Never fails; a corrupt or missing entry is
    /// logged and replaced by its default, and a blank username gets a
    /// generated tag that is persisted right away.
    pub async fn load(storage: Arc<Storage>) -> Self {
        let mut state = AppState {
            contacts: read_or(&storage, keys::CONTACTS, Vec::new()).await,
            selected_contacts: read_or(&storage, keys::SELECTED_CONTACTS, Vec::new()).await,
            ble_enabled: read_or(&storage, keys::BLE_ENABLED, true).await,
            wifi_enabled: read_or(&storage, keys::WIFI_ENABLED, true).await,
            mock_mode: read_or(&storage, keys::MOCK_MODE, false).await,
            username: String::new(),
        };

        state.username = match storage.get_string(keys::USERNAME).await {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) => {
                let generated = generated_username();
                info!("No username set, generated {}", generated);
                if let Err(e) = storage.set_string(keys::USERNAME, &generated).await {
                    warn!("Failed to persist generated username: {}", e);
                }
                generated
            }
            Err(e) => {
                warn!("Failed to load username: {}", e);
                generated_username()
            }
        };

        info!(
            contacts = state.contacts.len(),
            username = %state.username,
            "App state loaded"
        );

        Self {
            storage,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Snapshot of the full state.
    pub async fn state(&self) -> AppState {
        self.state.read().await.clone()
    }

    pub async fn username(&self) -> String {
        self.state.read().await.username.clone()
    }

    /// Set the display name. Blank input falls back to a generated tag;
    /// the effective name is returned.
    pub async fn set_username(&self, name: &str) -> Result<String> {
        let effective = if name.trim().is_empty() {
            generated_username()
        } else {
            name.trim().to_string()
        };

        let mut state = self.state.write().await;
        self.storage.set_string(keys::USERNAME, &effective).await?;
        state.username = effective.clone();
        info!("Username set to {}", effective);
        Ok(effective)
    }

    pub async fn ble_enabled(&self) -> bool {
        self.state.read().await.ble_enabled
    }

    pub async fn set_ble_enabled(&self, enabled: bool) -> Result<()> {
        let mut state = self.state.write().await;
        self.storage.set(keys::BLE_ENABLED, &enabled).await?;
        state.ble_enabled = enabled;
        info!(
            "Bluetooth discovery {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub async fn wifi_enabled(&self) -> bool {
        self.state.read().await.wifi_enabled
    }

    pub async fn set_wifi_enabled(&self, enabled: bool) -> Result<()> {
        let mut state = self.state.write().await;
        self.storage.set(keys::WIFI_ENABLED, &enabled).await?;
        state.wifi_enabled = enabled;
        info!(
            "WiFi discovery {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub async fn mock_mode(&self) -> bool {
        self.state.read().await.mock_mode
    }

    pub async fn set_mock_mode(&self, enabled: bool) -> Result<()> {
        let mut state = self.state.write().await;
        self.storage.set(keys::MOCK_MODE, &enabled).await?;
        state.mock_mode = enabled;
        info!("Mock mode {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.state.read().await.contacts.clone()
    }

    pub async fn get_contact(&self, id: &str) -> Option<Contact> {
        self.state
            .read()
            .await
            .contacts
            .iter()
            .find(|contact| contact.id == id)
            .cloned()
    }

    /// Save a contact. A second save of the same id keeps the stored
    /// entry and only marks it online with a fresh last_seen; the name
    /// and source it was saved under stay as they are.
    pub async fn add_contact(&self, contact: Contact) -> Result<Contact> {
        let mut state = self.state.write().await;

        let saved = match state
            .contacts
            .iter_mut()
            .find(|existing| existing.id == contact.id)
        {
            Some(existing) => {
                existing.online = true;
                existing.last_seen = contact.last_seen;
                info!(
                    "Contact {} ({}) already saved, refreshed presence",
                    existing.name, existing.id
                );
                existing.clone()
            }
            None => {
                info!("Saved new contact {} ({})", contact.name, contact.id);
                state.contacts.push(contact.clone());
                contact
            }
        };

        self.storage.set(keys::CONTACTS, &state.contacts).await?;
        Ok(saved)
    }

    /// Delete a saved contact and drop it from the selection.
    pub async fn remove_contact(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;

        let before = state.contacts.len();
        state.contacts.retain(|contact| contact.id != id);
        if state.contacts.len() == before {
            return Err(PresenceError::ContactNotFound(id.to_string()));
        }
        state.selected_contacts.retain(|selected| selected != id);

        self.storage.set(keys::CONTACTS, &state.contacts).await?;
        self.storage
            .set(keys::SELECTED_CONTACTS, &state.selected_contacts)
            .await?;
        info!("Removed contact {}", id);
        Ok(())
    }

    /// Refresh presence for the contact matching a live sighting.
    /// Returns whether a contact matched; sightings of unsaved peers are
    /// normal, not an error.
    pub async fn mark_contact_seen(&self, id: &str, seen_at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;

        let contact = match state.contacts.iter_mut().find(|contact| contact.id == id) {
            Some(contact) => contact,
            None => return Ok(false),
        };

        if !contact.online {
            info!("Contact {} came online", contact.name);
        }
        contact.online = true;
        contact.last_seen = seen_at;

        self.storage.set(keys::CONTACTS, &state.contacts).await?;
        Ok(true)
    }

    /// Flip contacts online or offline from the age of their last
    /// sighting. Returns how many contacts changed.
    pub async fn sweep_presence(&self, offline_after: chrono::Duration) -> Result<usize> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut changed = 0;

        for contact in state.contacts.iter_mut() {
            let fresh = now - contact.last_seen <= offline_after;
            if contact.online && !fresh {
                info!("Contact {} went offline", contact.name);
                contact.online = false;
                changed += 1;
            } else if !contact.online && fresh {
                info!("Contact {} came online", contact.name);
                contact.online = true;
                changed += 1;
            }
        }

        if changed > 0 {
            self.storage.set(keys::CONTACTS, &state.contacts).await?;
        }
        Ok(changed)
    }

    pub async fn selected_contacts(&self) -> Vec<String> {
        self.state.read().await.selected_contacts.clone()
    }

    pub async fn set_selected_contacts(&self, ids: Vec<String>) -> Result<()> {
        let mut state = self.state.write().await;
        self.storage.set(keys::SELECTED_CONTACTS, &ids).await?;
        state.selected_contacts = ids;
        Ok(())
    }
}

async fn read_or<T: DeserializeOwned>(storage: &Storage, key: &str, default: T) -> T {
    match storage.get(key).await {
        Ok(Some(value)) => value,
        Ok(None) => default,
        Err(e) => {
            warn!("Failed to load {}: {}", key, e);
            default
        }
    }
}

/// Fallback display name when none was ever set.
fn generated_username() -> String {
    let mut tag = Uuid::new_v4().simple().to_string();
    tag.truncate(4);
    format!("user-{}", tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContactSource;

    async fn store() -> (tempfile::TempDir, AppStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).await.unwrap());
        let store = AppStateStore::load(storage).await;
        (dir, store)
    }

    async fn reload(dir: &tempfile::TempDir) -> AppStateStore {
        let storage = Arc::new(Storage::open(dir.path()).await.unwrap());
        AppStateStore::load(storage).await
    }

    fn contact(id: &str, name: &str) -> Contact {
        Contact {
            id: id.to_string(),
            name: name.to_string(),
            source: ContactSource::Wifi,
            online: true,
            last_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fresh_store_gets_generated_username() {
        let (dir, store) = store().await;
        let username = store.username().await;
        assert!(username.starts_with("user-"));
        assert_eq!(username.len(), "user-".len() + 4);

        // The generated tag is persisted, not regenerated per session
        let again = reload(&dir).await;
        assert_eq!(again.username().await, username);
    }

    #[tokio::test]
    async fn test_blank_username_falls_back_to_generated_tag() {
        let (_dir, store) = store().await;

        let effective = store.set_username("  ").await.unwrap();
        assert!(effective.starts_with("user-"));

        let named = store.set_username("Phone1").await.unwrap();
        assert_eq!(named, "Phone1");
        assert_eq!(store.username().await, "Phone1");
    }

    #[tokio::test]
    async fn test_toggles_persist_across_load() {
        let (dir, store) = store().await;
        assert!(store.ble_enabled().await);
        assert!(store.wifi_enabled().await);

        store.set_ble_enabled(false).await.unwrap();
        store.set_mock_mode(true).await.unwrap();

        let again = reload(&dir).await;
        assert!(!again.ble_enabled().await);
        assert!(again.wifi_enabled().await);
        assert!(again.mock_mode().await);
    }

    #[tokio::test]
    async fn test_resave_keeps_stored_name_and_refreshes_presence() {
        let (_dir, store) = store().await;

        let mut saved = contact("192.168.1.20", "Kitchen Tablet");
        saved.online = false;
        saved.last_seen = Utc::now() - chrono::Duration::seconds(60);
        store.add_contact(saved).await.unwrap();

        // The peer renamed itself since it was saved
        let returned = store
            .add_contact(contact("192.168.1.20", "Phone2"))
            .await
            .unwrap();
        assert_eq!(returned.name, "Kitchen Tablet");

        let contacts = store.contacts().await;
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "Kitchen Tablet");
        assert!(contacts[0].online);
        assert!(Utc::now() - contacts[0].last_seen < chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_contacts_persist_across_load() {
        let (dir, store) = store().await;
        store.add_contact(contact("192.168.1.20", "Phone2")).await.unwrap();

        let again = reload(&dir).await;
        let contacts = again.contacts().await;
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].id, "192.168.1.20");
    }

    #[tokio::test]
    async fn test_remove_contact_also_deselects_it() {
        let (_dir, store) = store().await;
        store.add_contact(contact("a", "Alice")).await.unwrap();
        store.add_contact(contact("b", "Bob")).await.unwrap();
        store
            .set_selected_contacts(vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        store.remove_contact("a").await.unwrap();

        assert!(store.get_contact("a").await.is_none());
        assert_eq!(store.selected_contacts().await, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_unknown_contact_errors() {
        let (_dir, store) = store().await;
        let result = store.remove_contact("missing").await;
        assert!(matches!(result, Err(PresenceError::ContactNotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_contact_seen_refreshes_presence() {
        let (_dir, store) = store().await;
        let mut saved = contact("192.168.1.20", "Phone2");
        saved.online = false;
        saved.last_seen = Utc::now() - chrono::Duration::seconds(60);
        store.add_contact(saved).await.unwrap();

        let matched = store
            .mark_contact_seen("192.168.1.20", Utc::now())
            .await
            .unwrap();
        assert!(matched);

        let refreshed = store.get_contact("192.168.1.20").await.unwrap();
        assert!(refreshed.online);
        assert!(Utc::now() - refreshed.last_seen < chrono::Duration::seconds(5));

        // Unknown peers are not contacts and not errors
        let unmatched = store.mark_contact_seen("AA:BB", Utc::now()).await.unwrap();
        assert!(!unmatched);
    }

    #[tokio::test]
    async fn test_sweep_flips_presence_in_both_directions() {
        let (_dir, store) = store().await;

        let mut stale = contact("stale", "Stale");
        stale.online = true;
        stale.last_seen = Utc::now() - chrono::Duration::seconds(60);
        store.add_contact(stale).await.unwrap();

        let mut fresh = contact("fresh", "Fresh");
        fresh.online = false;
        fresh.last_seen = Utc::now() - chrono::Duration::seconds(2);
        store.add_contact(fresh).await.unwrap();

        let changed = store
            .sweep_presence(chrono::Duration::seconds(15))
            .await
            .unwrap();
        assert_eq!(changed, 2);

        assert!(!store.get_contact("stale").await.unwrap().online);
        assert!(store.get_contact("fresh").await.unwrap().online);

        // A second sweep with nothing to do changes nothing
        let idle = store
            .sweep_presence(chrono::Duration::seconds(15))
            .await
            .unwrap();
        assert_eq!(idle, 0);
    }

    #[tokio::test]
    async fn test_corrupt_contacts_entry_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).await.unwrap());
        storage
            .set_string(keys::CONTACTS, "definitely not a contact list")
            .await
            .unwrap();

        let store = AppStateStore::load(storage).await;
        assert!(store.contacts().await.is_empty());
    }
}
