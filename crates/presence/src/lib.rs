//! Contact presence over live discovery sightings.
//!
//! Saved contacts are durable; whether each one is online right now is
//! derived state, reconciled from the sighting events the discovery
//! registries publish and swept offline once a contact has been quiet
//! long enough. The app-state store also owns the persisted settings
//! (username, transport toggles, mock mode) the discovery components
//! are driven by.

pub mod error;
pub mod reconciler;
pub mod store;
pub mod types;

pub use error::{PresenceError, Result};
pub use reconciler::{PresenceConfig, PresenceReconciler};
pub use store::AppStateStore;
pub use types::{AppState, Contact, ContactSource};
