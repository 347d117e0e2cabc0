//! Peer discovery over Bluetooth LE and UDP multicast.
//!
//! Each transport keeps its own registry of sightings: peers heard from
//! recently, refreshed by every received advertisement or announcement,
//! degraded after missed heartbeats and evicted once they go quiet for
//! the expiry window. Registries publish change events that downstream
//! consumers (presence reconciliation, UIs) subscribe to, and
//! [`merge_sightings`] folds both registries into one list for display.

pub mod ble;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod multicast;
pub mod permissions;
pub mod platform;
pub mod registry;
pub mod types;

pub use ble::{BleLink, BleSighting, BluetoothDiscovery, BtleplugLink, SERVICE_UUID};
pub use config::{DiscoveryConfig, DISCOVERY_PORT, MULTICAST_ADDR, SERVICE_ID};
pub use diagnostics::{
    permission_report, run_multicast_self_test, MulticastVerdict, SelfTestReport,
};
pub use error::{DiscoveryError, Result};
pub use multicast::{Announcement, MulticastDiscovery};
pub use permissions::{
    Permission, PermissionProvider, PermissionStatus, PlatformPermissions, StaticPermissions,
};
pub use platform::TransportSupport;
pub use registry::{merge_sightings, SightingRegistry, SweepPolicy};
pub use types::{DiscoveryStatus, PeerId, Sighting, SightingEvent, Transport};
