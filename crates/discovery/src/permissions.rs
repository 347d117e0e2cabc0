// Permission handling for peer discovery
// Wraps the platform grant/deny surface behind a provider trait so the
// discovery services can gate on it and tests can script every outcome

use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Runtime permission relevant to discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    BluetoothScan,
    BluetoothConnect,
    BluetoothAdvertise,
    // Install-time Bluetooth permissions on Android before API 31
    Bluetooth,
    BluetoothAdmin,
    FineLocation,
    CoarseLocation,
    LocalNetwork,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::BluetoothScan => write!(f, "BLUETOOTH_SCAN"),
            Permission::BluetoothConnect => write!(f, "BLUETOOTH_CONNECT"),
            Permission::BluetoothAdvertise => write!(f, "BLUETOOTH_ADVERTISE"),
            Permission::Bluetooth => write!(f, "BLUETOOTH"),
            Permission::BluetoothAdmin => write!(f, "BLUETOOTH_ADMIN"),
            Permission::FineLocation => write!(f, "ACCESS_FINE_LOCATION"),
            Permission::CoarseLocation => write!(f, "ACCESS_COARSE_LOCATION"),
            Permission::LocalNetwork => write!(f, "LOCAL_NETWORK"),
        }
    }
}

/// Status of a single permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// Permission has been granted
    Granted,
    /// Permission has been denied by the user
    Denied,
    /// Permission has not been requested yet
    NotRequested,
    /// Platform offers no way to query this permission programmatically
    NotCheckable,
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionStatus::Granted => write!(f, "GRANTED"),
            PermissionStatus::Denied => write!(f, "DENIED"),
            PermissionStatus::NotRequested => write!(f, "NOT_REQUESTED"),
            PermissionStatus::NotCheckable => write!(f, "NOT_CHECKABLE"),
        }
    }
}

/// Collaborator that owns the platform permission prompts.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Prompt for the given permissions and report each resulting status.
    async fn request_permissions(
        &self,
        permissions: &[Permission],
    ) -> Result<HashMap<Permission, PermissionStatus>>;

    /// Query the current status of one permission without prompting.
    async fn check(&self, permission: Permission) -> Result<PermissionStatus>;
}

/// The permissions discovery needs on the current platform.
pub fn required_permissions() -> Vec<Permission> {
    #[cfg(target_os = "android")]
    {
        // Assume a modern API level; android_permissions covers the
        // pre-31 location-based set when the caller knows the SDK version
        android_permissions(31)
    }

    #[cfg(target_os = "ios")]
    {
        vec![Permission::LocalNetwork]
    }

    #[cfg(not(any(target_os = "android", target_os = "ios")))]
    {
        vec![
            Permission::BluetoothScan,
            Permission::BluetoothConnect,
            Permission::BluetoothAdvertise,
        ]
    }
}

/// Android permission set by SDK version. Both levels need fine location
/// for BLE scan results; API 31 adds the dedicated Bluetooth runtime
/// permissions where older levels use the install-time ones.
pub fn android_permissions(sdk_version: u32) -> Vec<Permission> {
    if sdk_version >= 31 {
        vec![
            Permission::BluetoothScan,
            Permission::BluetoothConnect,
            Permission::BluetoothAdvertise,
            Permission::FineLocation,
        ]
    } else {
        vec![
            Permission::FineLocation,
            Permission::CoarseLocation,
            Permission::Bluetooth,
            Permission::BluetoothAdmin,
        ]
    }
}

/// Platform-backed provider with cached statuses.
pub struct PlatformPermissions {
    statuses: Arc<RwLock<HashMap<Permission, PermissionStatus>>>,
}

impl PlatformPermissions {
    pub fn new() -> Self {
        Self {
            statuses: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Platform-specific permission request
    #[cfg(target_os = "android")]
    async fn platform_request(&self, permission: Permission) -> PermissionStatus {
        // Android: a real deployment routes this through the host app's
        // ActivityCompat.requestPermissions() bridge with the matching
        // Manifest.permission.* constant
        debug!("Android: requesting {}", permission);
        PermissionStatus::Granted
    }

    #[cfg(target_os = "ios")]
    async fn platform_request(&self, permission: Permission) -> PermissionStatus {
        // iOS: local network access triggers the system prompt on first
        // socket use; there is no API to request or query it directly
        debug!("iOS: requesting {}", permission);
        PermissionStatus::NotCheckable
    }

    #[cfg(target_arch = "wasm32")]
    async fn platform_request(&self, permission: Permission) -> PermissionStatus {
        debug!("Web: {} not available", permission);
        PermissionStatus::NotCheckable
    }

    #[cfg(not(any(target_os = "android", target_os = "ios", target_arch = "wasm32")))]
    async fn platform_request(&self, permission: Permission) -> PermissionStatus {
        // Desktop platforms run without runtime permission prompts
        debug!("Desktop: {} granted implicitly", permission);
        PermissionStatus::Granted
    }
}

impl Default for PlatformPermissions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionProvider for PlatformPermissions {
    async fn request_permissions(
        &self,
        permissions: &[Permission],
    ) -> Result<HashMap<Permission, PermissionStatus>> {
        let mut results = HashMap::new();

        for &permission in permissions {
            let cached = self.statuses.read().await.get(&permission).copied();
            let status = match cached {
                Some(status) if status != PermissionStatus::NotRequested => {
                    debug!("{} already requested: {:?}", permission, status);
                    status
                }
                _ => {
                    let status = self.platform_request(permission).await;
                    self.statuses.write().await.insert(permission, status);
                    info!("{} permission status: {:?}", permission, status);
                    status
                }
            };
            results.insert(permission, status);
        }

        Ok(results)
    }

    async fn check(&self, permission: Permission) -> Result<PermissionStatus> {
        if let Some(status) = self.statuses.read().await.get(&permission) {
            return Ok(*status);
        }
        Ok(PermissionStatus::NotRequested)
    }
}

/// Scripted provider for tests and headless deployments.
pub struct StaticPermissions {
    default_status: PermissionStatus,
    overrides: Arc<RwLock<HashMap<Permission, PermissionStatus>>>,
}

impl StaticPermissions {
    pub fn new(default_status: PermissionStatus) -> Self {
        Self {
            default_status,
            overrides: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Provider that grants everything.
    pub fn granted() -> Self {
        Self::new(PermissionStatus::Granted)
    }

    /// Provider that denies everything.
    pub fn denied() -> Self {
        Self::new(PermissionStatus::Denied)
    }

    /// Override the status of a single permission.
    pub async fn set(&self, permission: Permission, status: PermissionStatus) {
        self.overrides.write().await.insert(permission, status);
    }
}

#[async_trait]
impl PermissionProvider for StaticPermissions {
    async fn request_permissions(
        &self,
        permissions: &[Permission],
    ) -> Result<HashMap<Permission, PermissionStatus>> {
        let overrides = self.overrides.read().await;
        Ok(permissions
            .iter()
            .map(|&p| (p, overrides.get(&p).copied().unwrap_or(self.default_status)))
            .collect())
    }

    async fn check(&self, permission: Permission) -> Result<PermissionStatus> {
        let overrides = self.overrides.read().await;
        Ok(overrides
            .get(&permission)
            .copied()
            .unwrap_or(self.default_status))
    }
}
