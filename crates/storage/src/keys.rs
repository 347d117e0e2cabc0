// Well-known storage keys shared across the workspace

pub const USERNAME: &str = "USERNAME";
pub const CONTACTS: &str = "CONTACTS";
pub const SELECTED_CONTACTS: &str = "SELECTED_CONTACTS";
pub const BLE_ENABLED: &str = "BLE_ENABLED";
pub const WIFI_ENABLED: &str = "WIFI_ENABLED";
pub const MOCK_MODE: &str = "MOCK_MODE";
pub const APP_LOGS: &str = "APP_LOGS";
