// Platform capability probes for the discovery transports

/// Whether a transport is usable on the current platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSupport {
    Supported,
    /// Not available here; the string is the user-facing reason
    Unsupported(&'static str),
}

impl TransportSupport {
    pub fn is_supported(&self) -> bool {
        matches!(self, TransportSupport::Supported)
    }
}

/// Bluetooth scanning/advertising support.
///
/// The btleplug backend drives BlueZ, so Linux is the supported family;
/// everywhere else callers get a distinct unsupported status instead of
/// a transport that silently does nothing.
pub fn bluetooth_support() -> TransportSupport {
    #[cfg(target_os = "linux")]
    {
        TransportSupport::Supported
    }

    #[cfg(not(target_os = "linux"))]
    {
        TransportSupport::Unsupported("Bluetooth discovery is not supported on this platform")
    }
}

/// UDP multicast support.
pub fn multicast_support() -> TransportSupport {
    #[cfg(target_arch = "wasm32")]
    {
        TransportSupport::Unsupported("UDP multicast is not available in the browser")
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        TransportSupport::Supported
    }
}

/// Operating system name, as reported by the toolchain.
pub fn os_name() -> &'static str {
    std::env::consts::OS
}

/// Best-effort kernel/OS version for diagnostic reports.
pub fn os_version() -> String {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    #[cfg(not(target_os = "linux"))]
    {
        "unknown".to_string()
    }
}
