use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport not supported: {0}")]
    Unsupported(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("BLE error: {0}")]
    Ble(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Channel closed: {0}")]
    Closed(String),
}

impl From<std::io::Error> for DiscoveryError {
    fn from(err: std::io::Error) -> Self {
        DiscoveryError::Socket(err.to_string())
    }
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(err: serde_json::Error) -> Self {
        DiscoveryError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

impl DiscoveryError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            DiscoveryError::PermissionDenied(detail) => {
                format!("Permission denied: {}. Please grant the necessary permissions in your device settings.", detail)
            }
            DiscoveryError::Unsupported(detail) => {
                format!("{} Discovery controls are disabled on this device.", detail)
            }
            DiscoveryError::Socket(detail) => {
                format!("Network error: {}. Please check that WiFi is connected and try again.", detail)
            }
            DiscoveryError::Send(detail) => {
                format!("Could not send to the network: {}. Please check your connection and try again.", detail)
            }
            DiscoveryError::Ble(detail) => {
                format!("Bluetooth error: {}. Please check your Bluetooth settings.", detail)
            }
            DiscoveryError::Serialization(detail) => {
                format!("Data processing error: {}. Please try again.", detail)
            }
            DiscoveryError::Closed(detail) => {
                format!("Discovery stopped unexpectedly: {}. Please restart scanning.", detail)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_offer_a_remedy() {
        let denied = DiscoveryError::PermissionDenied("Bluetooth scan".to_string());
        assert!(denied.user_message().contains("settings"));

        let socket = DiscoveryError::Socket("bind failed".to_string());
        assert!(socket.user_message().contains("WiFi"));
    }

    #[test]
    fn test_io_error_maps_to_socket() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port busy");
        let err: DiscoveryError = io.into();
        assert!(matches!(err, DiscoveryError::Socket(_)));
    }
}
