use thiserror::Error;

#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Contact not found: {0}")]
    ContactNotFound(String),
}

pub type Result<T> = std::result::Result<T, PresenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_pass_through() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only fs");
        let err: PresenceError = storage::StorageError::from(io).into();
        assert!(matches!(err, PresenceError::Storage(_)));
    }
}
