pub mod error;
pub mod keys;
pub mod logs;
pub mod store;

pub use error::{Result, StorageError};
pub use logs::{LogCategory, LogEntry, LogStore};
pub use store::Storage;
