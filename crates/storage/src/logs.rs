// In-app log collaborator with bounded history and debounced persistence
// Constructed once at startup and handed to consumers as an Arc - no global state

use crate::{keys, Result, Storage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

const MAX_LOG_ENTRIES: usize = 1000;
const FLUSH_DELAY: Duration = Duration::from_secs(5);

/// Category tag attached to every log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Info,
    Error,
    Bluetooth,
    Wifi,
    Ui,
    Scanning,
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogCategory::Info => write!(f, "info"),
            LogCategory::Error => write!(f, "error"),
            LogCategory::Bluetooth => write!(f, "bluetooth"),
            LogCategory::Wifi => write!(f, "wifi"),
            LogCategory::Ui => write!(f, "ui"),
            LogCategory::Scanning => write!(f, "scanning"),
        }
    }
}

/// A single timestamped log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    pub message: String,
}

/// Bounded, most-recent-first log buffer persisted to storage.
///
/// `log` is fire-and-forget: entries land in memory immediately and a
/// debounced background task flushes the buffer to the `APP_LOGS` key.
/// A flush already pending when new entries arrive is not rescheduled,
/// so bursts of logging produce at most one write per delay window.
/// Flush failures are reported through tracing and never surfaced to
/// callers.
pub struct LogStore {
    storage: Arc<Storage>,
    entries: Arc<RwLock<VecDeque<LogEntry>>>,
    flush_pending: Arc<AtomicBool>,
    flush_delay: Duration,
}

impl LogStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self::with_flush_delay(storage, FLUSH_DELAY)
    }

    /// Create a store with a custom debounce delay.
    pub fn with_flush_delay(storage: Arc<Storage>, flush_delay: Duration) -> Self {
        Self {
            storage,
            entries: Arc::new(RwLock::new(VecDeque::new())),
            flush_pending: Arc::new(AtomicBool::new(false)),
            flush_delay,
        }
    }

    /// Restore previously persisted entries. Missing or unreadable
    /// history starts the buffer empty.
    pub async fn load(&self) {
        match self.storage.get::<Vec<LogEntry>>(keys::APP_LOGS).await {
            Ok(Some(persisted)) => {
                let mut entries = self.entries.write().await;
                *entries = persisted.into_iter().collect();
                entries.truncate(MAX_LOG_ENTRIES);
                debug!("Restored {} log entries", entries.len());
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Failed to restore log history: {}", e);
            }
        }
    }

    /// Record an entry and schedule a debounced flush.
    pub async fn log(&self, category: LogCategory, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            category,
            message: message.into(),
        };

        {
            let mut entries = self.entries.write().await;
            entries.push_front(entry);
            entries.truncate(MAX_LOG_ENTRIES);
        }

        self.schedule_flush();
    }

    /// Current entries, most recent first.
    pub async fn get_logs(&self) -> Vec<LogEntry> {
        self.entries.read().await.iter().cloned().collect()
    }

    /// Drop the in-memory buffer and the persisted copy.
    pub async fn clear_logs(&self) {
        self.entries.write().await.clear();
        if let Err(e) = self.storage.remove(keys::APP_LOGS).await {
            error!("Failed to clear persisted logs: {}", e);
        }
    }

    /// Persist the current buffer immediately, bypassing the debounce.
    pub async fn flush(&self) -> Result<()> {
        let snapshot: Vec<LogEntry> = self.entries.read().await.iter().cloned().collect();
        self.storage.set(keys::APP_LOGS, &snapshot).await
    }

    fn schedule_flush(&self) {
        // Only one flush may be in flight; later entries ride along with it
        if self.flush_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        let storage = Arc::clone(&self.storage);
        let entries = Arc::clone(&self.entries);
        let flush_pending = Arc::clone(&self.flush_pending);
        let delay = self.flush_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            flush_pending.store(false, Ordering::SeqCst);

            let snapshot: Vec<LogEntry> = entries.read().await.iter().cloned().collect();
            if let Err(e) = storage.set(keys::APP_LOGS, &snapshot).await {
                error!("Failed to flush {} log entries: {}", snapshot.len(), e);
            } else {
                debug!("Flushed {} log entries", snapshot.len());
            }
        });
    }
}
