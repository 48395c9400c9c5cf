//! Configuration for the sync service.
//!
//! # Example
//!
//! ```
//! use sheet_sync::SheetSyncConfig;
//! use std::time::Duration;
//!
//! // Minimal config (uses defaults)
//! let config = SheetSyncConfig::default();
//! assert_eq!(config.max_attempts, 5);
//! assert_eq!(config.refresh_interval(), Duration::from_secs(300));
//!
//! // Full config
//! let config = SheetSyncConfig {
//!     tables: vec!["Товары".into(), "Заказы".into()],
//!     db_path: "/var/lib/shop/queue.sqlite3".into(),
//!     worker_poll_interval_ms: 5_000,
//!     max_attempts: 8,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for [`SheetSync`](crate::SheetSync).
///
/// Every field except `tables` has a usable default. Deserializes from any
/// serde format; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetSyncConfig {
    /// Logical tables (sheet titles) the service caches and accepts writes for
    #[serde(default)]
    pub tables: Vec<String>,

    /// SQLite file backing the operation log
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Periodic full cache refresh interval (default: 5 minutes)
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Worker sleep when the queue is empty or a cycle failed (default: 30s)
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Attempts per operation before it is parked as failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long shutdown waits for background tasks before aborting them
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Pause after an unexpected error in the periodic refresh loop
    #[serde(default = "default_refresh_error_backoff_ms")]
    pub refresh_error_backoff_ms: u64,
}

fn default_db_path() -> String { "sheet_operations_queue.sqlite3".to_string() }
fn default_refresh_interval_ms() -> u64 { 5 * 60 * 1000 } // 5 minutes
fn default_worker_poll_interval_ms() -> u64 { 30_000 }
fn default_max_attempts() -> u32 { 5 }
fn default_shutdown_grace_ms() -> u64 { 5_000 }
fn default_refresh_error_backoff_ms() -> u64 { 60_000 }

impl Default for SheetSyncConfig {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            db_path: default_db_path(),
            refresh_interval_ms: default_refresh_interval_ms(),
            worker_poll_interval_ms: default_worker_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            refresh_error_backoff_ms: default_refresh_error_backoff_ms(),
        }
    }
}

impl SheetSyncConfig {
    /// Check for values the service cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }
        if self.db_path.trim().is_empty() {
            return Err("db_path must not be empty".into());
        }
        if self.worker_poll_interval_ms == 0 {
            return Err("worker_poll_interval_ms must be positive".into());
        }
        if self.refresh_interval_ms == 0 {
            return Err("refresh_interval_ms must be positive".into());
        }
        if let Some(blank) = self.tables.iter().find(|t| t.trim().is_empty()) {
            return Err(format!("table name '{}' is blank", blank));
        }
        Ok(())
    }

    /// Whether `table` is one of the configured tables.
    #[must_use]
    pub fn knows_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    #[must_use]
    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    #[must_use]
    pub fn refresh_error_backoff(&self) -> Duration {
        Duration::from_millis(self.refresh_error_backoff_ms)
    }
}
