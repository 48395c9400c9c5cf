// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff for local, short-lived failures.
//!
//! Used around opening the operation log and around the initial table
//! fetches. Remote *writes* are never retried here: their retries are
//! durable and owned by the operation log.
//!
//! # Example
//!
//! ```
//! use sheet_sync::RetryConfig;
//! use std::time::Duration;
//!
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_attempts, 5);
//!
//! let delays: Vec<Duration> = startup.backoff().take(3).collect();
//! assert_eq!(delays, vec![
//!     Duration::from_millis(200),
//!     Duration::from_millis(400),
//!     Duration::from_millis(800),
//! ]);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff policy for a retried local operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts including the first one
    pub max_attempts: usize,
}

impl RetryConfig {
    /// Opening the operation log: a bad path or permissions problem should
    /// surface within a couple of seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Initial population of one table. The remote store is rate limited,
    /// so back off generously and give up early; the periodic refresh will
    /// try again later anyway.
    #[must_use]
    pub fn remote_fetch() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            factor: 3.0,
        }
    }

    /// Single attempt, no waiting.
    #[must_use]
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Delays to sleep between consecutive attempts.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay,
            max: self.max_delay,
            factor: self.factor,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::startup()
    }
}

/// Endless iterator of capped, exponentially growing delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    factor: f64,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next.min(self.max);
        let scaled = (self.next.as_nanos() as f64 * self.factor).round();
        self.next = Duration::from_nanos(scaled.min(u64::MAX as f64) as u64).min(self.max);
        Some(current)
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is used up.
///
/// Returns the last error when every attempt failed.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delays = config.backoff();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(val) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(val);
            }
            Err(err) if attempt >= config.max_attempts.max(1) => {
                warn!(operation = operation_name, attempt, error = %err, "Operation failed, giving up");
                return Err(err);
            }
            Err(err) => {
                let delay = delays.next().unwrap_or(config.max_delay);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %err,
                    retry_in = ?delay,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
