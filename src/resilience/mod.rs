//! Durability and retry.
//!
//! - [`oplog`]: SQLite operation log, the source of truth for undelivered writes
//! - [`retry`]: exponential backoff for local start-up operations

pub mod oplog;
pub mod retry;
