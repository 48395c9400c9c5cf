//! Remote store boundary.
//!
//! - [`traits`]: the [`RemoteStore`](traits::RemoteStore) contract and error types
//! - [`memory`]: in-process reference implementation
//! - [`blocking`]: adapter for synchronous client libraries

pub mod traits;
pub mod memory;
pub mod blocking;
