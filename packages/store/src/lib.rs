//! In-memory transactional backing store for leased queue items.
//!
//! This crate provides a queue table with row-level locks, sessions and
//! transactions that satisfy the `lease_core` store contract, and a pool
//! that hands leases out to consumers.
//!
//! An optional idle timeout mimics a proxy that cuts idle sessions, which
//! is what the lease keep-alive exists to prevent.

mod config;
mod connection;
mod error;
mod ids;
mod memory;
mod pool;

pub use config::StoreConfig;
pub use connection::{MemoryConnection, MemoryTransaction};
pub use error::StoreError;
pub use ids::{ConnectionId, TransactionId};
pub use memory::{MemoryStore, StoreStats};
pub use pool::{FetchedJob, MemoryPool};
