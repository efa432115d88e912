//! Leased queue items for transactional job fetching.
//!
//! This crate contains the handle a consumer holds between dequeuing a job
//! and acknowledging or requeuing it:
//! - `LeasedItem` owns the connection and row-locking transaction
//! - `ConnectionPool`, `StoreConnection` and `StoreTransaction` describe the backing store
//! - `LeaseConfig` controls the keep-alive heartbeat

mod config;
mod error;
mod item;
mod lease;
mod store;

pub use config::LeaseConfig;
pub use error::LeaseError;
pub use item::{ItemId, QueueName};
pub use lease::{LeaseBuilder, LeasedItem};
pub use store::{ConnectionPool, StoreConnection, StoreErrorOf, StoreTransaction, TransactionOf};
