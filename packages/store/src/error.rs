//! Store errors.

use lease_core::LeaseError;
use thiserror::Error;

use crate::{ConnectionId, TransactionId};

/// Errors returned by the in-memory store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection closed: {0}")]
    ConnectionClosed(ConnectionId),
    #[error("Transaction already completed: {0}")]
    TransactionCompleted(TransactionId),
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),
    #[error("Queue name must not be empty")]
    EmptyQueueName,
    #[error("Invalid store config: {0}")]
    InvalidConfig(String),
    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),
}
