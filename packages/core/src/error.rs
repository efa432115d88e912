//! Errors raised while setting up a lease.

use thiserror::Error;

/// Lease construction and configuration errors.
///
/// Failures of the backing store during acknowledge or requeue are not
/// wrapped here; they reach the caller as the store's own error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),
    #[error("Invalid lease config: {0}")]
    InvalidConfig(String),
    #[error("Keep-alive needs a running tokio runtime")]
    NoRuntime,
}
