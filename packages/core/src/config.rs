//! Lease configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::LeaseError;

/// Keep-alive settings for leased items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Seconds between keep-alive queries on an open lease.
    pub keep_alive_interval_secs: u64,
    /// Trivial statement sent over the leased connection.
    pub keep_alive_query: String,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_secs: 60,
            keep_alive_query: "SELECT 1;".to_string(),
        }
    }
}

impl LeaseConfig {
    /// Build a config from environment variables.
    ///
    /// - `LEASE_KEEP_ALIVE_INTERVAL_SECS` (default: `60`)
    /// - `LEASE_KEEP_ALIVE_QUERY` (default: `SELECT 1;`)
    pub fn from_env() -> Result<Self, LeaseError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LeaseError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("LEASE_KEEP_ALIVE_INTERVAL_SECS").and_then(non_empty) {
            config.keep_alive_interval_secs = raw.parse().map_err(|_| {
                LeaseError::InvalidConfig(format!(
                    "invalid LEASE_KEEP_ALIVE_INTERVAL_SECS={raw} (expected whole seconds)"
                ))
            })?;
        }
        if let Some(query) = lookup("LEASE_KEEP_ALIVE_QUERY").and_then(non_empty) {
            config.keep_alive_query = query;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the keep-alive period, truncated to whole seconds.
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval_secs = interval.as_secs();
        self
    }

    /// Set the keep-alive statement.
    pub fn with_keep_alive_query(mut self, query: impl Into<String>) -> Self {
        self.keep_alive_query = query.into();
        self
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    /// Reject settings the keep-alive timer cannot run with.
    pub fn validate(&self) -> Result<(), LeaseError> {
        if self.keep_alive_interval_secs == 0 {
            return Err(LeaseError::InvalidConfig(
                "keep_alive_interval_secs must be greater than zero".into(),
            ));
        }
        if self.keep_alive_query.trim().is_empty() {
            return Err(LeaseError::InvalidConfig(
                "keep_alive_query must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
