//! Store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Configuration for the in-memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Close sessions idle for longer than this many seconds, like a pooler would.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

impl StoreConfig {
    /// A store that never cuts idle sessions.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Build a config from environment variables.
    ///
    /// - `STORE_IDLE_TIMEOUT_SECS` (optional, unset means sessions never idle out)
    pub fn from_env() -> Result<Self, StoreError> {
        let idle_timeout_secs = match std::env::var("STORE_IDLE_TIMEOUT_SECS") {
            Ok(raw) if !raw.trim().is_empty() => {
                Some(raw.trim().parse().map_err(|_| {
                    StoreError::InvalidConfig(format!(
                        "invalid STORE_IDLE_TIMEOUT_SECS={raw} (expected whole seconds)"
                    ))
                })?)
            }
            _ => None,
        };
        Ok(Self { idle_timeout_secs })
    }

    /// Cut sessions idle for longer than `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}
