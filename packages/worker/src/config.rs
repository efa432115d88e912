//! Worker configuration.

use std::time::Duration;

use lease_core::LeaseConfig;
use serde::{Deserialize, Serialize};

use crate::WorkerError;

/// Configuration for a polling worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Delay between fetch attempts when the queue is empty (milliseconds).
    pub poll_interval_ms: u64,
    /// Handler time budget before the job is requeued (seconds).
    pub job_timeout_secs: u64,
    /// Keep-alive settings for fetched leases.
    pub lease: LeaseConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            job_timeout_secs: 300, // 5 minutes default
            lease: LeaseConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Build a config from environment variables.
    ///
    /// - `WORKER_POLL_INTERVAL_MS` (default: `1000`)
    /// - `WORKER_JOB_TIMEOUT_SECS` (default: `300`)
    /// - lease settings as read by [`LeaseConfig::from_env`]
    pub fn from_env() -> Result<Self, WorkerError> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval_ms: parse_env("WORKER_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval_ms),
            job_timeout_secs: parse_env("WORKER_JOB_TIMEOUT_SECS")?
                .unwrap_or(defaults.job_timeout_secs),
            lease: LeaseConfig::from_env()?,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_lease(mut self, lease: LeaseConfig) -> Self {
        self.lease = lease;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

fn parse_env(var_name: &str) -> Result<Option<u64>, WorkerError> {
    let Ok(raw) = std::env::var(var_name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| WorkerError::InvalidConfig(format!("invalid {var_name}={raw} (expected a whole number)")))
}
