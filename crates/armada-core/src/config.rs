// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Tunables for the run/job state machine and the reconciler.
///
/// Embedders construct this directly; server deployments load it through
/// [`Config::from_env`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum retry submissions per job (0 disables retries).
    ///
    /// A failed job is resubmitted while `submission_num < max_retries`;
    /// once exhausted, the run terminates with the retry-limit reason.
    pub max_retries: u32,
    /// How long a provisioning job may wait for its runner before it is
    /// terminated for lack of capacity.
    pub provisioning_timeout: Duration,
    /// Per-call timeout for backend compute operations. A timed-out call
    /// is treated as a recoverable backend error.
    pub backend_call_timeout: Duration,
    /// Base domain under which service runs are published
    /// (`<run_name>.<service_domain>`). Service submission fails when
    /// unset and no gateway is configured.
    pub service_domain: Option<String>,
    /// Default idle time (seconds) before an instance with the
    /// destroy-after-idle policy is terminated.
    pub default_termination_idle_time: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            provisioning_timeout: Duration::from_secs(600),
            backend_call_timeout: Duration::from_secs(30),
            service_domain: None,
            default_termination_idle_time: crate::models::DEFAULT_POOL_TERMINATION_IDLE_TIME,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL.
    pub database_url: String,
    /// Reconciler poll interval.
    pub reconciler_interval: Duration,
    /// Scheduler tunables.
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `ARMADA_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `ARMADA_RECONCILER_INTERVAL_SECS`: reconciler poll interval (default: 2)
    /// - `ARMADA_MAX_RETRIES`: retry submissions per job (default: 0)
    /// - `ARMADA_PROVISIONING_TIMEOUT_SECS`: runner wait limit (default: 600)
    /// - `ARMADA_BACKEND_TIMEOUT_SECS`: per-call backend timeout (default: 30)
    /// - `ARMADA_SERVICE_DOMAIN`: base domain for service runs
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("ARMADA_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("ARMADA_DATABASE_URL"))?;

        let reconciler_interval = parse_secs("ARMADA_RECONCILER_INTERVAL_SECS", 2)?;
        let max_retries: u32 = std::env::var("ARMADA_MAX_RETRIES")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("ARMADA_MAX_RETRIES", "must be an integer"))?;
        let provisioning_timeout = parse_secs("ARMADA_PROVISIONING_TIMEOUT_SECS", 600)?;
        let backend_call_timeout = parse_secs("ARMADA_BACKEND_TIMEOUT_SECS", 30)?;
        let service_domain = std::env::var("ARMADA_SERVICE_DOMAIN").ok();

        Ok(Self {
            database_url,
            reconciler_interval,
            scheduler: SchedulerConfig {
                max_retries,
                provisioning_timeout,
                backend_call_timeout,
                service_domain,
                ..SchedulerConfig::default()
            },
        })
    }
}

fn parse_secs(var: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = std::env::var(var)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(var, "must be a number of seconds"))?;
    Ok(Duration::from_secs(secs))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
