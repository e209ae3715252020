// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for armada-core.
//!
//! The taxonomy mirrors how errors propagate through the core:
//!
//! - [`CoreError::Client`] surfaces verbatim to the caller (bad requests,
//!   invalid names, unsupported configurations).
//! - [`CoreError::Backend`] is recoverable per offer: the planner logs it,
//!   skips the offer and tries the next one. It only reaches the caller
//!   when every offer is exhausted.
//! - [`CoreError::Gateway`] rolls back the in-progress proxy change before
//!   surfacing. During run termination it is logged and does not block
//!   finalization.
//! - Everything else is unexpected; the reconciler driver catches, logs
//!   and continues with the next item.

use thiserror::Error;

use crate::backends::BackendError;
use crate::runner::RunnerError;

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while processing runs, jobs and instances.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Bad request; the message is surfaced to the caller verbatim.
    #[error("{0}")]
    Client(String),

    /// Recoverable backend failure (offer skipped, next one tried).
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Gateway (reverse-proxy) operation failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] armada_gateway::GatewayError),

    /// Runner agent call failed.
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A persisted blob failed to deserialize.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A persisted row holds a value outside the model's domain.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// The offending field.
        field: String,
        /// What was wrong with it.
        message: String,
    },

    /// An entity was not found.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Entity kind (run, job, instance, ...).
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// A client-facing bad-request error.
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// A validation error for a persisted field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// A not-found error for an entity kind and id.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_surfaces_message_verbatim() {
        let err = CoreError::client("No backends configured");
        assert_eq!(err.to_string(), "No backends configured");
    }

    #[test]
    fn test_not_found_display() {
        let err = CoreError::not_found("Run", "magic-whale-1");
        assert_eq!(err.to_string(), "Run 'magic-whale-1' not found");
    }
}
