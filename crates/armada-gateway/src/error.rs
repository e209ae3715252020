// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for armada-gateway.

use thiserror::Error;

/// Gateway errors.
///
/// Any failed config write rolls the sites directory back to its previous
/// state before one of these is returned, so callers never observe a
/// half-applied change.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// The domain is already registered with the gateway.
    #[error("Domain {0} is already registered")]
    DomainAlreadyRegistered(String),

    /// The domain is not registered with the gateway.
    #[error("Domain {0} is not registered")]
    DomainNotRegistered(String),

    /// The upstream replica is not registered for the domain.
    #[error("Upstream {0} is not registered")]
    UpstreamNotRegistered(String),

    /// The domain fronts an entrypoint, not a service with upstreams.
    #[error("Domain {0} does not front a service")]
    NotAService(String),

    /// Certificate issuance failed.
    #[error("Certbot failed:\n{0}")]
    Certbot(String),

    /// Reloading the proxy failed.
    #[error("Failed to reload nginx: {0}")]
    Reload(String),

    /// Installing or removing a config file failed.
    #[error("Failed to install config {name}: {details}")]
    Install {
        /// Config file name.
        name: String,
        /// Failure details.
        details: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
