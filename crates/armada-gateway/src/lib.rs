// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Armada Gateway - Reverse-Proxy Controller
//!
//! This crate controls the nginx instance that fronts armada service runs.
//! It keeps track of registered domains, renders and installs site configs,
//! issues SSL certificates, and manages per-replica upstreams.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                armada-core                  │
//! │      (run submission / job lifecycle)       │
//! └──────────────────────┬──────────────────────┘
//!                        │ register / upstreams
//!                        ▼
//! ┌─────────────────────────────────────────────┐
//! │              Nginx controller               │
//! │   domain → SiteConfig map (single mutex)    │
//! └──────────┬──────────────────┬───────────────┘
//!            │ writes           │ subprocess
//!            ▼                  ▼
//!   /etc/nginx/sites-enabled   nginx reload / certbot
//! ```
//!
//! # Concurrency
//!
//! All mutations of the domain map and the config directory go through a
//! single in-process mutex. The config directory is shared with the nginx
//! process itself, so every write is atomic from nginx's point of view:
//! the content is staged in a temp file and then moved into place. When a
//! reload fails, the previous file content is restored byte-for-byte (or
//! the file is removed if it was newly created) before the error is
//! surfaced.
//!
//! # Modules
//!
//! - [`certs`]: SSL certificate issuance ([`certs::CertIssuer`] trait, certbot implementation)
//! - [`error`]: Gateway error type
//! - [`nginx`]: The [`nginx::Nginx`] controller
//! - [`site`]: Site config variants and rendering

#![deny(missing_docs)]

/// SSL certificate issuance.
pub mod certs;

/// Error types for gateway operations.
pub mod error;

/// Nginx controller: domain registration, upstreams, reloads.
pub mod nginx;

/// Site configurations and their nginx rendering.
pub mod site;

pub use certs::{CertIssuer, Certbot, NoCerts};
pub use error::{GatewayError, Result};
pub use nginx::{Nginx, NginxConfig};
pub use site::SiteConfig;
