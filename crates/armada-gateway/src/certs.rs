// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SSL certificate issuance.
//!
//! Certificates are issued by an external, non-interactive agent. The
//! [`CertIssuer`] trait abstracts it so tests and cert-less deployments
//! (e.g. behind a TLS-terminating load balancer) can skip issuance.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::error::{GatewayError, Result};

/// Issues SSL certificates for freshly registered domains.
#[async_trait]
pub trait CertIssuer: Send + Sync {
    /// Obtain a certificate for `domain`. Must be non-interactive.
    async fn issue(&self, domain: &str) -> Result<()>;
}

/// Certbot-backed issuer.
///
/// Runs `certbot certonly` with the nginx authenticator. Registration is
/// email-less so the call never prompts.
pub struct Certbot {
    /// Prefix commands with `sudo` (certbot needs root on most hosts).
    pub use_sudo: bool,
}

impl Default for Certbot {
    fn default() -> Self {
        Self { use_sudo: true }
    }
}

#[async_trait]
impl CertIssuer for Certbot {
    async fn issue(&self, domain: &str) -> Result<()> {
        info!(%domain, "Running certbot");
        let mut cmd = if self.use_sudo {
            let mut c = Command::new("sudo");
            c.arg("certbot");
            c
        } else {
            Command::new("certbot")
        };
        cmd.arg("certonly")
            .args(["--non-interactive", "--agree-tos", "--register-unsafely-without-email"])
            .args(["--nginx", "--domain", domain]);
        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(GatewayError::Certbot(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(())
    }
}

/// Issuer that does nothing.
///
/// For tests and deployments where TLS is terminated elsewhere.
#[derive(Debug, Default)]
pub struct NoCerts;

#[async_trait]
impl CertIssuer for NoCerts {
    async fn issue(&self, _domain: &str) -> Result<()> {
        Ok(())
    }
}
