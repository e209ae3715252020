// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The nginx controller.
//!
//! Keeps the `domain → SiteConfig` map, renders and installs config files
//! into the sites directory and reloads nginx. A single mutex serializes
//! all mutations; the in-memory map is only updated after the file write
//! and reload both succeeded, so a failed operation leaves both the
//! directory and the map exactly as they were.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::certs::CertIssuer;
use crate::error::{GatewayError, Result};
use crate::site::SiteConfig;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct NginxConfig {
    /// Directory nginx loads site configs from.
    pub sites_dir: PathBuf,
    /// Local port of the gateway application (auth subrequests,
    /// entrypoint proxying).
    pub gateway_port: u16,
    /// Command that reloads the proxy.
    pub reload_cmd: Vec<String>,
    /// Install and remove config files through `sudo`.
    ///
    /// The sites directory is usually root-owned. With this disabled the
    /// controller writes files directly (tests, containers running as
    /// root).
    pub use_sudo: bool,
}

impl Default for NginxConfig {
    fn default() -> Self {
        Self {
            sites_dir: PathBuf::from("/etc/nginx/sites-enabled"),
            gateway_port: 8000,
            reload_cmd: vec![
                "sudo".to_string(),
                "systemctl".to_string(),
                "reload".to_string(),
                "nginx.service".to_string(),
            ],
            use_sudo: true,
        }
    }
}

/// Nginx keeps track of registered domains, updates nginx config files and
/// issues SSL certificates.
///
/// Internal state is serializable through [`Nginx::snapshot`].
pub struct Nginx {
    configs: Mutex<HashMap<String, SiteConfig>>,
    certs: Arc<dyn CertIssuer>,
    config: NginxConfig,
}

impl Nginx {
    /// Create a controller over an empty domain map.
    pub fn new(config: NginxConfig, certs: Arc<dyn CertIssuer>) -> Self {
        Self {
            configs: Mutex::new(HashMap::new()),
            certs,
            config,
        }
    }

    /// Register a service run under `domain`.
    ///
    /// Issues a certificate, installs the config and reloads the proxy.
    /// Fails if the domain is already registered.
    pub async fn register_service(
        &self,
        project: &str,
        service_id: &str,
        domain: &str,
        auth: bool,
    ) -> Result<()> {
        let site = SiteConfig::Service {
            domain: domain.to_string(),
            project: project.to_string(),
            service_id: service_id.to_string(),
            auth,
            servers: Default::default(),
        };

        let mut configs = self.configs.lock().await;
        if configs.contains_key(domain) {
            return Err(GatewayError::DomainAlreadyRegistered(domain.to_string()));
        }

        debug!(%domain, "Registering service domain");
        self.certs.issue(domain).await?;
        self.write_conf(&site).await?;
        configs.insert(domain.to_string(), site);
        drop(configs);

        info!(%domain, "Service domain is registered now");
        Ok(())
    }

    /// Register the gateway's own entrypoint under `domain`.
    pub async fn register_entrypoint(&self, domain: &str, prefix: &str) -> Result<()> {
        let site = SiteConfig::Entrypoint {
            domain: domain.to_string(),
            proxy_path: prefix.to_string(),
        };

        let mut configs = self.configs.lock().await;
        if configs.contains_key(domain) {
            return Err(GatewayError::DomainAlreadyRegistered(domain.to_string()));
        }

        debug!(%domain, "Registering entrypoint domain");
        self.certs.issue(domain).await?;
        self.write_conf(&site).await?;
        configs.insert(domain.to_string(), site);
        drop(configs);

        info!(%domain, "Entrypoint domain is registered now");
        Ok(())
    }

    /// Remove a domain: delete its config file and reload.
    pub async fn unregister_domain(&self, domain: &str) -> Result<()> {
        let mut configs = self.configs.lock().await;
        let site = configs
            .get(domain)
            .ok_or_else(|| GatewayError::DomainNotRegistered(domain.to_string()))?;

        debug!(%domain, "Unregistering domain");
        let path = self.config.sites_dir.join(site.config_name());
        self.remove_file(&path).await?;
        self.reload().await?;
        configs.remove(domain);
        drop(configs);

        info!(%domain, "Domain is unregistered now");
        Ok(())
    }

    /// Add an upstream server for a replica of a registered service.
    pub async fn add_upstream(&self, domain: &str, server: &str, replica_id: &str) -> Result<()> {
        let mut configs = self.configs.lock().await;
        let site = configs
            .get(domain)
            .ok_or_else(|| GatewayError::DomainNotRegistered(domain.to_string()))?;

        debug!(%domain, %server, "Adding upstream");

        let mut updated = site.clone();
        match &mut updated {
            SiteConfig::Service { servers, .. } => {
                servers.insert(replica_id.to_string(), server.to_string());
            }
            SiteConfig::Entrypoint { .. } => {
                return Err(GatewayError::NotAService(domain.to_string()));
            }
        }
        self.write_conf(&updated).await?;
        configs.insert(domain.to_string(), updated);
        drop(configs);

        debug!(%domain, %server, "Upstream added");
        Ok(())
    }

    /// Remove a replica's upstream server from a registered service.
    pub async fn remove_upstream(&self, domain: &str, replica_id: &str) -> Result<()> {
        let mut configs = self.configs.lock().await;
        let site = configs
            .get(domain)
            .ok_or_else(|| GatewayError::DomainNotRegistered(domain.to_string()))?;

        debug!(%domain, %replica_id, "Removing upstream");

        let mut updated = site.clone();
        match &mut updated {
            SiteConfig::Service { servers, .. } => {
                if servers.remove(replica_id).is_none() {
                    return Err(GatewayError::UpstreamNotRegistered(replica_id.to_string()));
                }
            }
            SiteConfig::Entrypoint { .. } => {
                return Err(GatewayError::NotAService(domain.to_string()));
            }
        }
        self.write_conf(&updated).await?;
        configs.insert(domain.to_string(), updated);
        drop(configs);

        debug!(%domain, %replica_id, "Upstream removed");
        Ok(())
    }

    /// Whether `domain` is currently registered.
    pub async fn is_registered(&self, domain: &str) -> bool {
        self.configs.lock().await.contains_key(domain)
    }

    /// A snapshot of the current domain map.
    pub async fn snapshot(&self) -> HashMap<String, SiteConfig> {
        self.configs.lock().await.clone()
    }

    /// Render and install a site config, reloading nginx.
    ///
    /// Rolls the file back to its previous content (or removes it, if it
    /// was newly created) when the reload fails.
    async fn write_conf(&self, site: &SiteConfig) -> Result<()> {
        let name = site.config_name();
        let path = self.config.sites_dir.join(&name);
        let content = site.render(self.config.gateway_port);

        let old = match tokio::fs::read_to_string(&path).await {
            Ok(s) => Some(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        self.install(&path, &content).await?;
        if let Err(e) = self.reload().await {
            match &old {
                Some(prev) => self.install(&path, prev).await?,
                None => self.remove_file(&path).await?,
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stage `content` in a temp file and move it into place.
    async fn install(&self, path: &Path, content: &str) -> Result<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.config.use_sudo {
            // Stage outside the sites dir; only the copy runs privileged.
            let content = content.to_string();
            let temp = tokio::task::spawn_blocking(move || -> std::io::Result<_> {
                let mut temp = tempfile::NamedTempFile::new()?;
                temp.write_all(content.as_bytes())?;
                temp.flush()?;
                Ok(temp)
            })
            .await
            .map_err(|e| GatewayError::Install {
                name: name.clone(),
                details: e.to_string(),
            })??;

            let output = Command::new("sudo")
                .arg("cp")
                .arg("-p")
                .arg(temp.path())
                .arg(path)
                .output()
                .await?;
            if !output.status.success() {
                return Err(GatewayError::Install {
                    name,
                    details: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }
        } else {
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let path = path.to_path_buf();
            let content = content.to_string();
            tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
                temp.write_all(content.as_bytes())?;
                temp.flush()?;
                // Same filesystem, so this is an atomic rename
                temp.persist(&path).map_err(|e| e.error)?;
                Ok(())
            })
            .await
            .map_err(|e| GatewayError::Install {
                name: name.clone(),
                details: e.to_string(),
            })??;
        }
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        if self.config.use_sudo {
            let output = Command::new("sudo").arg("rm").arg(path).output().await?;
            if !output.status.success() {
                return Err(GatewayError::Install {
                    name: path.to_string_lossy().into_owned(),
                    details: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let Some((program, args)) = self.config.reload_cmd.split_first() else {
            return Err(GatewayError::Reload("reload command is empty".to_string()));
        };
        let output = Command::new(program).args(args).output().await?;
        if !output.status.success() {
            return Err(GatewayError::Reload(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(())
    }
}
