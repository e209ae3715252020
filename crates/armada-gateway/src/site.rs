// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Site configurations and their nginx rendering.
//!
//! A site config is a closed union of the two site types the gateway
//! serves: a **service** (an armada service run with per-replica
//! upstreams) and an **entrypoint** (the gateway's own API proxied under a
//! path prefix). Configs are serializable so the controller state can be
//! snapshotted and restored.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// A registered site, keyed by domain in the controller.
///
/// Discriminated on a `type` tag when serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SiteConfig {
    /// A service run fronted by the gateway.
    Service {
        /// Domain the service is served on.
        domain: String,
        /// Project that owns the service.
        project: String,
        /// Identifier of the service run.
        service_id: String,
        /// Whether requests must pass the gateway's auth endpoint.
        auth: bool,
        /// Upstream servers keyed by replica id.
        ///
        /// BTreeMap so renders are deterministic for a given set of
        /// replicas.
        #[serde(default)]
        servers: BTreeMap<String, String>,
    },
    /// The gateway's own entrypoint, proxied under a path prefix.
    Entrypoint {
        /// Domain the entrypoint is served on.
        domain: String,
        /// Path prefix forwarded to the gateway application.
        proxy_path: String,
    },
}

impl SiteConfig {
    /// The domain this site is registered for.
    pub fn domain(&self) -> &str {
        match self {
            Self::Service { domain, .. } => domain,
            Self::Entrypoint { domain, .. } => domain,
        }
    }

    /// Config file name in the sites directory: `443-<domain>.conf`.
    pub fn config_name(&self) -> String {
        format!("443-{}.conf", self.domain())
    }

    /// Render the nginx server block for this site.
    ///
    /// `gateway_port` is the local port of the gateway application used
    /// for auth subrequests and entrypoint proxying.
    pub fn render(&self, gateway_port: u16) -> String {
        match self {
            Self::Service {
                domain,
                project,
                service_id,
                auth,
                servers,
            } => render_service(domain, project, service_id, *auth, servers, gateway_port),
            Self::Entrypoint { domain, proxy_path } => {
                render_entrypoint(domain, proxy_path, gateway_port)
            }
        }
    }
}

fn upstream_name(service_id: &str) -> String {
    // nginx upstream names cannot contain dashes followed by digits in
    // some older parsers; underscores are always safe
    format!("service_{}", service_id.replace('-', "_"))
}

fn render_service(
    domain: &str,
    project: &str,
    service_id: &str,
    auth: bool,
    servers: &BTreeMap<String, String>,
    gateway_port: u16,
) -> String {
    let upstream = upstream_name(service_id);
    let mut out = String::new();

    if !servers.is_empty() {
        let _ = writeln!(out, "upstream {upstream} {{");
        for (replica_id, server) in servers {
            let _ = writeln!(out, "    server {server};  # replica {replica_id}");
        }
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "server {{");
    let _ = writeln!(out, "    listen 443 ssl;");
    let _ = writeln!(out, "    server_name {domain};");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "    ssl_certificate /etc/letsencrypt/live/{domain}/fullchain.pem;"
    );
    let _ = writeln!(
        out,
        "    ssl_certificate_key /etc/letsencrypt/live/{domain}/privkey.pem;"
    );
    let _ = writeln!(out);

    if auth {
        let _ = writeln!(out, "    location = /_armada_auth {{");
        let _ = writeln!(out, "        internal;");
        let _ = writeln!(
            out,
            "        proxy_pass http://127.0.0.1:{gateway_port}/auth/{project};"
        );
        let _ = writeln!(out, "        proxy_pass_request_body off;");
        let _ = writeln!(out, "        proxy_set_header Content-Length \"\";");
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "    location / {{");
    if auth {
        let _ = writeln!(out, "        auth_request /_armada_auth;");
    }
    if servers.is_empty() {
        // No replicas yet: the service is still provisioning
        let _ = writeln!(out, "        return 503;");
    } else {
        let _ = writeln!(out, "        proxy_pass http://{upstream};");
        let _ = writeln!(out, "        proxy_set_header Host $host;");
        let _ = writeln!(out, "        proxy_set_header X-Real-IP $remote_addr;");
        let _ = writeln!(out, "        proxy_http_version 1.1;");
        let _ = writeln!(out, "        proxy_set_header Upgrade $http_upgrade;");
        let _ = writeln!(out, "        proxy_set_header Connection \"upgrade\";");
    }
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    out
}

fn render_entrypoint(domain: &str, proxy_path: &str, gateway_port: u16) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "server {{");
    let _ = writeln!(out, "    listen 443 ssl;");
    let _ = writeln!(out, "    server_name {domain};");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "    ssl_certificate /etc/letsencrypt/live/{domain}/fullchain.pem;"
    );
    let _ = writeln!(
        out,
        "    ssl_certificate_key /etc/letsencrypt/live/{domain}/privkey.pem;"
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "    location / {{");
    let _ = writeln!(
        out,
        "        proxy_pass http://127.0.0.1:{gateway_port}/{proxy_path}/;"
    );
    let _ = writeln!(out, "        proxy_set_header Host $host;");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_site(servers: &[(&str, &str)]) -> SiteConfig {
        SiteConfig::Service {
            domain: "app.gateway.test".to_string(),
            project: "main".to_string(),
            service_id: "svc-1".to_string(),
            auth: false,
            servers: servers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_config_name() {
        let site = service_site(&[]);
        assert_eq!(site.config_name(), "443-app.gateway.test.conf");
    }

    #[test]
    fn test_service_without_replicas_returns_503() {
        let rendered = service_site(&[]).render(8000);
        assert!(rendered.contains("return 503;"));
        assert!(!rendered.contains("upstream"));
    }

    #[test]
    fn test_service_with_replicas_renders_upstream() {
        let rendered = service_site(&[("r1", "10.0.0.1:8080"), ("r2", "10.0.0.2:8080")]).render(8000);
        assert!(rendered.contains("upstream service_svc_1 {"));
        assert!(rendered.contains("server 10.0.0.1:8080;"));
        assert!(rendered.contains("server 10.0.0.2:8080;"));
        assert!(rendered.contains("proxy_pass http://service_svc_1;"));
    }

    #[test]
    fn test_auth_renders_auth_request() {
        let site = SiteConfig::Service {
            domain: "app.gateway.test".to_string(),
            project: "main".to_string(),
            service_id: "svc-1".to_string(),
            auth: true,
            servers: BTreeMap::from([("r1".to_string(), "10.0.0.1:8080".to_string())]),
        };
        let rendered = site.render(8000);
        assert!(rendered.contains("auth_request /_armada_auth;"));
        assert!(rendered.contains("/auth/main"));
    }

    #[test]
    fn test_entrypoint_renders_prefix() {
        let site = SiteConfig::Entrypoint {
            domain: "gateway.test".to_string(),
            proxy_path: "api".to_string(),
        };
        let rendered = site.render(8000);
        assert!(rendered.contains("proxy_pass http://127.0.0.1:8000/api/;"));
    }

    #[test]
    fn test_serde_roundtrip_discriminates_on_type() {
        let site = service_site(&[("r1", "10.0.0.1:8080")]);
        let json = serde_json::to_string(&site).unwrap();
        assert!(json.contains("\"type\":\"service\""));
        let back: SiteConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.domain(), "app.gateway.test");
    }
}
