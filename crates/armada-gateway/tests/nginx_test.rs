// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the nginx controller.
//!
//! The proxy reload is stubbed with a shell script whose exit code the
//! tests flip, so rollback behavior can be exercised without nginx.

use std::sync::Arc;

use armada_gateway::{GatewayError, Nginx, NginxConfig, NoCerts, SiteConfig};
use tempfile::TempDir;

struct TestGateway {
    nginx: Nginx,
    dir: TempDir,
}

impl TestGateway {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("reload.sh"), "exit 0\n").expect("write reload stub");
        let config = NginxConfig {
            sites_dir: dir.path().to_path_buf(),
            gateway_port: 8000,
            reload_cmd: vec![
                "sh".to_string(),
                dir.path().join("reload.sh").to_string_lossy().into_owned(),
            ],
            use_sudo: false,
        };
        let nginx = Nginx::new(config, Arc::new(NoCerts));
        Self { nginx, dir }
    }

    fn set_reload_fails(&self, fails: bool) {
        let body = if fails { "exit 1\n" } else { "exit 0\n" };
        std::fs::write(self.dir.path().join("reload.sh"), body).expect("write reload stub");
    }

    fn conf_path(&self, domain: &str) -> std::path::PathBuf {
        self.dir.path().join(format!("443-{domain}.conf"))
    }

    fn read_conf(&self, domain: &str) -> String {
        std::fs::read_to_string(self.conf_path(domain)).expect("read conf")
    }
}

#[tokio::test]
async fn test_register_service_writes_config() {
    let gw = TestGateway::new();
    gw.nginx
        .register_service("main", "svc-1", "app.gateway.test", false)
        .await
        .expect("register");

    assert!(gw.nginx.is_registered("app.gateway.test").await);
    let conf = gw.read_conf("app.gateway.test");
    assert!(conf.contains("server_name app.gateway.test;"));
    assert!(conf.contains("return 503;"));
}

#[tokio::test]
async fn test_register_duplicate_domain_rejected() {
    let gw = TestGateway::new();
    gw.nginx
        .register_service("main", "svc-1", "app.gateway.test", false)
        .await
        .expect("register");
    let err = gw
        .nginx
        .register_service("main", "svc-2", "app.gateway.test", false)
        .await
        .expect_err("duplicate must fail");
    assert!(matches!(err, GatewayError::DomainAlreadyRegistered(_)));
}

#[tokio::test]
async fn test_register_entrypoint() {
    let gw = TestGateway::new();
    gw.nginx
        .register_entrypoint("gateway.test", "api")
        .await
        .expect("register");
    let conf = gw.read_conf("gateway.test");
    assert!(conf.contains("proxy_pass http://127.0.0.1:8000/api/;"));
}

#[tokio::test]
async fn test_add_and_remove_upstream() {
    let gw = TestGateway::new();
    gw.nginx
        .register_service("main", "svc-1", "app.gateway.test", false)
        .await
        .expect("register");

    gw.nginx
        .add_upstream("app.gateway.test", "10.0.0.1:8080", "replica-0")
        .await
        .expect("add upstream");
    let conf = gw.read_conf("app.gateway.test");
    assert!(conf.contains("server 10.0.0.1:8080;"));
    assert!(!conf.contains("return 503;"));

    gw.nginx
        .remove_upstream("app.gateway.test", "replica-0")
        .await
        .expect("remove upstream");
    let conf = gw.read_conf("app.gateway.test");
    assert!(!conf.contains("10.0.0.1:8080"));

    let err = gw
        .nginx
        .remove_upstream("app.gateway.test", "replica-0")
        .await
        .expect_err("unknown replica must fail");
    assert!(matches!(err, GatewayError::UpstreamNotRegistered(_)));
}

#[tokio::test]
async fn test_upstream_for_unknown_domain_rejected() {
    let gw = TestGateway::new();
    let err = gw
        .nginx
        .add_upstream("missing.gateway.test", "10.0.0.1:8080", "replica-0")
        .await
        .expect_err("unknown domain must fail");
    assert!(matches!(err, GatewayError::DomainNotRegistered(_)));
}

#[tokio::test]
async fn test_unregister_removes_file() {
    let gw = TestGateway::new();
    gw.nginx
        .register_service("main", "svc-1", "app.gateway.test", false)
        .await
        .expect("register");
    gw.nginx
        .unregister_domain("app.gateway.test")
        .await
        .expect("unregister");

    assert!(!gw.nginx.is_registered("app.gateway.test").await);
    assert!(!gw.conf_path("app.gateway.test").exists());
}

#[tokio::test]
async fn test_failed_register_leaves_no_file() {
    let gw = TestGateway::new();
    gw.set_reload_fails(true);

    let err = gw
        .nginx
        .register_service("main", "svc-1", "app.gateway.test", false)
        .await
        .expect_err("register must fail when reload fails");
    assert!(matches!(err, GatewayError::Reload(_)));

    // The newly created file was deleted and nothing was registered
    assert!(!gw.conf_path("app.gateway.test").exists());
    assert!(!gw.nginx.is_registered("app.gateway.test").await);
}

#[tokio::test]
async fn test_failed_upstream_write_restores_previous_config() {
    let gw = TestGateway::new();
    gw.nginx
        .register_service("main", "svc-1", "app.gateway.test", false)
        .await
        .expect("register");
    gw.nginx
        .add_upstream("app.gateway.test", "10.0.0.1:8080", "replica-0")
        .await
        .expect("add upstream");
    let before = gw.read_conf("app.gateway.test");

    gw.set_reload_fails(true);
    let err = gw
        .nginx
        .add_upstream("app.gateway.test", "10.0.0.2:8080", "replica-1")
        .await
        .expect_err("add must fail when reload fails");
    assert!(matches!(err, GatewayError::Reload(_)));

    // Prior config restored byte-for-byte, in-memory state unchanged
    assert_eq!(gw.read_conf("app.gateway.test"), before);
    let snapshot = gw.nginx.snapshot().await;
    match snapshot.get("app.gateway.test").expect("still registered") {
        SiteConfig::Service { servers, .. } => {
            assert_eq!(servers.len(), 1);
            assert!(servers.contains_key("replica-0"));
        }
        other => panic!("unexpected site config: {other:?}"),
    }
}
