// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test harness: in-memory persistence, mock backends, a mock
//! runner and a temp-dir gateway with a stubbed reload command.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use armada_core::backends::{BackendRegistry, MockCompute};
use armada_core::config::SchedulerConfig;
use armada_core::models::{
    BackendType, InstanceAvailability, InstanceOffer, InstanceRuntime, InstanceType, Profile,
    Replicas, Resources, ResourcesSpec, RunConfiguration, RunSpec,
};
use armada_core::persistence::{
    JobRecord, Persistence, ProjectRecord, RepoRecord, RunRecord, SqlitePersistence, UserRecord,
};
use armada_core::reconciler::{Reconciler, ReconcilerConfig};
use armada_core::runner::MockRunnerClient;
use armada_core::state::SchedulerState;
use armada_gateway::{Nginx, NginxConfig, NoCerts};
use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

pub const TEST_REPO_ID: &str = "test-repo";

pub struct TestContext {
    pub state: Arc<SchedulerState>,
    pub persistence: Arc<SqlitePersistence>,
    pub backends: Vec<Arc<MockCompute>>,
    pub runner: Arc<MockRunnerClient>,
    pub project: ProjectRecord,
    pub user: UserRecord,
    pub gateway_dir: TempDir,
}

impl TestContext {
    /// A context with one AWS mock backend.
    pub async fn new() -> Self {
        Self::with_backends(&[BackendType::Aws]).await
    }

    /// A context with a mock backend per given type.
    pub async fn with_backends(types: &[BackendType]) -> Self {
        Self::build(types, SchedulerConfig::default()).await
    }

    /// A context with custom scheduler tunables.
    pub async fn with_config(types: &[BackendType], config: SchedulerConfig) -> Self {
        Self::build(types, config).await
    }

    async fn build(types: &[BackendType], mut config: SchedulerConfig) -> Self {
        let persistence = Arc::new(
            SqlitePersistence::in_memory()
                .await
                .expect("in-memory database"),
        );

        let mut registry = BackendRegistry::new(Duration::from_secs(5));
        let mut backends = Vec::new();
        for ty in types {
            let mock = Arc::new(MockCompute::new(*ty));
            registry.register(mock.clone());
            backends.push(mock);
        }

        let runner = Arc::new(MockRunnerClient::new());

        let gateway_dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(gateway_dir.path().join("reload.sh"), "exit 0\n").expect("reload stub");
        let nginx = Nginx::new(
            NginxConfig {
                sites_dir: gateway_dir.path().to_path_buf(),
                gateway_port: 8000,
                reload_cmd: vec![
                    "sh".to_string(),
                    gateway_dir
                        .path()
                        .join("reload.sh")
                        .to_string_lossy()
                        .into_owned(),
                ],
                use_sudo: false,
            },
            Arc::new(NoCerts),
        );

        config.service_domain = Some("gateway.test".to_string());
        let state = Arc::new(
            SchedulerState::new(
                persistence.clone(),
                Arc::new(registry),
                runner.clone(),
                config,
            )
            .with_gateway(Arc::new(nginx)),
        );

        let project = ProjectRecord {
            id: Uuid::new_v4().to_string(),
            name: "main".to_string(),
            ssh_public_key: "ssh-ed25519 AAAATEST project".to_string(),
            ssh_private_key: "PRIVATE-KEY-MATERIAL".to_string(),
            backends: serde_json::to_string(types).expect("backend list"),
            default_pool_id: None,
            created_at: Utc::now(),
        };
        persistence
            .insert_project(&project)
            .await
            .expect("insert project");

        let user = UserRecord {
            id: Uuid::new_v4().to_string(),
            name: "alice".to_string(),
        };
        persistence.insert_user(&user).await.expect("insert user");

        let repo = RepoRecord {
            id: Uuid::new_v4().to_string(),
            project_id: project.id.clone(),
            repo_id: TEST_REPO_ID.to_string(),
        };
        persistence.insert_repo(&repo).await.expect("insert repo");

        Self {
            state,
            persistence,
            backends,
            runner,
            project,
            user,
            gateway_dir,
        }
    }

    /// The first (usually only) mock backend.
    pub fn backend(&self) -> &Arc<MockCompute> {
        &self.backends[0]
    }

    /// A reconciler over this context's state, driven manually via
    /// `tick()`.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.state.clone(),
            ReconcilerConfig {
                poll_interval: Duration::from_secs(3600),
                batch_size: 50,
            },
        )
    }

    pub async fn run_record(&self, run_id: &str) -> RunRecord {
        self.persistence
            .get_run(run_id)
            .await
            .expect("get run")
            .expect("run exists")
    }

    pub async fn run_jobs(&self, run_id: &str) -> Vec<JobRecord> {
        self.persistence
            .list_run_jobs(run_id)
            .await
            .expect("list jobs")
    }
}

/// A plain task run spec without a run name.
pub fn task_run_spec() -> RunSpec {
    RunSpec {
        run_name: None,
        repo_id: TEST_REPO_ID.to_string(),
        profile: Profile::default(),
        configuration: RunConfiguration::Task {
            commands: vec!["echo hello".to_string()],
            image: None,
            resources: ResourcesSpec::default(),
        },
    }
}

/// A service run spec with the given replica bounds.
pub fn service_run_spec(min: u32, max: u32) -> RunSpec {
    RunSpec {
        run_name: None,
        repo_id: TEST_REPO_ID.to_string(),
        profile: Profile::default(),
        configuration: RunConfiguration::Service {
            commands: vec!["python app.py".to_string()],
            image: None,
            resources: ResourcesSpec::default(),
            port: 8000,
            replicas: Replicas { min, max },
            auth: false,
        },
    }
}

/// An available shim-runtime offer satisfying the default requirements.
pub fn offer(backend: BackendType, instance_name: &str, price: f64) -> InstanceOffer {
    InstanceOffer {
        backend,
        instance: InstanceType {
            name: instance_name.to_string(),
            resources: Resources {
                cpus: 4,
                memory_mib: 16384,
                gpus: 0,
                disk_gb: 100,
                spot: false,
            },
        },
        region: "eu-west-1".to_string(),
        price,
        availability: InstanceAvailability::Available,
        instance_runtime: InstanceRuntime::Shim,
    }
}

/// An offer whose capacity is runner-only (cannot host a general VM).
pub fn runner_offer(backend: BackendType, instance_name: &str, price: f64) -> InstanceOffer {
    InstanceOffer {
        instance_runtime: InstanceRuntime::Runner,
        ..offer(backend, instance_name, price)
    }
}
