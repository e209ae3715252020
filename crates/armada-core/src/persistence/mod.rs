// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for armada-core.
//!
//! Row records mirror the storage schema: statuses and policies are kept
//! in their string form, spec and offer blobs as JSON strings. Typed
//! accessors parse them on demand and report schema drift as validation
//! errors, which listing paths tolerate by excluding the row.

pub mod sqlite;

pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{CoreError, Result};
use crate::models::{
    BackendType, InstanceOffer, InstanceStatus, JobSpec, JobStatus, JobTerminationReason,
    ProvisioningData, RunSpec, RunStatus, RunTerminationReason, ServiceSpec, TerminationPolicy,
};

// ============================================================================
// Record Types
// ============================================================================

/// A project row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRecord {
    /// Project id.
    pub id: String,
    /// Unique project name.
    pub name: String,
    /// Public half of the project keypair.
    pub ssh_public_key: String,
    /// Private half of the project keypair.
    pub ssh_private_key: String,
    /// JSON array of configured backend types.
    pub backends: String,
    /// Default pool reference, once one exists.
    pub default_pool_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ProjectRecord {
    /// The project's configured backend types.
    pub fn backend_types(&self) -> Result<Vec<BackendType>> {
        serde_json::from_str(&self.backends)
            .map_err(|e| CoreError::validation("backends", e.to_string()))
    }
}

/// A user row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    /// User id.
    pub id: String,
    /// Unique user name.
    pub name: String,
}

/// A repo row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RepoRecord {
    /// Row id.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Client-facing repo identifier.
    pub repo_id: String,
}

/// A pool row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PoolRecord {
    /// Pool id.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Pool name, unique per project among live pools.
    pub name: String,
    /// Whether this is the project's default pool.
    pub is_default: bool,
    /// Soft-delete flag.
    pub deleted: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// An instance row.
#[derive(Debug, Clone, sqlx::FromRow)]
#[allow(missing_docs)]
pub struct InstanceRecord {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub pool_id: String,
    pub backend: String,
    pub region: String,
    pub price: f64,
    /// Serialized offer the instance was provisioned from.
    pub offer: String,
    pub provisioning_data: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
    /// Set when the instance last became idle.
    pub idle_since: Option<DateTime<Utc>>,
    pub termination_policy: String,
    /// Idle seconds before a destroy-after-idle instance is terminated.
    pub termination_idle_time: i64,
    /// The job currently bound to this instance.
    pub job_id: Option<String>,
}

impl InstanceRecord {
    /// Parsed instance status.
    pub fn instance_status(&self) -> Result<InstanceStatus> {
        InstanceStatus::parse(&self.status)
            .ok_or_else(|| CoreError::validation("status", format!("unknown: {}", self.status)))
    }

    /// Parsed termination policy.
    pub fn policy(&self) -> Result<TerminationPolicy> {
        TerminationPolicy::parse(&self.termination_policy).ok_or_else(|| {
            CoreError::validation(
                "termination_policy",
                format!("unknown: {}", self.termination_policy),
            )
        })
    }

    /// The offer snapshot the instance was provisioned from.
    pub fn instance_offer(&self) -> Result<InstanceOffer> {
        serde_json::from_str(&self.offer)
            .map_err(|e| CoreError::validation("offer", e.to_string()))
    }

    /// Provisioning data, if the instance was launched.
    pub fn provisioning(&self) -> Result<Option<ProvisioningData>> {
        match &self.provisioning_data {
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| CoreError::validation("provisioning_data", e.to_string())),
            None => Ok(None),
        }
    }
}

/// A run row.
#[derive(Debug, Clone, sqlx::FromRow)]
#[allow(missing_docs)]
pub struct RunRecord {
    pub id: String,
    pub project_id: String,
    pub repo_id: String,
    pub user_id: String,
    pub run_name: String,
    pub submitted_at: DateTime<Utc>,
    pub last_processed_at: DateTime<Utc>,
    pub status: String,
    pub termination_reason: Option<String>,
    /// Serialized run spec.
    pub run_spec: String,
    pub service_spec: Option<String>,
    pub gateway_id: Option<String>,
    pub deleted: bool,
}

impl RunRecord {
    /// Parsed run status.
    pub fn run_status(&self) -> Result<RunStatus> {
        RunStatus::parse(&self.status)
            .ok_or_else(|| CoreError::validation("status", format!("unknown: {}", self.status)))
    }

    /// Parsed termination reason, when set.
    pub fn reason(&self) -> Result<Option<RunTerminationReason>> {
        match &self.termination_reason {
            Some(raw) => RunTerminationReason::parse(raw).map(Some).ok_or_else(|| {
                CoreError::validation("termination_reason", format!("unknown: {raw}"))
            }),
            None => Ok(None),
        }
    }

    /// The run spec the run was submitted with.
    pub fn spec(&self) -> Result<RunSpec> {
        serde_json::from_str(&self.run_spec)
            .map_err(|e| CoreError::validation("run_spec", e.to_string()))
    }

    /// The service spec, for service runs.
    pub fn service(&self) -> Result<Option<ServiceSpec>> {
        match &self.service_spec {
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| CoreError::validation("service_spec", e.to_string())),
            None => Ok(None),
        }
    }
}

/// A job row. One row per submission; retries insert a new row with an
/// incremented `submission_num`.
#[derive(Debug, Clone, sqlx::FromRow)]
#[allow(missing_docs)]
pub struct JobRecord {
    pub id: String,
    pub project_id: String,
    pub run_id: String,
    pub run_name: String,
    pub job_num: i64,
    pub job_name: String,
    pub replica_num: i64,
    pub submission_num: i64,
    pub submitted_at: DateTime<Utc>,
    pub last_processed_at: DateTime<Utc>,
    pub status: String,
    pub termination_reason: Option<String>,
    /// Serialized job spec.
    pub job_spec: String,
    pub provisioning_data: Option<String>,
    /// The instance this submission is bound to.
    pub instance_id: Option<String>,
}

impl JobRecord {
    /// Parsed job status.
    pub fn job_status(&self) -> Result<JobStatus> {
        JobStatus::parse(&self.status)
            .ok_or_else(|| CoreError::validation("status", format!("unknown: {}", self.status)))
    }

    /// Parsed termination reason, when set.
    pub fn reason(&self) -> Result<Option<JobTerminationReason>> {
        match &self.termination_reason {
            Some(raw) => JobTerminationReason::parse(raw).map(Some).ok_or_else(|| {
                CoreError::validation("termination_reason", format!("unknown: {raw}"))
            }),
            None => Ok(None),
        }
    }

    /// The job spec.
    pub fn spec(&self) -> Result<JobSpec> {
        serde_json::from_str(&self.job_spec)
            .map_err(|e| CoreError::validation("job_spec", e.to_string()))
    }

    /// Provisioning data, once an instance was bound.
    pub fn provisioning(&self) -> Result<Option<ProvisioningData>> {
        match &self.provisioning_data {
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| CoreError::validation("provisioning_data", e.to_string())),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Persistence Trait
// ============================================================================

/// Storage interface used by the orchestration core.
///
/// Composite operations (`create_run_with_jobs`, `set_default_pool`) are
/// transactional: they either commit fully or leave no trace.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // Projects / users / repos

    async fn insert_project(&self, project: &ProjectRecord) -> Result<()>;

    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>>;

    async fn get_project_by_name(&self, name: &str) -> Result<Option<ProjectRecord>>;

    async fn insert_user(&self, user: &UserRecord) -> Result<()>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>>;

    async fn insert_repo(&self, repo: &RepoRecord) -> Result<()>;

    async fn get_repo(&self, project_id: &str, repo_id: &str) -> Result<Option<RepoRecord>>;

    // Pools

    async fn insert_pool(&self, pool: &PoolRecord) -> Result<()>;

    async fn get_pool(&self, pool_id: &str) -> Result<Option<PoolRecord>>;

    async fn get_pool_by_name(&self, project_id: &str, name: &str) -> Result<Option<PoolRecord>>;

    async fn get_default_pool(&self, project_id: &str) -> Result<Option<PoolRecord>>;

    async fn list_pools(&self, project_id: &str) -> Result<Vec<PoolRecord>>;

    async fn set_default_pool(&self, project_id: &str, pool_id: &str) -> Result<()>;

    async fn mark_pool_deleted(&self, pool_id: &str) -> Result<()>;

    // Instances

    async fn insert_instance(&self, instance: &InstanceRecord) -> Result<()>;

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>>;

    async fn list_pool_instances(&self, pool_id: &str) -> Result<Vec<InstanceRecord>>;

    async fn list_instances_by_status(&self, status: &str) -> Result<Vec<InstanceRecord>>;

    /// Write back an instance's mutable fields (status, job binding,
    /// idle/termination timestamps, provisioning data).
    async fn update_instance(&self, instance: &InstanceRecord) -> Result<()>;

    // Runs

    /// Insert a run and all of its initial job rows in one transaction.
    async fn create_run_with_jobs(&self, run: &RunRecord, jobs: &[JobRecord]) -> Result<()>;

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    async fn get_run_by_name(&self, project_id: &str, run_name: &str)
    -> Result<Option<RunRecord>>;

    async fn list_project_runs(
        &self,
        project_id: &str,
        repo_id: Option<&str>,
    ) -> Result<Vec<RunRecord>>;

    async fn list_runs_by_names(
        &self,
        project_id: &str,
        names: &[String],
    ) -> Result<Vec<RunRecord>>;

    async fn list_runs_by_statuses(&self, statuses: &[&str], limit: i64)
    -> Result<Vec<RunRecord>>;

    async fn update_run_status(
        &self,
        run_id: &str,
        status: &str,
        termination_reason: Option<&str>,
    ) -> Result<()>;

    async fn update_run_last_processed(&self, run_id: &str, ts: DateTime<Utc>) -> Result<()>;

    async fn mark_runs_deleted(&self, project_id: &str, names: &[String]) -> Result<()>;

    // Jobs

    async fn insert_job(&self, job: &JobRecord) -> Result<()>;

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// Jobs of a run ordered by (replica_num, job_num, submission_num).
    async fn list_run_jobs(&self, run_id: &str) -> Result<Vec<JobRecord>>;

    /// Jobs in any of the given statuses, least recently processed first.
    async fn list_jobs_by_statuses(&self, statuses: &[&str], limit: i64)
    -> Result<Vec<JobRecord>>;

    async fn update_job_status(
        &self,
        job_id: &str,
        status: &str,
        termination_reason: Option<&str>,
    ) -> Result<()>;

    async fn update_job_provisioning(
        &self,
        job_id: &str,
        provisioning_data: &str,
        instance_id: Option<&str>,
    ) -> Result<()>;

    async fn update_job_last_processed(&self, job_id: &str, ts: DateTime<Utc>) -> Result<()>;
}
