// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::{CoreError, Result};

use super::{
    InstanceRecord, JobRecord, Persistence, PoolRecord, ProjectRecord, RepoRecord, RunRecord,
    UserRecord,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a persistence provider from an existing pool.
    ///
    /// The caller is responsible for running [`SqlitePersistence::migrate`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a persistence provider from a file path.
    ///
    /// Creates parent directories and the database file as needed,
    /// connects with sensible defaults and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::Other(format!("Failed to create directory {parent:?}: {e}"))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new().max_connections(5).connect(&url).await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Create an in-memory database with migrations applied.
    ///
    /// A single connection is used so every operation sees the same
    /// memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations. Safe to call multiple times.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const RUN_COLUMNS: &str = "id, project_id, repo_id, user_id, run_name, submitted_at, \
     last_processed_at, status, termination_reason, run_spec, service_spec, gateway_id, deleted";

const JOB_COLUMNS: &str = "id, project_id, run_id, run_name, job_num, job_name, replica_num, \
     submission_num, submitted_at, last_processed_at, status, termination_reason, job_spec, \
     provisioning_data, instance_id";

const INSTANCE_COLUMNS: &str = "id, name, project_id, pool_id, backend, region, price, offer, \
     provisioning_data, status, created_at, started_at, terminated_at, idle_since, \
     termination_policy, termination_idle_time, job_id";

/// Placeholder list (`?, ?, ...`) for a dynamic IN clause.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

async fn insert_job_stmt<'e, E>(executor: E, job: &JobRecord) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO jobs (id, project_id, run_id, run_name, job_num, job_name, replica_num, \
         submission_num, submitted_at, last_processed_at, status, termination_reason, job_spec, \
         provisioning_data, instance_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&job.id)
    .bind(&job.project_id)
    .bind(&job.run_id)
    .bind(&job.run_name)
    .bind(job.job_num)
    .bind(&job.job_name)
    .bind(job.replica_num)
    .bind(job.submission_num)
    .bind(job.submitted_at)
    .bind(job.last_processed_at)
    .bind(&job.status)
    .bind(&job.termination_reason)
    .bind(&job.job_spec)
    .bind(&job.provisioning_data)
    .bind(&job.instance_id)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn insert_project(&self, project: &ProjectRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO projects (id, name, ssh_public_key, ssh_private_key, backends, \
             default_pool_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.ssh_public_key)
        .bind(&project.ssh_private_key)
        .bind(&project.backends)
        .bind(&project.default_pool_id)
        .bind(project.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let record = sqlx::query_as::<_, ProjectRecord>(
            "SELECT id, name, ssh_public_key, ssh_private_key, backends, default_pool_id, \
             created_at FROM projects WHERE id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_project_by_name(&self, name: &str) -> Result<Option<ProjectRecord>> {
        let record = sqlx::query_as::<_, ProjectRecord>(
            "SELECT id, name, ssh_public_key, ssh_private_key, backends, default_pool_id, \
             created_at FROM projects WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<()> {
        sqlx::query("INSERT INTO users (id, name) VALUES (?, ?)")
            .bind(&user.id)
            .bind(&user.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT id, name FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn insert_repo(&self, repo: &RepoRecord) -> Result<()> {
        sqlx::query("INSERT INTO repos (id, project_id, repo_id) VALUES (?, ?, ?)")
            .bind(&repo.id)
            .bind(&repo.project_id)
            .bind(&repo.repo_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_repo(&self, project_id: &str, repo_id: &str) -> Result<Option<RepoRecord>> {
        let record = sqlx::query_as::<_, RepoRecord>(
            "SELECT id, project_id, repo_id FROM repos WHERE project_id = ? AND repo_id = ?",
        )
        .bind(project_id)
        .bind(repo_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn insert_pool(&self, pool: &PoolRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO pools (id, project_id, name, is_default, deleted, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&pool.id)
        .bind(&pool.project_id)
        .bind(&pool.name)
        .bind(pool.is_default)
        .bind(pool.deleted)
        .bind(pool.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_pool(&self, pool_id: &str) -> Result<Option<PoolRecord>> {
        let record = sqlx::query_as::<_, PoolRecord>(
            "SELECT id, project_id, name, is_default, deleted, created_at FROM pools \
             WHERE id = ?",
        )
        .bind(pool_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_pool_by_name(&self, project_id: &str, name: &str) -> Result<Option<PoolRecord>> {
        let record = sqlx::query_as::<_, PoolRecord>(
            "SELECT id, project_id, name, is_default, deleted, created_at FROM pools \
             WHERE project_id = ? AND name = ? AND deleted = 0",
        )
        .bind(project_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn get_default_pool(&self, project_id: &str) -> Result<Option<PoolRecord>> {
        let record = sqlx::query_as::<_, PoolRecord>(
            "SELECT id, project_id, name, is_default, deleted, created_at FROM pools \
             WHERE project_id = ? AND is_default = 1 AND deleted = 0",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_pools(&self, project_id: &str) -> Result<Vec<PoolRecord>> {
        let records = sqlx::query_as::<_, PoolRecord>(
            "SELECT id, project_id, name, is_default, deleted, created_at FROM pools \
             WHERE project_id = ? AND deleted = 0 ORDER BY created_at",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn set_default_pool(&self, project_id: &str, pool_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE pools SET is_default = 0 WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE pools SET is_default = 1 WHERE id = ?")
            .bind(pool_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE projects SET default_pool_id = ? WHERE id = ?")
            .bind(pool_id)
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_pool_deleted(&self, pool_id: &str) -> Result<()> {
        sqlx::query("UPDATE pools SET deleted = 1, is_default = 0 WHERE id = ?")
            .bind(pool_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_instance(&self, instance: &InstanceRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO instances (id, name, project_id, pool_id, backend, region, price, \
             offer, provisioning_data, status, created_at, started_at, terminated_at, \
             idle_since, termination_policy, termination_idle_time, job_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&instance.id)
        .bind(&instance.name)
        .bind(&instance.project_id)
        .bind(&instance.pool_id)
        .bind(&instance.backend)
        .bind(&instance.region)
        .bind(instance.price)
        .bind(&instance.offer)
        .bind(&instance.provisioning_data)
        .bind(&instance.status)
        .bind(instance.created_at)
        .bind(instance.started_at)
        .bind(instance.terminated_at)
        .bind(instance.idle_since)
        .bind(&instance.termination_policy)
        .bind(instance.termination_idle_time)
        .bind(&instance.job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>> {
        let sql = format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?");
        let record = sqlx::query_as::<_, InstanceRecord>(&sql)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_pool_instances(&self, pool_id: &str) -> Result<Vec<InstanceRecord>> {
        let sql =
            format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE pool_id = ? ORDER BY created_at");
        let records = sqlx::query_as::<_, InstanceRecord>(&sql)
            .bind(pool_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn list_instances_by_status(&self, status: &str) -> Result<Vec<InstanceRecord>> {
        let sql =
            format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE status = ? ORDER BY created_at");
        let records = sqlx::query_as::<_, InstanceRecord>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn update_instance(&self, instance: &InstanceRecord) -> Result<()> {
        let result = sqlx::query(
            "UPDATE instances SET status = ?, provisioning_data = ?, started_at = ?, \
             terminated_at = ?, idle_since = ?, job_id = ? WHERE id = ?",
        )
        .bind(&instance.status)
        .bind(&instance.provisioning_data)
        .bind(instance.started_at)
        .bind(instance.terminated_at)
        .bind(instance.idle_since)
        .bind(&instance.job_id)
        .bind(&instance.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("Instance", &instance.id));
        }
        Ok(())
    }

    async fn create_run_with_jobs(&self, run: &RunRecord, jobs: &[JobRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO runs (id, project_id, repo_id, user_id, run_name, submitted_at, \
             last_processed_at, status, termination_reason, run_spec, service_spec, gateway_id, \
             deleted) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.project_id)
        .bind(&run.repo_id)
        .bind(&run.user_id)
        .bind(&run.run_name)
        .bind(run.submitted_at)
        .bind(run.last_processed_at)
        .bind(&run.status)
        .bind(&run.termination_reason)
        .bind(&run.run_spec)
        .bind(&run.service_spec)
        .bind(&run.gateway_id)
        .bind(run.deleted)
        .execute(&mut *tx)
        .await?;
        for job in jobs {
            insert_job_stmt(&mut *tx, job).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?");
        let record = sqlx::query_as::<_, RunRecord>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn get_run_by_name(
        &self,
        project_id: &str,
        run_name: &str,
    ) -> Result<Option<RunRecord>> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE project_id = ? AND run_name = ? AND deleted = 0"
        );
        let record = sqlx::query_as::<_, RunRecord>(&sql)
            .bind(project_id)
            .bind(run_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_project_runs(
        &self,
        project_id: &str,
        repo_id: Option<&str>,
    ) -> Result<Vec<RunRecord>> {
        let records = match repo_id {
            Some(repo_id) => {
                let sql = format!(
                    "SELECT {RUN_COLUMNS} FROM runs WHERE project_id = ? AND repo_id = ? \
                     AND deleted = 0 ORDER BY submitted_at DESC"
                );
                sqlx::query_as::<_, RunRecord>(&sql)
                    .bind(project_id)
                    .bind(repo_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {RUN_COLUMNS} FROM runs WHERE project_id = ? AND deleted = 0 \
                     ORDER BY submitted_at DESC"
                );
                sqlx::query_as::<_, RunRecord>(&sql)
                    .bind(project_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(records)
    }

    async fn list_runs_by_names(
        &self,
        project_id: &str,
        names: &[String],
    ) -> Result<Vec<RunRecord>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE project_id = ? AND deleted = 0 \
             AND run_name IN ({})",
            placeholders(names.len())
        );
        let mut query = sqlx::query_as::<_, RunRecord>(&sql).bind(project_id);
        for name in names {
            query = query.bind(name);
        }
        let records = query.fetch_all(&self.pool).await?;
        Ok(records)
    }

    async fn list_runs_by_statuses(
        &self,
        statuses: &[&str],
        limit: i64,
    ) -> Result<Vec<RunRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE deleted = 0 AND status IN ({}) \
             ORDER BY last_processed_at LIMIT ?",
            placeholders(statuses.len())
        );
        let mut query = sqlx::query_as::<_, RunRecord>(&sql);
        for status in statuses {
            query = query.bind(*status);
        }
        let records = query.bind(limit).fetch_all(&self.pool).await?;
        Ok(records)
    }

    async fn update_run_status(
        &self,
        run_id: &str,
        status: &str,
        termination_reason: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE runs SET status = ?, termination_reason = ? WHERE id = ?")
            .bind(status)
            .bind(termination_reason)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("Run", run_id));
        }
        Ok(())
    }

    async fn update_run_last_processed(&self, run_id: &str, ts: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE runs SET last_processed_at = ? WHERE id = ?")
            .bind(ts)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_runs_deleted(&self, project_id: &str, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE runs SET deleted = 1 WHERE project_id = ? AND run_name IN ({})",
            placeholders(names.len())
        );
        let mut query = sqlx::query(&sql).bind(project_id);
        for name in names {
            query = query.bind(name);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_job(&self, job: &JobRecord) -> Result<()> {
        insert_job_stmt(&self.pool, job).await
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let record = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_run_jobs(&self, run_id: &str) -> Result<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE run_id = ? \
             ORDER BY replica_num, job_num, submission_num"
        );
        let records = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn list_jobs_by_statuses(
        &self,
        statuses: &[&str],
        limit: i64,
    ) -> Result<Vec<JobRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN ({}) \
             ORDER BY last_processed_at LIMIT ?",
            placeholders(statuses.len())
        );
        let mut query = sqlx::query_as::<_, JobRecord>(&sql);
        for status in statuses {
            query = query.bind(*status);
        }
        let records = query.bind(limit).fetch_all(&self.pool).await?;
        Ok(records)
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        status: &str,
        termination_reason: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET status = ?, termination_reason = ? WHERE id = ?")
            .bind(status)
            .bind(termination_reason)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("Job", job_id));
        }
        Ok(())
    }

    async fn update_job_provisioning(
        &self,
        job_id: &str,
        provisioning_data: &str,
        instance_id: Option<&str>,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE jobs SET provisioning_data = ?, instance_id = ? WHERE id = ?")
                .bind(provisioning_data)
                .bind(instance_id)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("Job", job_id));
        }
        Ok(())
    }

    async fn update_job_last_processed(&self, job_id: &str, ts: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE jobs SET last_processed_at = ? WHERE id = ?")
            .bind(ts)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
