// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic reconciliation driver.
//!
//! Selects rows eligible for processing and dispatches them to the
//! run/job state machine under the locking protocol:
//!
//! - Job passes skip jobs whose run is in the run-processing set and
//!   take the job-phase lock with `try_lock` - a held id means another
//!   worker owns it this tick.
//! - Run passes take the run-processing lock with `try_lock`.
//! - Failures are logged per item; the driver continues with the next.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::instances;
use crate::jobs;
use crate::locks::ProcessingPhase;
use crate::models::{JobStatus, RunStatus};
use crate::runs;
use crate::state::SchedulerState;

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often to run a full tick.
    pub poll_interval: Duration,
    /// Maximum rows per pass per tick.
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 10,
        }
    }
}

/// The reconciliation driver. Runs as a background task.
pub struct Reconciler {
    state: Arc<SchedulerState>,
    config: ReconcilerConfig,
    shutdown: Arc<Notify>,
}

impl Reconciler {
    /// Create a reconciler over shared scheduler state.
    pub fn new(state: Arc<SchedulerState>, config: ReconcilerConfig) -> Self {
        Self {
            state,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reconciler loop until shutdown.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Reconciler started"
        );
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Reconciler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.tick().await;
                }
            }
        }
    }

    /// Run every pass once. Public so embedders and tests can drive the
    /// reconciler deterministically.
    pub async fn tick(&self) {
        if let Err(e) = self.process_submitted_jobs().await {
            error!(error = %e, "Submitted-jobs pass failed");
        }
        if let Err(e) = self.process_running_jobs().await {
            error!(error = %e, "Running-jobs pass failed");
        }
        if let Err(e) = self.process_terminating_jobs().await {
            error!(error = %e, "Terminating-jobs pass failed");
        }
        if let Err(e) = self.process_active_runs().await {
            error!(error = %e, "Active-runs pass failed");
        }
        if let Err(e) = self.process_terminating_runs().await {
            error!(error = %e, "Terminating-runs pass failed");
        }
        if let Err(e) = instances::terminate_idle_instances(&self.state).await {
            error!(error = %e, "Idle-instance pass failed");
        }
    }

    async fn process_submitted_jobs(&self) -> Result<()> {
        let candidates = self
            .state
            .persistence
            .list_jobs_by_statuses(&[JobStatus::Submitted.as_str()], self.config.batch_size)
            .await?;
        for candidate in candidates {
            // Run processing has priority over job processing
            if self
                .state
                .locks
                .contains(ProcessingPhase::Runs, &candidate.run_id)
            {
                debug!(job = %candidate.job_name, "Run is being processed, skipping job");
                continue;
            }
            let Some(_guard) = self
                .state
                .locks
                .try_lock(ProcessingPhase::SubmittedJobs, &candidate.id)
            else {
                continue;
            };
            let Some(job) = self.state.persistence.get_job(&candidate.id).await? else {
                continue;
            };
            if job.job_status()? != JobStatus::Submitted {
                continue;
            }
            if let Err(e) = jobs::process_submitted_job(&self.state, &job).await {
                error!(job = %job.job_name, error = %e, "Failed to process submitted job");
            }
            self.state
                .persistence
                .update_job_last_processed(&job.id, Utc::now())
                .await?;
        }
        Ok(())
    }

    async fn process_running_jobs(&self) -> Result<()> {
        let candidates = self
            .state
            .persistence
            .list_jobs_by_statuses(
                &[
                    JobStatus::Provisioning.as_str(),
                    JobStatus::Running.as_str(),
                ],
                self.config.batch_size,
            )
            .await?;
        for candidate in candidates {
            if self
                .state
                .locks
                .contains(ProcessingPhase::Runs, &candidate.run_id)
            {
                continue;
            }
            let Some(_guard) = self
                .state
                .locks
                .try_lock(ProcessingPhase::RunningJobs, &candidate.id)
            else {
                continue;
            };
            let Some(job) = self.state.persistence.get_job(&candidate.id).await? else {
                continue;
            };
            if !matches!(
                job.job_status()?,
                JobStatus::Provisioning | JobStatus::Running
            ) {
                continue;
            }
            if let Err(e) = jobs::process_running_job(&self.state, &job).await {
                error!(job = %job.job_name, error = %e, "Failed to process running job");
            }
            self.state
                .persistence
                .update_job_last_processed(&job.id, Utc::now())
                .await?;
        }
        Ok(())
    }

    async fn process_terminating_jobs(&self) -> Result<()> {
        let candidates = self
            .state
            .persistence
            .list_jobs_by_statuses(&[JobStatus::Terminating.as_str()], self.config.batch_size)
            .await?;
        for candidate in candidates {
            if self
                .state
                .locks
                .contains(ProcessingPhase::Runs, &candidate.run_id)
            {
                continue;
            }
            let Some(_guard) = self
                .state
                .locks
                .try_lock(ProcessingPhase::TerminatingJobs, &candidate.id)
            else {
                continue;
            };
            let Some(job) = self.state.persistence.get_job(&candidate.id).await? else {
                continue;
            };
            if job.job_status()? != JobStatus::Terminating {
                continue;
            }
            if let Err(e) = jobs::process_terminating_job(&self.state, &job).await {
                error!(job = %job.job_name, error = %e, "Failed to process terminating job");
            }
            self.state
                .persistence
                .update_job_last_processed(&job.id, Utc::now())
                .await?;
        }
        Ok(())
    }

    async fn process_active_runs(&self) -> Result<()> {
        let candidates = self
            .state
            .persistence
            .list_runs_by_statuses(
                &[
                    RunStatus::Submitted.as_str(),
                    RunStatus::Provisioning.as_str(),
                    RunStatus::Running.as_str(),
                ],
                self.config.batch_size,
            )
            .await?;
        for candidate in candidates {
            let Some(_guard) = self.state.locks.try_lock(ProcessingPhase::Runs, &candidate.id)
            else {
                continue;
            };
            if let Err(e) = runs::process_active_run(&self.state, &candidate.id).await {
                error!(run = %candidate.run_name, error = %e, "Failed to process run");
            }
        }
        Ok(())
    }

    async fn process_terminating_runs(&self) -> Result<()> {
        let candidates = self
            .state
            .persistence
            .list_runs_by_statuses(&[RunStatus::Terminating.as_str()], self.config.batch_size)
            .await?;
        for candidate in candidates {
            let Some(_guard) = self.state.locks.try_lock(ProcessingPhase::Runs, &candidate.id)
            else {
                continue;
            };
            if let Err(e) = runs::process_terminating_run(&self.state, &candidate.id).await {
                error!(run = %candidate.run_name, error = %e, "Failed to process terminating run");
            }
            self.state
                .persistence
                .update_run_last_processed(&candidate.id, Utc::now())
                .await?;
        }
        Ok(())
    }
}
