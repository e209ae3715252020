// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner-agent client interface.
//!
//! The runner agent executes on provisioned instances; the core only
//! consumes two operations from it: a best-effort graceful stop signal
//! and a status poll. The transport (SSH tunnel, HTTP) lives outside
//! this crate.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ProvisioningData;

/// Errors from runner-agent calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// The runner could not be reached.
    #[error("Runner unreachable: {0}")]
    Unreachable(String),

    /// The runner answered with something unexpected.
    #[error("Runner protocol error: {0}")]
    Protocol(String),
}

/// Job progress as reported by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerJobStatus {
    /// The runner is still pulling the image / preparing.
    Pulling,
    /// The job container is running.
    Running,
    /// The job container exited.
    Exited {
        /// Container exit code.
        exit_code: i32,
    },
}

/// Client for the runner agent on a provisioned instance.
#[async_trait]
pub trait RunnerClient: Send + Sync {
    /// Send a graceful stop signal for the job. Best-effort: network
    /// failures are reported but callers log and continue.
    async fn stop(
        &self,
        provisioning: &ProvisioningData,
        job_id: &str,
    ) -> Result<(), RunnerError>;

    /// Poll the job's progress and exit disposition.
    async fn poll_status(
        &self,
        provisioning: &ProvisioningData,
        job_id: &str,
    ) -> Result<RunnerJobStatus, RunnerError>;
}

enum ScriptedPoll {
    Status(RunnerJobStatus),
    Unreachable,
}

/// Mock runner client for testing.
///
/// Tests script per-job statuses and inspect which jobs received stop
/// signals.
#[derive(Default)]
pub struct MockRunnerClient {
    statuses: Mutex<HashMap<String, ScriptedPoll>>,
    stop_calls: Mutex<Vec<String>>,
}

impl MockRunnerClient {
    /// Create a mock client; unknown jobs poll as [`RunnerJobStatus::Pulling`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the status the given job polls as from now on.
    pub fn set_status(&self, job_id: &str, status: RunnerJobStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), ScriptedPoll::Status(status));
    }

    /// Make polls for the given job fail as unreachable.
    pub fn set_unreachable(&self, job_id: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), ScriptedPoll::Unreachable);
    }

    /// Job ids that received a stop signal, in call order.
    pub fn stop_calls(&self) -> Vec<String> {
        self.stop_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunnerClient for MockRunnerClient {
    async fn stop(
        &self,
        _provisioning: &ProvisioningData,
        job_id: &str,
    ) -> Result<(), RunnerError> {
        self.stop_calls.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    async fn poll_status(
        &self,
        _provisioning: &ProvisioningData,
        job_id: &str,
    ) -> Result<RunnerJobStatus, RunnerError> {
        match self.statuses.lock().unwrap().get(job_id) {
            Some(ScriptedPoll::Status(status)) => Ok(*status),
            Some(ScriptedPoll::Unreachable) => {
                Err(RunnerError::Unreachable("scripted".to_string()))
            }
            None => Ok(RunnerJobStatus::Pulling),
        }
    }
}
