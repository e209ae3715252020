// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runs, jobs, specs and the status/termination-reason model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instances::{InstanceOffer, ProvisioningData};
use super::profiles::{Profile, Requirements, ResourcesSpec};

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted, waiting for capacity.
    Submitted,
    /// At least one job is provisioning.
    Provisioning,
    /// At least one job is running.
    Running,
    /// Being terminated.
    Terminating,
    /// All jobs finished successfully.
    Done,
    /// A job failed (or retries were exhausted).
    Failed,
    /// Stopped or aborted by the user.
    Terminated,
}

impl RunStatus {
    /// The string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    /// Parse a status from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Self::Submitted),
            "provisioning" => Some(Self::Provisioning),
            "running" => Some(Self::Running),
            "terminating" => Some(Self::Terminating),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Whether the run has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Terminated)
    }

    /// The terminal statuses.
    pub fn finished_statuses() -> &'static [RunStatus] {
        &[Self::Done, Self::Failed, Self::Terminated]
    }
}

/// Why a run entered its terminating flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTerminationReason {
    /// Every job completed successfully.
    AllJobsDone,
    /// A job failed without retries left disabled or remaining.
    JobFailed,
    /// The configured retry limit was exhausted.
    RetryLimitExceeded,
    /// The user requested a graceful stop.
    StoppedByUser,
    /// The user requested an abort.
    AbortedByUser,
}

impl RunTerminationReason {
    /// The string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllJobsDone => "all_jobs_done",
            Self::JobFailed => "job_failed",
            Self::RetryLimitExceeded => "retry_limit_exceeded",
            Self::StoppedByUser => "stopped_by_user",
            Self::AbortedByUser => "aborted_by_user",
        }
    }

    /// Parse a reason from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all_jobs_done" => Some(Self::AllJobsDone),
            "job_failed" => Some(Self::JobFailed),
            "retry_limit_exceeded" => Some(Self::RetryLimitExceeded),
            "stopped_by_user" => Some(Self::StoppedByUser),
            "aborted_by_user" => Some(Self::AbortedByUser),
            _ => None,
        }
    }

    /// The job termination reason terminating jobs of this run receive.
    pub fn to_job_termination_reason(&self) -> JobTerminationReason {
        match self {
            Self::AllJobsDone => JobTerminationReason::DoneByRunner,
            Self::JobFailed => JobTerminationReason::TerminatedByServer,
            Self::RetryLimitExceeded => JobTerminationReason::TerminatedByServer,
            Self::StoppedByUser => JobTerminationReason::TerminatedByUser,
            Self::AbortedByUser => JobTerminationReason::AbortedByUser,
        }
    }

    /// The final run status once every job finished.
    pub fn to_status(&self) -> RunStatus {
        match self {
            Self::AllJobsDone => RunStatus::Done,
            Self::JobFailed => RunStatus::Failed,
            Self::RetryLimitExceeded => RunStatus::Failed,
            Self::StoppedByUser => RunStatus::Terminated,
            Self::AbortedByUser => RunStatus::Terminated,
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for an offer.
    Submitted,
    /// Instance accepted, runner not ready yet.
    Provisioning,
    /// Runner reported ready.
    Running,
    /// Being terminated.
    Terminating,
    /// Finished successfully.
    Done,
    /// Failed.
    Failed,
    /// Terminated by user or server.
    Terminated,
    /// Aborted by user (no graceful stop).
    Aborted,
}

impl JobStatus {
    /// The string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
            Self::Aborted => "aborted",
        }
    }

    /// Parse a status from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Self::Submitted),
            "provisioning" => Some(Self::Provisioning),
            "running" => Some(Self::Running),
            "terminating" => Some(Self::Terminating),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "terminated" => Some(Self::Terminated),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Whether the job has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::Terminated | Self::Aborted
        )
    }
}

/// Why a job entered its terminating flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTerminationReason {
    /// The runner reported a zero exit.
    DoneByRunner,
    /// The runner reported a non-zero exit.
    ContainerExitedWithError,
    /// No capacity could be found for the submission.
    FailedToStartDueToNoCapacity,
    /// The runner never became ready within the provisioning timeout.
    WaitingRunnerLimitExceeded,
    /// The user requested a graceful stop.
    TerminatedByUser,
    /// The user requested an abort.
    AbortedByUser,
    /// Server policy terminated the job (run failed, retries exhausted).
    TerminatedByServer,
}

impl JobTerminationReason {
    /// The string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DoneByRunner => "done_by_runner",
            Self::ContainerExitedWithError => "container_exited_with_error",
            Self::FailedToStartDueToNoCapacity => "failed_to_start_due_to_no_capacity",
            Self::WaitingRunnerLimitExceeded => "waiting_runner_limit_exceeded",
            Self::TerminatedByUser => "terminated_by_user",
            Self::AbortedByUser => "aborted_by_user",
            Self::TerminatedByServer => "terminated_by_server",
        }
    }

    /// Parse a reason from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "done_by_runner" => Some(Self::DoneByRunner),
            "container_exited_with_error" => Some(Self::ContainerExitedWithError),
            "failed_to_start_due_to_no_capacity" => Some(Self::FailedToStartDueToNoCapacity),
            "waiting_runner_limit_exceeded" => Some(Self::WaitingRunnerLimitExceeded),
            "terminated_by_user" => Some(Self::TerminatedByUser),
            "aborted_by_user" => Some(Self::AbortedByUser),
            "terminated_by_server" => Some(Self::TerminatedByServer),
            _ => None,
        }
    }

    /// The terminal job status this reason resolves to.
    pub fn to_status(&self) -> JobStatus {
        match self {
            Self::DoneByRunner => JobStatus::Done,
            Self::ContainerExitedWithError => JobStatus::Failed,
            Self::FailedToStartDueToNoCapacity => JobStatus::Failed,
            Self::WaitingRunnerLimitExceeded => JobStatus::Failed,
            Self::TerminatedByUser => JobStatus::Terminated,
            Self::AbortedByUser => JobStatus::Aborted,
            Self::TerminatedByServer => JobStatus::Terminated,
        }
    }

    /// Whether jobs terminating for this reason still get a graceful stop
    /// signal when running.
    pub fn sends_stop_signal(&self) -> bool {
        !matches!(self, Self::AbortedByUser | Self::DoneByRunner)
    }
}

/// Fixed replica count for a service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Replicas {
    /// Minimum replica count.
    pub min: u32,
    /// Maximum replica count. Must equal `min`; auto-scaling is not
    /// supported.
    pub max: u32,
}

impl Default for Replicas {
    fn default() -> Self {
        Self { min: 1, max: 1 }
    }
}

/// The workload a run executes, discriminated on a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunConfiguration {
    /// A finite batch task.
    Task {
        /// Commands executed in the container.
        commands: Vec<String>,
        /// Container image (server default when unset).
        #[serde(default)]
        image: Option<String>,
        /// Resource constraints.
        #[serde(default)]
        resources: ResourcesSpec,
    },
    /// A long-lived service behind the gateway.
    Service {
        /// Commands executed in the container.
        commands: Vec<String>,
        /// Container image (server default when unset).
        #[serde(default)]
        image: Option<String>,
        /// Resource constraints.
        #[serde(default)]
        resources: ResourcesSpec,
        /// Port the service listens on.
        port: u16,
        /// Replica count (min must equal max).
        #[serde(default)]
        replicas: Replicas,
        /// Whether the gateway authenticates requests.
        #[serde(default)]
        auth: bool,
    },
}

impl RunConfiguration {
    /// The configuration type tag (`task` or `service`).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Task { .. } => "task",
            Self::Service { .. } => "service",
        }
    }

    /// The configured resource constraints.
    pub fn resources(&self) -> &ResourcesSpec {
        match self {
            Self::Task { resources, .. } => resources,
            Self::Service { resources, .. } => resources,
        }
    }
}

/// A declarative run specification as submitted by the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    /// Run name; allocated by the server when unset.
    #[serde(default)]
    pub run_name: Option<String>,
    /// Identifier of the repo the run works on.
    pub repo_id: String,
    /// Placement preferences.
    #[serde(default)]
    pub profile: Profile,
    /// The workload itself.
    pub configuration: RunConfiguration,
}

impl RunSpec {
    /// Requirements derived from the configuration and profile.
    pub fn requirements(&self) -> Requirements {
        Requirements {
            resources: self.configuration.resources().clone(),
            max_price: self.profile.max_price,
            spot: self.profile.spot_policy.unwrap_or_default(),
        }
    }
}

/// One job of a run as materialized from the run spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Replica this job belongs to.
    pub replica_num: u32,
    /// Job index within the replica.
    pub job_num: u32,
    /// Job name (`<run_name>-<job_num>-<replica_num>`).
    pub job_name: String,
    /// Commands executed in the container.
    pub commands: Vec<String>,
    /// Container image.
    pub image: String,
    /// Requirements for offer matching.
    pub requirements: Requirements,
    /// Service port, for service runs.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Gateway-facing description of a service run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Domain the service is published on.
    pub domain: String,
    /// Port replicas listen on.
    pub port: u16,
    /// Whether the gateway authenticates requests.
    pub auth: bool,
}

/// One execution attempt of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    /// Submission row id.
    pub id: String,
    /// Attempt number, starting at 0.
    pub submission_num: u32,
    /// When the attempt was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When the attempt was last processed.
    pub last_processed_at: DateTime<Utc>,
    /// Current status.
    pub status: JobStatus,
    /// Termination reason, when terminating or finished.
    pub termination_reason: Option<JobTerminationReason>,
    /// Provisioning data, once an instance was bound.
    pub job_provisioning_data: Option<ProvisioningData>,
}

impl JobSubmission {
    /// How long the submission has been (or was) active.
    pub fn duration(&self) -> chrono::Duration {
        if self.status.is_finished() {
            self.last_processed_at - self.submitted_at
        } else {
            Utc::now() - self.submitted_at
        }
    }

    /// Cost of the submission: provisioning price times duration in
    /// hours. Zero without provisioning data.
    pub fn cost(&self) -> f64 {
        match &self.job_provisioning_data {
            Some(data) => {
                let hours = self.duration().num_seconds() as f64 / 3600.0;
                data.price * hours
            }
            None => 0.0,
        }
    }
}

/// A logical job with its submissions, ordered by submission number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// The job spec shared by all submissions.
    pub job_spec: JobSpec,
    /// Submissions, ascending by `submission_num`.
    pub job_submissions: Vec<JobSubmission>,
}

/// A run as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Run id.
    pub id: String,
    /// Owning project name.
    pub project_name: String,
    /// Submitting user name.
    pub user: String,
    /// Run name, unique per project among non-deleted runs.
    pub run_name: String,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Current status.
    pub status: RunStatus,
    /// Termination reason, when terminating or finished.
    pub termination_reason: Option<RunTerminationReason>,
    /// The spec the run was submitted with.
    pub run_spec: RunSpec,
    /// Jobs grouped by (replica, job_num).
    pub jobs: Vec<Job>,
    /// Latest submission of the first job, for quick status display.
    pub latest_job_submission: Option<JobSubmission>,
    /// Accumulated cost across all submissions, rounded to 4 decimals.
    pub cost: f64,
    /// Service details, for service runs.
    pub service: Option<ServiceSpec>,
}

/// Offers considered for one job of a planned run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPlan {
    /// The job the offers were planned for.
    pub job_spec: JobSpec,
    /// Candidate offers, pool offers first (preview, capped at 50).
    pub offers: Vec<InstanceOffer>,
    /// Total number of candidate offers before the cap.
    pub total_offers: usize,
    /// Maximum price across all candidates.
    pub max_price: Option<f64>,
}

/// The result of a dry-run plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    /// Project the plan was computed for.
    pub project_name: String,
    /// Requesting user.
    pub user: String,
    /// The spec that was planned.
    pub run_spec: RunSpec,
    /// Per-job offer plans.
    pub job_plans: Vec<JobPlan>,
}
