// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job state machine.
//!
//! Jobs move SUBMITTED → PROVISIONING → RUNNING → TERMINATING → final.
//! The processing functions here are invoked by the reconciler (under
//! the matching job-phase lock) and by the run terminating flow (under
//! the run lock, after waiting out the job phases).

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::instances;
use crate::models::{
    InstanceRuntime, InstanceStatus, JobSpec, JobStatus, JobSubmission, JobTerminationReason,
    ProvisioningData, RunConfiguration, RunSpec,
};
use crate::persistence::{InstanceRecord, JobRecord, RunRecord};
use crate::planner;
use crate::pools;
use crate::runner::RunnerJobStatus;
use crate::state::SchedulerState;

/// Default interpreter version baked into the default workload image.
pub const DEFAULT_PYTHON_VERSION: &str = "3.11";

/// The image jobs run on when the spec doesn't name one.
pub fn default_image() -> String {
    format!("armada/base:py{DEFAULT_PYTHON_VERSION}")
}

/// Materialize the job specs of one replica from a run spec.
///
/// The run spec must carry a run name by the time jobs are materialized.
pub fn jobs_from_run_spec(run_spec: &RunSpec, replica_num: u32) -> Result<Vec<JobSpec>> {
    let run_name = run_spec
        .run_name
        .clone()
        .ok_or_else(|| CoreError::client("run_name is required to materialize jobs"))?;
    let (commands, image, port) = match &run_spec.configuration {
        RunConfiguration::Task {
            commands, image, ..
        } => (commands.clone(), image.clone(), None),
        RunConfiguration::Service {
            commands,
            image,
            port,
            ..
        } => (commands.clone(), image.clone(), Some(*port)),
    };
    let job_num = 0;
    Ok(vec![JobSpec {
        replica_num,
        job_num,
        job_name: format!("{run_name}-{job_num}-{replica_num}"),
        commands,
        image: image.unwrap_or_else(default_image),
        requirements: run_spec.requirements(),
        port,
    }])
}

/// Build the job row for a new submission of a job spec.
pub fn submission_record(
    run: &RunRecord,
    spec: &JobSpec,
    submission_num: i64,
) -> Result<JobRecord> {
    let now = Utc::now();
    Ok(JobRecord {
        id: Uuid::new_v4().to_string(),
        project_id: run.project_id.clone(),
        run_id: run.id.clone(),
        run_name: run.run_name.clone(),
        job_num: spec.job_num as i64,
        job_name: spec.job_name.clone(),
        replica_num: spec.replica_num as i64,
        submission_num,
        submitted_at: now,
        last_processed_at: now,
        status: JobStatus::Submitted.as_str().to_string(),
        termination_reason: None,
        job_spec: serde_json::to_string(spec)?,
        provisioning_data: None,
        instance_id: None,
    })
}

/// The submission view of a job row (latest attempt, duration, cost).
pub fn job_record_to_submission(job: &JobRecord) -> Result<JobSubmission> {
    Ok(JobSubmission {
        id: job.id.clone(),
        submission_num: job.submission_num as u32,
        submitted_at: job.submitted_at,
        last_processed_at: job.last_processed_at,
        status: job.job_status()?,
        termination_reason: job.reason()?,
        job_provisioning_data: job.provisioning()?,
    })
}

/// Send the runner a graceful stop signal for the job.
///
/// Best-effort: network failures are logged and do not block the
/// terminating transition.
pub async fn stop_runner(state: &SchedulerState, job: &JobRecord) {
    let provisioning = match job.provisioning() {
        Ok(Some(provisioning)) => provisioning,
        Ok(None) => return,
        Err(e) => {
            warn!(job = %job.job_name, error = %e, "Unreadable provisioning data, skipping stop signal");
            return;
        }
    };
    if let Err(e) = state.runner.stop(&provisioning, &job.id).await {
        warn!(job = %job.job_name, error = %e, "Failed to send stop signal to runner");
    }
}

/// Move a job into its terminating flow.
pub async fn transition_to_terminating(
    state: &SchedulerState,
    job: &JobRecord,
    reason: JobTerminationReason,
) -> Result<()> {
    debug!(job = %job.job_name, reason = reason.as_str(), "Job terminating");
    state
        .persistence
        .update_job_status(&job.id, JobStatus::Terminating.as_str(), Some(reason.as_str()))
        .await
}

/// Process a SUBMITTED job: find capacity and start provisioning.
///
/// Pool instances are preferred; creation happens only under the
/// reuse-or-create policy. Without a matching offer the job simply stays
/// SUBMITTED - there is no global submission timeout.
pub async fn process_submitted_job(state: &SchedulerState, job: &JobRecord) -> Result<()> {
    let run = state
        .persistence
        .get_run(&job.run_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Run", &job.run_id))?;
    let project = state
        .persistence
        .get_project(&run.project_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Project", &run.project_id))?;
    let run_spec = run.spec()?;
    let job_spec = job.spec()?;
    let profile = &run_spec.profile;
    let requirements = &job_spec.requirements;

    // 1. Try to reuse an idle pool instance
    let pool = pools::get_or_create_pool_by_name(state, &project, profile.pool_name.as_deref())
        .await?;
    let instances = state.persistence.list_pool_instances(&pool.id).await?;
    let candidates = pools::filter_pool_instances(&instances, profile, requirements);
    for instance in &candidates {
        if instance.instance_status()? != InstanceStatus::Idle {
            continue;
        }
        let Some(raw_provisioning) = instance.provisioning_data.clone() else {
            continue;
        };
        state
            .persistence
            .update_job_provisioning(&job.id, &raw_provisioning, Some(&instance.id))
            .await?;
        state
            .persistence
            .update_job_status(&job.id, JobStatus::Provisioning.as_str(), None)
            .await?;
        let mut instance = instance.clone();
        instance.status = InstanceStatus::Busy.as_str().to_string();
        instance.job_id = Some(job.id.clone());
        instance.idle_since = None;
        state.persistence.update_instance(&instance).await?;
        info!(job = %job.job_name, instance = %instance.name, "Reusing pool instance");
        return Ok(());
    }

    // 2. Create a fresh instance when the policy allows it
    if profile.creation_policy.unwrap_or_default() == crate::models::CreationPolicy::Reuse {
        debug!(job = %job.job_name, "No reusable instance and creation is disabled");
        return Ok(());
    }

    let offers =
        planner::get_create_instance_offers(state, &project, profile, requirements, true).await?;
    let instance_name = format!("{}-{}", job.job_name, &job.id[..8.min(job.id.len())]);
    let config = instances::instance_configuration(&project, &run, &instance_name)?;

    for (adapter, offer) in &offers {
        if offer.instance_runtime == InstanceRuntime::Runner {
            continue;
        }
        debug!(
            job = %job.job_name,
            instance_type = %offer.instance.name,
            backend = %offer.backend,
            region = %offer.region,
            price = %format_args!("${:.4}", offer.price),
            "Trying offer"
        );
        let launched = match state.backends.create_with_timeout(adapter, offer, &config).await {
            Ok(launched) => launched,
            Err(crate::backends::BackendError::NotSupported) => continue,
            Err(e) => {
                warn!(
                    instance_type = %offer.instance.name,
                    backend = %offer.backend,
                    region = %offer.region,
                    error = %e,
                    "Launch failed"
                );
                continue;
            }
        };
        let provisioning = ProvisioningData::from_launch(offer, launched);
        let raw_provisioning = serde_json::to_string(&provisioning)?;
        let now = Utc::now();
        let instance = InstanceRecord {
            id: Uuid::new_v4().to_string(),
            name: instance_name.clone(),
            project_id: project.id.clone(),
            pool_id: pool.id.clone(),
            backend: offer.backend.as_str().to_string(),
            region: offer.region.clone(),
            price: offer.price,
            offer: serde_json::to_string(offer)?,
            provisioning_data: Some(raw_provisioning.clone()),
            status: InstanceStatus::Provisioning.as_str().to_string(),
            created_at: now,
            started_at: Some(now),
            terminated_at: None,
            idle_since: None,
            termination_policy: profile
                .termination_policy
                .unwrap_or_default()
                .as_str()
                .to_string(),
            termination_idle_time: profile
                .termination_idle_time
                .unwrap_or(state.config.default_termination_idle_time),
            job_id: Some(job.id.clone()),
        };
        state.persistence.insert_instance(&instance).await?;
        state
            .persistence
            .update_job_provisioning(&job.id, &raw_provisioning, Some(&instance.id))
            .await?;
        state
            .persistence
            .update_job_status(&job.id, JobStatus::Provisioning.as_str(), None)
            .await?;
        info!(
            job = %job.job_name,
            instance = %instance.name,
            backend = %offer.backend,
            "Job provisioning on fresh instance"
        );
        return Ok(());
    }

    debug!(job = %job.job_name, "No offers matched, job stays submitted");
    Ok(())
}

/// Process a PROVISIONING or RUNNING job by polling its runner.
pub async fn process_running_job(state: &SchedulerState, job: &JobRecord) -> Result<()> {
    let status = job.job_status()?;
    let Some(provisioning) = job.provisioning()? else {
        // A provisioning job without provisioning data cannot progress
        return transition_to_terminating(
            state,
            job,
            JobTerminationReason::FailedToStartDueToNoCapacity,
        )
        .await;
    };

    match state.runner.poll_status(&provisioning, &job.id).await {
        Ok(RunnerJobStatus::Pulling) => {
            if provisioning_expired(state, job) {
                transition_to_terminating(
                    state,
                    job,
                    JobTerminationReason::WaitingRunnerLimitExceeded,
                )
                .await?;
            }
        }
        Ok(RunnerJobStatus::Running) => {
            if status != JobStatus::Running {
                state
                    .persistence
                    .update_job_status(&job.id, JobStatus::Running.as_str(), None)
                    .await?;
                if let Some(instance_id) = &job.instance_id
                    && let Some(mut instance) = state.persistence.get_instance(instance_id).await?
                    && instance.instance_status()? == InstanceStatus::Provisioning
                {
                    instance.status = InstanceStatus::Busy.as_str().to_string();
                    state.persistence.update_instance(&instance).await?;
                }
                info!(job = %job.job_name, "Job is running");
                register_service_upstream(state, job, &provisioning).await;
            }
        }
        Ok(RunnerJobStatus::Exited { exit_code }) => {
            let reason = if exit_code == 0 {
                JobTerminationReason::DoneByRunner
            } else {
                JobTerminationReason::ContainerExitedWithError
            };
            transition_to_terminating(state, job, reason).await?;
        }
        Err(e) => {
            if status == JobStatus::Provisioning && provisioning_expired(state, job) {
                transition_to_terminating(
                    state,
                    job,
                    JobTerminationReason::WaitingRunnerLimitExceeded,
                )
                .await?;
            } else {
                debug!(job = %job.job_name, error = %e, "Runner poll failed");
            }
        }
    }
    Ok(())
}

fn provisioning_expired(state: &SchedulerState, job: &JobRecord) -> bool {
    let deadline = job.submitted_at
        + chrono::Duration::from_std(state.config.provisioning_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
    Utc::now() > deadline
}

/// Process a TERMINATING job: detach its instance and settle the final
/// status from the termination reason.
pub async fn process_terminating_job(state: &SchedulerState, job: &JobRecord) -> Result<()> {
    let reason = job
        .reason()?
        .unwrap_or(JobTerminationReason::TerminatedByServer);

    if let Some(instance_id) = &job.instance_id
        && let Some(instance) = state.persistence.get_instance(instance_id).await?
    {
        remove_service_upstream(state, job).await;
        detach_instance(state, instance, reason).await?;
    }

    let final_status = reason.to_status();
    state
        .persistence
        .update_job_status(&job.id, final_status.as_str(), Some(reason.as_str()))
        .await?;
    info!(
        job = %job.job_name,
        status = final_status.as_str(),
        reason = reason.as_str(),
        "Job status has changed TERMINATING -> final"
    );
    Ok(())
}

/// Release the instance back to its pool, or terminate it when the job
/// never managed to start on it.
async fn detach_instance(
    state: &SchedulerState,
    mut instance: InstanceRecord,
    reason: JobTerminationReason,
) -> Result<()> {
    if instance.instance_status()?.is_finished() {
        return Ok(());
    }
    match reason {
        JobTerminationReason::FailedToStartDueToNoCapacity
        | JobTerminationReason::WaitingRunnerLimitExceeded => {
            instances::terminate_instance(state, &mut instance).await;
        }
        _ => {
            instance.status = InstanceStatus::Idle.as_str().to_string();
            instance.job_id = None;
            instance.idle_since = Some(Utc::now());
            state.persistence.update_instance(&instance).await?;
            debug!(instance = %instance.name, "Instance released back to pool");
        }
    }
    Ok(())
}

/// Register the replica's server as a gateway upstream once a service
/// job is running. Best-effort.
async fn register_service_upstream(
    state: &SchedulerState,
    job: &JobRecord,
    provisioning: &ProvisioningData,
) {
    let Some(gateway) = &state.gateway else {
        return;
    };
    let service = match service_spec_for_job(state, job).await {
        Some(service) => service,
        None => return,
    };
    let server = format!("{}:{}", provisioning.hostname, service.port);
    if let Err(e) = gateway.add_upstream(&service.domain, &server, &job.id).await {
        warn!(job = %job.job_name, domain = %service.domain, error = %e, "Failed to add upstream");
    }
}

/// Remove the replica's upstream when a service job terminates.
/// Best-effort.
async fn remove_service_upstream(state: &SchedulerState, job: &JobRecord) {
    let Some(gateway) = &state.gateway else {
        return;
    };
    let service = match service_spec_for_job(state, job).await {
        Some(service) => service,
        None => return,
    };
    if let Err(e) = gateway.remove_upstream(&service.domain, &job.id).await {
        debug!(job = %job.job_name, domain = %service.domain, error = %e, "No upstream to remove");
    }
}

async fn service_spec_for_job(
    state: &SchedulerState,
    job: &JobRecord,
) -> Option<crate::models::ServiceSpec> {
    let run = state.persistence.get_run(&job.run_id).await.ok()??;
    run.service().ok()?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Profile, Replicas, ResourcesSpec, RunConfiguration};

    fn task_spec(run_name: Option<&str>) -> RunSpec {
        RunSpec {
            run_name: run_name.map(str::to_string),
            repo_id: "repo-1".to_string(),
            profile: Profile::default(),
            configuration: RunConfiguration::Task {
                commands: vec!["echo hello".to_string()],
                image: None,
                resources: ResourcesSpec::default(),
            },
        }
    }

    #[test]
    fn test_jobs_from_run_spec_names_jobs() {
        let jobs = jobs_from_run_spec(&task_spec(Some("brave-otter-1")), 0).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_name, "brave-otter-1-0-0");
        assert_eq!(jobs[0].image, default_image());
        assert_eq!(jobs[0].port, None);
    }

    #[test]
    fn test_jobs_from_run_spec_requires_name() {
        assert!(jobs_from_run_spec(&task_spec(None), 0).is_err());
    }

    #[test]
    fn test_jobs_from_run_spec_carries_service_port() {
        let spec = RunSpec {
            run_name: Some("svc-1".to_string()),
            repo_id: "repo-1".to_string(),
            profile: Profile::default(),
            configuration: RunConfiguration::Service {
                commands: vec!["python app.py".to_string()],
                image: Some("custom:latest".to_string()),
                resources: ResourcesSpec::default(),
                port: 8000,
                replicas: Replicas { min: 2, max: 2 },
                auth: false,
            },
        };
        let jobs = jobs_from_run_spec(&spec, 1).unwrap();
        assert_eq!(jobs[0].job_name, "svc-1-0-1");
        assert_eq!(jobs[0].port, Some(8000));
        assert_eq!(jobs[0].image, "custom:latest");
    }
}
