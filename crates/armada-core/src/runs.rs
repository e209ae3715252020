// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run submission, planning, listing and termination.
//!
//! Run processing has priority over job processing: operations here take
//! the run-processing lock and, for terminating flows, wait until no job
//! of the run is held by any job phase before mutating job rows.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::jobs;
use crate::locks::ProcessingPhase;
use crate::models::{
    InstanceOffer, Job, JobPlan, JobStatus, Run, RunConfiguration, RunPlan, RunSpec, RunStatus,
    RunTerminationReason, ServiceSpec,
};
use crate::names::validate_run_name;
use crate::persistence::{JobRecord, ProjectRecord, RunRecord, UserRecord};
use crate::planner::{self, PLAN_OFFERS_PREVIEW_LIMIT};
use crate::pools;
use crate::state::SchedulerState;

/// List a project's runs, newest first.
///
/// Rows whose stored spec no longer deserializes are excluded (schema
/// drift tolerance); the excluded count is logged at debug level.
pub async fn list_project_runs(
    state: &SchedulerState,
    project: &ProjectRecord,
    repo_id: Option<&str>,
) -> Result<Vec<Run>> {
    let repo_row_id = match repo_id {
        Some(repo_id) => {
            let repo = state
                .persistence
                .get_repo(&project.id, repo_id)
                .await?
                .ok_or_else(|| CoreError::client(format!("Repo {repo_id} does not exist")))?;
            Some(repo.id)
        }
        None => None,
    };
    let records = state
        .persistence
        .list_project_runs(&project.id, repo_row_id.as_deref())
        .await?;
    let total = records.len();
    let mut runs = Vec::with_capacity(total);
    for record in &records {
        match run_record_to_run(state, project, record).await {
            Ok(run) => runs.push(run),
            Err(CoreError::Validation { .. }) | Err(CoreError::Json(_)) => {}
            Err(e) => return Err(e),
        }
    }
    if runs.len() < total {
        debug!(
            excluded = total - runs.len(),
            project = %project.name,
            "Can't load some runs from project"
        );
    }
    Ok(runs)
}

/// Fetch one run by name.
pub async fn get_run(
    state: &SchedulerState,
    project: &ProjectRecord,
    run_name: &str,
) -> Result<Option<Run>> {
    let record = state
        .persistence
        .get_run_by_name(&project.id, run_name)
        .await?;
    match record {
        Some(record) => Ok(Some(run_record_to_run(state, project, &record).await?)),
        None => Ok(None),
    }
}

/// Assemble the caller-facing run view: jobs grouped by
/// (replica, job_num), submissions ascending, cost rolled up.
pub async fn run_record_to_run(
    state: &SchedulerState,
    project: &ProjectRecord,
    record: &RunRecord,
) -> Result<Run> {
    let run_spec = record.spec()?;
    let status = record.run_status()?;
    let termination_reason = record.reason()?;
    let service = record.service()?;
    let user = state
        .persistence
        .get_user(&record.user_id)
        .await?
        .map(|u| u.name)
        .unwrap_or_else(|| record.user_id.clone());

    let job_records = state.persistence.list_run_jobs(&record.id).await?;
    let mut jobs: Vec<Job> = Vec::new();
    for job_record in &job_records {
        let submission = jobs::job_record_to_submission(job_record)?;
        let spec = job_record.spec()?;
        match jobs.last_mut() {
            Some(last)
                if last.job_spec.replica_num == spec.replica_num
                    && last.job_spec.job_num == spec.job_num =>
            {
                last.job_submissions.push(submission);
            }
            _ => jobs.push(Job {
                job_spec: spec,
                job_submissions: vec![submission],
            }),
        }
    }

    let latest_job_submission = jobs
        .first()
        .and_then(|job| job.job_submissions.last().cloned());
    let cost = run_cost(&jobs);

    Ok(Run {
        id: record.id.clone(),
        project_name: project.name.clone(),
        user,
        run_name: record.run_name.clone(),
        submitted_at: record.submitted_at,
        status,
        termination_reason,
        run_spec,
        jobs,
        latest_job_submission,
        cost,
        service,
    })
}

/// Total cost of a run: the sum of submission costs, rounded to 4
/// decimals. Submissions without provisioning data cost nothing.
pub fn run_cost(jobs: &[Job]) -> f64 {
    let total: f64 = jobs
        .iter()
        .flat_map(|job| job.job_submissions.iter())
        .map(|submission| submission.cost())
        .sum();
    (total * 10_000.0).round() / 10_000.0
}

/// Submit a run.
///
/// Validates the repo and backend configuration, allocates or validates
/// the run name (soft-deleting a finished previous run of the same
/// name), registers services with the gateway, materializes one job per
/// replica and commits the run and its jobs in one transaction.
pub async fn submit_run(
    state: &SchedulerState,
    user: &UserRecord,
    project: &ProjectRecord,
    mut run_spec: RunSpec,
) -> Result<Run> {
    // 1. The repo must exist
    let repo = state
        .persistence
        .get_repo(&project.id, &run_spec.repo_id)
        .await?
        .ok_or_else(|| {
            CoreError::client(format!("Repo {} does not exist", run_spec.repo_id))
        })?;

    // 2. The project must have at least one backend
    let backends = state.backends.for_project(project)?;
    if backends.is_empty() {
        return Err(CoreError::client("No backends configured"));
    }

    // 3. Allocate or validate the run name
    match &run_spec.run_name {
        None => {
            let generated = state
                .names
                .generate(state.persistence.as_ref(), project)
                .await?;
            run_spec.run_name = Some(generated);
        }
        Some(name) => {
            validate_run_name(name)?;
            delete_runs(state, project, &[name.clone()]).await?;
        }
    }
    let run_name = run_spec
        .run_name
        .clone()
        .ok_or_else(|| CoreError::Other("run name missing after allocation".to_string()))?;

    // 4. Validate replica configuration for services
    let mut replicas = 1u32;
    if let RunConfiguration::Service {
        replicas: spec_replicas,
        ..
    } = &run_spec.configuration
    {
        if spec_replicas.min < 1 {
            return Err(CoreError::client("Replicas count should be at least 1"));
        }
        if spec_replicas.min != spec_replicas.max {
            return Err(CoreError::client("Auto-scaling is not supported yet"));
        }
        replicas = spec_replicas.min;
    }

    let submitted_at = Utc::now();
    let mut record = RunRecord {
        id: Uuid::new_v4().to_string(),
        project_id: project.id.clone(),
        repo_id: repo.id,
        user_id: user.id.clone(),
        run_name: run_name.clone(),
        submitted_at,
        last_processed_at: submitted_at,
        status: RunStatus::Submitted.as_str().to_string(),
        termination_reason: None,
        run_spec: serde_json::to_string(&run_spec)?,
        service_spec: None,
        gateway_id: None,
        deleted: false,
    };

    // 5. Register services with the gateway before anything is persisted
    let mut registered_domain = None;
    if let RunConfiguration::Service { port, auth, .. } = &run_spec.configuration {
        let service = register_service(state, project, &record, *port, *auth).await?;
        registered_domain = Some(service.domain.clone());
        record.gateway_id = Some(Uuid::new_v4().to_string());
        record.service_spec = Some(serde_json::to_string(&service)?);
    }

    // 6. Materialize jobs for every replica and commit
    let mut job_records = Vec::new();
    for replica_num in 0..replicas {
        for job_spec in jobs::jobs_from_run_spec(&run_spec, replica_num)? {
            job_records.push(jobs::submission_record(&record, &job_spec, 0)?);
        }
    }
    if let Err(e) = state
        .persistence
        .create_run_with_jobs(&record, &job_records)
        .await
    {
        // The run insert rolled back; don't leave the domain behind
        if let (Some(gateway), Some(domain)) = (&state.gateway, &registered_domain)
            && let Err(unregister_err) = gateway.unregister_domain(domain).await
        {
            warn!(%domain, error = %unregister_err, "Failed to unregister domain after aborted submit");
        }
        return Err(e);
    }

    info!(run = %run_name, project = %project.name, jobs = job_records.len(), "Run submitted");
    run_record_to_run(state, project, &record).await
}

async fn register_service(
    state: &SchedulerState,
    project: &ProjectRecord,
    record: &RunRecord,
    port: u16,
    auth: bool,
) -> Result<ServiceSpec> {
    let gateway = state
        .gateway
        .as_ref()
        .ok_or_else(|| CoreError::client("No gateway configured to run services"))?;
    let base_domain = state
        .config
        .service_domain
        .as_ref()
        .ok_or_else(|| CoreError::client("No service domain configured"))?;
    let domain = format!("{}.{}", record.run_name, base_domain);
    gateway
        .register_service(&project.name, &record.id, &domain, auth)
        .await?;
    Ok(ServiceSpec { domain, port, auth })
}

/// Compute a dry-run plan: pool offers first, then (under the
/// reuse-or-create policy) live backend offers, capped to a preview of
/// 50 with the true total preserved. No run rows are written.
pub async fn get_run_plan(
    state: &SchedulerState,
    project: &ProjectRecord,
    user: &UserRecord,
    run_spec: &RunSpec,
) -> Result<RunPlan> {
    if let Some(name) = &run_spec.run_name {
        validate_run_name(name)?;
    }

    let mut spec = run_spec.clone();
    let profile = spec.profile.clone();
    let creation_policy = profile.creation_policy.unwrap_or_default();

    let pool =
        pools::get_or_create_pool_by_name(state, project, profile.pool_name.as_deref()).await?;
    let requirements = spec.requirements();
    let instances = state.persistence.list_pool_instances(&pool.id).await?;
    let filtered = pools::filter_pool_instances(&instances, &profile, &requirements);
    let pool_offers = pools::pool_instance_offers(&filtered);

    // Jobs are regenerated on submission; plan with replica 0 only
    let original_name = spec.run_name.take();
    spec.run_name = Some("dry-run".to_string());
    let job_specs = jobs::jobs_from_run_spec(&spec, 0)?;

    let mut job_plans = Vec::new();
    for job_spec in job_specs {
        let mut offers: Vec<InstanceOffer> = pool_offers.clone();
        if creation_policy == crate::models::CreationPolicy::ReuseOrCreate {
            let remote = planner::get_offers_by_requirements(
                state,
                project,
                &profile,
                &job_spec.requirements,
                false,
            )
            .await?;
            offers.extend(remote.into_iter().map(|(_, offer)| offer));
        }
        // Pool offers lead, remote offers follow; callers re-sort the
        // combined list if they want a different ranking
        let total_offers = offers.len();
        let max_price = planner::max_offer_price(&offers);
        offers.truncate(PLAN_OFFERS_PREVIEW_LIMIT);
        job_plans.push(JobPlan {
            job_spec,
            offers,
            total_offers,
            max_price,
        });
    }

    spec.run_name = original_name;
    // Write the resolved pool name back for the client
    spec.profile.pool_name = Some(pool.name.clone());
    Ok(RunPlan {
        project_name: project.name.clone(),
        user: user.name.clone(),
        run_spec: spec,
        job_plans,
    })
}

/// Stop several runs by name. Finished runs are skipped.
pub async fn stop_runs(
    state: &SchedulerState,
    project: &ProjectRecord,
    run_names: &[String],
    abort: bool,
) -> Result<()> {
    let records = state
        .persistence
        .list_runs_by_names(&project.id, run_names)
        .await?;
    for record in records {
        if record.run_status()?.is_finished() {
            continue;
        }
        stop_run(state, &record.id, abort).await?;
    }
    Ok(())
}

/// Stop one run.
///
/// Takes the run-processing lock, marks the run TERMINATING with the
/// user-facing reason and processes the terminating flow synchronously,
/// out of the reconciler cadence.
pub async fn stop_run(state: &SchedulerState, run_id: &str, abort: bool) -> Result<()> {
    let _guard = state.locks.lock(ProcessingPhase::Runs, run_id).await;

    let Some(run) = state.persistence.get_run(run_id).await? else {
        return Ok(());
    };
    if run.run_status()?.is_finished() {
        return Ok(());
    }

    let reason = if abort {
        RunTerminationReason::AbortedByUser
    } else {
        RunTerminationReason::StoppedByUser
    };
    state
        .persistence
        .update_run_status(&run.id, RunStatus::Terminating.as_str(), Some(reason.as_str()))
        .await?;
    debug!(run = %run.run_name, reason = reason.as_str(), "Terminating run");

    // Process the run out of turn
    process_terminating_run(state, &run.id).await?;
    state
        .persistence
        .update_run_last_processed(&run.id, Utc::now())
        .await?;
    Ok(())
}

/// Soft-delete finished runs by name. Active runs are rejected.
pub async fn delete_runs(
    state: &SchedulerState,
    project: &ProjectRecord,
    run_names: &[String],
) -> Result<()> {
    let records = state
        .persistence
        .list_runs_by_names(&project.id, run_names)
        .await?;
    let active: Vec<&str> = records
        .iter()
        .filter(|r| r.run_status().map(|s| !s.is_finished()).unwrap_or(false))
        .map(|r| r.run_name.as_str())
        .collect();
    if !active.is_empty() {
        return Err(CoreError::client(format!(
            "Cannot delete active runs: {active:?}"
        )));
    }
    state
        .persistence
        .mark_runs_deleted(&project.id, run_names)
        .await?;
    Ok(())
}

/// Process a TERMINATING run. The caller must hold the run-processing
/// lock for the run.
///
/// Waits until no job of the run is held by any job phase, terminates
/// each unfinished job with the reason mapped from the run's termination
/// reason, and once every job finished, unregisters the gateway service
/// (best-effort) and settles the final run status.
pub async fn process_terminating_run(state: &SchedulerState, run_id: &str) -> Result<()> {
    let run = state
        .persistence
        .get_run(run_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Run", run_id))?;
    let reason = run
        .reason()?
        .unwrap_or(RunTerminationReason::StoppedByUser);
    let job_reason = reason.to_job_termination_reason();

    let job_ids: Vec<String> = state
        .persistence
        .list_run_jobs(&run.id)
        .await?
        .into_iter()
        .map(|job| job.id)
        .collect();
    for phase in ProcessingPhase::job_phases() {
        state.locks.wait_empty(phase, &job_ids).await;
    }

    // Refresh: job processing may have advanced the rows while we waited
    let job_records = state.persistence.list_run_jobs(&run.id).await?;
    let mut unfinished = 0usize;
    for job in &job_records {
        let status = job.job_status()?;
        if status.is_finished() {
            continue;
        }
        unfinished += 1;
        if status == JobStatus::Terminating {
            // The terminating-jobs pass will settle it
            continue;
        }
        if status == JobStatus::Running && job_reason.sends_stop_signal() {
            jobs::stop_runner(state, job).await;
        }
        jobs::transition_to_terminating(state, job, job_reason).await?;
        let refreshed = state
            .persistence
            .get_job(&job.id)
            .await?
            .ok_or_else(|| CoreError::not_found("Job", &job.id))?;
        jobs::process_terminating_job(state, &refreshed).await?;
        let settled = state
            .persistence
            .get_job(&job.id)
            .await?
            .ok_or_else(|| CoreError::not_found("Job", &job.id))?;
        if settled.job_status()?.is_finished() {
            unfinished -= 1;
        }
        state
            .persistence
            .update_job_last_processed(&job.id, Utc::now())
            .await?;
    }

    if unfinished == 0 {
        if run.gateway_id.is_some() {
            unregister_service(state, &run).await;
        }
        let final_status = reason.to_status();
        state
            .persistence
            .update_run_status(&run.id, final_status.as_str(), Some(reason.as_str()))
            .await?;
        info!(
            run = %run.run_name,
            status = final_status.as_str(),
            reason = reason.as_str(),
            "Run status has changed TERMINATING -> final"
        );
    }
    Ok(())
}

async fn unregister_service(state: &SchedulerState, run: &RunRecord) {
    let Some(gateway) = &state.gateway else {
        return;
    };
    let domain = match run.service() {
        Ok(Some(service)) => service.domain,
        _ => return,
    };
    if let Err(e) = gateway.unregister_domain(&domain).await {
        warn!(run = %run.run_name, %domain, error = %e, "Failed to unregister service");
    }
}

/// Process an active (submitted/provisioning/running) run. The caller
/// must hold the run-processing lock for the run.
///
/// Derives the run status from its jobs' latest submissions, resubmits
/// failed jobs while the retry budget allows, and enters the
/// terminating flow when every job is done or a failure is final.
pub async fn process_active_run(state: &SchedulerState, run_id: &str) -> Result<()> {
    let run = state
        .persistence
        .get_run(run_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Run", run_id))?;
    let current = run.run_status()?;
    if current.is_finished() || current == RunStatus::Terminating {
        return Ok(());
    }

    let job_records = state.persistence.list_run_jobs(&run.id).await?;
    // Latest submission per (replica, job_num); rows are ordered with
    // ascending submission_num last within each group
    let mut latest: Vec<&JobRecord> = Vec::new();
    for job in &job_records {
        match latest.last() {
            Some(last) if last.replica_num == job.replica_num && last.job_num == job.job_num => {
                let idx = latest.len() - 1;
                latest[idx] = job;
            }
            _ => latest.push(job),
        }
    }

    let mut failed: Option<&JobRecord> = None;
    let mut any_running = false;
    let mut any_provisioning = false;
    let mut all_finished = true;
    for &job in &latest {
        match job.job_status()? {
            JobStatus::Failed => failed = failed.or(Some(job)),
            JobStatus::Running => {
                any_running = true;
                all_finished = false;
            }
            JobStatus::Provisioning => {
                any_provisioning = true;
                all_finished = false;
            }
            status if status.is_finished() => {}
            _ => all_finished = false,
        }
    }

    if let Some(failed_job) = failed {
        let retries_left = state.config.max_retries > 0
            && (failed_job.submission_num as u32) < state.config.max_retries;
        if retries_left {
            let spec = failed_job.spec()?;
            let resubmission =
                jobs::submission_record(&run, &spec, failed_job.submission_num + 1)?;
            state.persistence.insert_job(&resubmission).await?;
            info!(
                run = %run.run_name,
                job = %resubmission.job_name,
                submission_num = resubmission.submission_num,
                "Resubmitted failed job"
            );
            if current != RunStatus::Submitted {
                state
                    .persistence
                    .update_run_status(&run.id, RunStatus::Submitted.as_str(), None)
                    .await?;
            }
        } else {
            let reason = if state.config.max_retries > 0 {
                RunTerminationReason::RetryLimitExceeded
            } else {
                RunTerminationReason::JobFailed
            };
            state
                .persistence
                .update_run_status(&run.id, RunStatus::Terminating.as_str(), Some(reason.as_str()))
                .await?;
            process_terminating_run(state, &run.id).await?;
        }
    } else if all_finished && !latest.is_empty() {
        state
            .persistence
            .update_run_status(
                &run.id,
                RunStatus::Terminating.as_str(),
                Some(RunTerminationReason::AllJobsDone.as_str()),
            )
            .await?;
        process_terminating_run(state, &run.id).await?;
    } else {
        let derived = if any_running {
            RunStatus::Running
        } else if any_provisioning {
            RunStatus::Provisioning
        } else {
            current
        };
        if derived != current {
            state
                .persistence
                .update_run_status(&run.id, derived.as_str(), None)
                .await?;
            info!(
                run = %run.run_name,
                from = current.as_str(),
                to = derived.as_str(),
                "Run status advanced"
            );
        }
    }

    state
        .persistence
        .update_run_last_processed(&run.id, Utc::now())
        .await?;
    Ok(())
}
