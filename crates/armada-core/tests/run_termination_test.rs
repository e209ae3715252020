// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run termination tests: graceful stop, abort, finalization, cost.

mod common;

use armada_core::models::{BackendType, ProvisioningData, RunStatus};
use armada_core::persistence::Persistence;
use armada_core::runner::RunnerJobStatus;
use armada_core::runs;
use chrono::Duration;
use common::*;

/// Submit a task run and drive it to RUNNING through the reconciler.
async fn running_task(ctx: &TestContext) -> (String, String) {
    ctx.backend()
        .set_offers(vec![offer(BackendType::Aws, "m5.xlarge", 0.5)]);
    let run = runs::submit_run(&ctx.state, &ctx.user, &ctx.project, task_run_spec())
        .await
        .expect("submit");

    let reconciler = ctx.reconciler();
    reconciler.tick().await;
    let job = &ctx.run_jobs(&run.id).await[0];
    assert_eq!(job.status, "provisioning", "job should be provisioning after one tick");

    ctx.runner.set_status(&job.id, RunnerJobStatus::Running);
    reconciler.tick().await;
    let job = &ctx.run_jobs(&run.id).await[0];
    assert_eq!(job.status, "running");
    (run.id.clone(), job.id.clone())
}

#[tokio::test]
async fn test_abort_skips_stop_signal_and_aborts_jobs() {
    let ctx = TestContext::new().await;
    let (run_id, job_id) = running_task(&ctx).await;

    runs::stop_run(&ctx.state, &run_id, true).await.expect("abort");

    let record = ctx.run_record(&run_id).await;
    assert_eq!(record.status, "terminated");
    assert_eq!(record.termination_reason.as_deref(), Some("aborted_by_user"));

    let job = &ctx.run_jobs(&run_id).await[0];
    assert_eq!(job.status, "aborted");
    assert_eq!(job.termination_reason.as_deref(), Some("aborted_by_user"));

    // Aborts bypass the graceful stop signal
    assert!(ctx.runner.stop_calls().is_empty(), "no stop signal on abort");
    let _ = job_id;
}

#[tokio::test]
async fn test_graceful_stop_signals_runner_and_terminates_jobs() {
    let ctx = TestContext::new().await;
    let (run_id, job_id) = running_task(&ctx).await;

    runs::stop_run(&ctx.state, &run_id, false).await.expect("stop");

    let record = ctx.run_record(&run_id).await;
    assert_eq!(record.status, "terminated");
    assert_eq!(record.termination_reason.as_deref(), Some("stopped_by_user"));

    let job = &ctx.run_jobs(&run_id).await[0];
    assert_eq!(job.status, "terminated");
    assert_eq!(job.termination_reason.as_deref(), Some("terminated_by_user"));

    assert_eq!(ctx.runner.stop_calls(), vec![job_id]);
}

#[tokio::test]
async fn test_stop_releases_instance_back_to_pool() {
    let ctx = TestContext::new().await;
    let (run_id, _) = running_task(&ctx).await;

    let job = &ctx.run_jobs(&run_id).await[0];
    let instance_id = job.instance_id.clone().expect("job bound to an instance");

    runs::stop_run(&ctx.state, &run_id, false).await.expect("stop");

    let instance = ctx
        .persistence
        .get_instance(&instance_id)
        .await
        .expect("get instance")
        .expect("instance exists");
    assert_eq!(instance.status, "idle");
    assert!(instance.job_id.is_none());
    assert!(instance.idle_since.is_some());
}

#[tokio::test]
async fn test_stopping_finished_run_is_a_no_op() {
    let ctx = TestContext::new().await;
    let (run_id, _) = running_task(&ctx).await;

    runs::stop_run(&ctx.state, &run_id, false).await.expect("stop");
    let first = ctx.run_record(&run_id).await;

    runs::stop_run(&ctx.state, &run_id, true).await.expect("second stop");
    let second = ctx.run_record(&run_id).await;
    assert_eq!(first.status, second.status);
    assert_eq!(first.termination_reason, second.termination_reason);
}

#[tokio::test]
async fn test_run_is_terminal_iff_all_jobs_are_terminal() {
    let ctx = TestContext::new().await;
    let (run_id, _) = running_task(&ctx).await;

    // Mid-flight: run not finished, job not finished
    let record = ctx.run_record(&run_id).await;
    assert!(!record.run_status().unwrap().is_finished());
    assert!(
        ctx.run_jobs(&run_id)
            .await
            .iter()
            .any(|j| !j.job_status().unwrap().is_finished())
    );

    runs::stop_run(&ctx.state, &run_id, false).await.expect("stop");

    let record = ctx.run_record(&run_id).await;
    assert!(record.run_status().unwrap().is_finished());
    for job in ctx.run_jobs(&run_id).await {
        assert!(job.job_status().unwrap().is_finished());
    }
}

#[tokio::test]
async fn test_service_stop_unregisters_gateway_domain() {
    let ctx = TestContext::new().await;
    let run = runs::submit_run(&ctx.state, &ctx.user, &ctx.project, service_run_spec(1, 1))
        .await
        .expect("submit service");
    let domain = run.service.as_ref().expect("service").domain.clone();
    let gateway = ctx.state.gateway.as_ref().expect("gateway");
    assert!(gateway.is_registered(&domain).await);

    runs::stop_run(&ctx.state, &run.id, true).await.expect("stop");

    let record = ctx.run_record(&run.id).await;
    assert_eq!(record.run_status().unwrap(), RunStatus::Terminated);
    assert!(!gateway.is_registered(&domain).await);
}

#[tokio::test]
async fn test_run_cost_sums_submission_costs() {
    let ctx = TestContext::new().await;
    let run = runs::submit_run(&ctx.state, &ctx.user, &ctx.project, task_run_spec())
        .await
        .expect("submit");

    // Without provisioning data the run costs nothing
    let view = runs::get_run(&ctx.state, &ctx.project, &run.run_name)
        .await
        .expect("get")
        .expect("found");
    assert_eq!(view.cost, 0.0);

    // Fabricate a finished one-hour submission at $2.50/h
    let job = &ctx.run_jobs(&run.id).await[0];
    let provisioning = ProvisioningData::from_launch(
        &offer(BackendType::Aws, "m5.xlarge", 2.5),
        armada_core::models::LaunchedInstanceInfo {
            instance_id: "i-123".to_string(),
            ip_address: "10.0.0.1".to_string(),
            region: "eu-west-1".to_string(),
            username: "ubuntu".to_string(),
            ssh_port: 22,
            dockerized: true,
            backend_data: None,
        },
    );
    ctx.persistence
        .update_job_provisioning(&job.id, &serde_json::to_string(&provisioning).unwrap(), None)
        .await
        .expect("set provisioning");
    ctx.persistence
        .update_job_status(&job.id, "done", Some("done_by_runner"))
        .await
        .expect("finish job");
    ctx.persistence
        .update_job_last_processed(&job.id, job.submitted_at + Duration::hours(1))
        .await
        .expect("set duration");

    let view = runs::get_run(&ctx.state, &ctx.project, &run.run_name)
        .await
        .expect("get")
        .expect("found");
    assert!((view.cost - 2.5).abs() < 1e-9, "cost was {}", view.cost);
}
