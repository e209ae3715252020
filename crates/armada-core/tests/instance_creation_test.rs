// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Explicit instance creation tests: fallback ordering, capability
//! gaps, exhaustion.

mod common;

use armada_core::backends::mock::CreateOutcome;
use armada_core::error::CoreError;
use armada_core::instances;
use armada_core::models::{BackendType, Profile, Requirements, SshKey};
use armada_core::persistence::Persistence;
use armada_core::pools;
use common::*;

fn user_key() -> SshKey {
    SshKey {
        public: "ssh-ed25519 AAAATEST user".to_string(),
        private: None,
    }
}

#[tokio::test]
async fn test_create_instance_falls_back_until_a_backend_succeeds() {
    let ctx = TestContext::with_backends(&[
        BackendType::Aws,
        BackendType::Gcp,
        BackendType::Azure,
    ])
    .await;
    ctx.backends[0].set_offers(vec![offer(BackendType::Aws, "m5.xlarge", 0.5)]);
    ctx.backends[1].set_offers(vec![offer(BackendType::Gcp, "n2-standard-4", 0.4)]);
    ctx.backends[2].set_offers(vec![offer(BackendType::Azure, "D4s_v3", 0.6)]);
    ctx.backends[0].push_create_outcome(CreateOutcome::Error("quota exceeded".to_string()));
    ctx.backends[1].push_create_outcome(CreateOutcome::Error("no capacity".to_string()));

    let record = instances::create_instance(
        &ctx.state,
        &ctx.project,
        &ctx.user,
        &user_key(),
        None,
        "worker-1",
        &Profile::default(),
        &Requirements::default(),
    )
    .await
    .expect("third backend must succeed");

    assert_eq!(record.status, "provisioning");
    assert_eq!(record.backend, "azure");
    assert!(record.provisioning_data.is_some());

    // The row is committed
    let persisted = ctx
        .persistence
        .get_instance(&record.id)
        .await
        .expect("get")
        .expect("persisted");
    assert_eq!(persisted.status, "provisioning");

    // The first two backends were each tried once
    assert_eq!(ctx.backends[0].create_calls().len(), 1);
    assert_eq!(ctx.backends[1].create_calls().len(), 1);
    assert_eq!(ctx.backends[2].create_calls().len(), 1);
}

#[tokio::test]
async fn test_create_instance_skips_capability_gaps() {
    let ctx = TestContext::with_backends(&[BackendType::Aws, BackendType::Gcp]).await;
    ctx.backends[0].set_offers(vec![offer(BackendType::Aws, "m5.xlarge", 0.5)]);
    ctx.backends[1].set_offers(vec![offer(BackendType::Gcp, "n2-standard-4", 0.4)]);
    ctx.backends[0].push_create_outcome(CreateOutcome::NotSupported);

    let record = instances::create_instance(
        &ctx.state,
        &ctx.project,
        &ctx.user,
        &user_key(),
        None,
        "worker-2",
        &Profile::default(),
        &Requirements::default(),
    )
    .await
    .expect("the next backend must be tried");
    assert_eq!(record.backend, "gcp");
}

#[tokio::test]
async fn test_create_instance_rejects_backends_without_support() {
    let ctx = TestContext::with_backends(&[BackendType::Vastai]).await;
    ctx.backends[0].set_offers(vec![offer(BackendType::Vastai, "rtx4090", 0.3)]);

    let err = instances::create_instance(
        &ctx.state,
        &ctx.project,
        &ctx.user,
        &user_key(),
        None,
        "worker-3",
        &Profile::default(),
        &Requirements::default(),
    )
    .await
    .expect_err("runner-only backends cannot create instances");
    match err {
        CoreError::Client(msg) => {
            assert!(msg.contains("vastai"), "message was: {msg}");
            assert!(msg.contains("do not support create_instance"));
        }
        other => panic!("expected a client error, got: {other}"),
    }
}

#[tokio::test]
async fn test_create_instance_skips_runner_runtime_offers() {
    let ctx = TestContext::new().await;
    ctx.backend()
        .set_offers(vec![runner_offer(BackendType::Aws, "container-only", 0.2)]);

    let err = instances::create_instance(
        &ctx.state,
        &ctx.project,
        &ctx.user,
        &user_key(),
        None,
        "worker-4",
        &Profile::default(),
        &Requirements::default(),
    )
    .await
    .expect_err("runner-runtime offers cannot host a VM");
    match err {
        CoreError::Client(msg) => assert_eq!(msg, "Failed to create the instance."),
        other => panic!("expected a client error, got: {other}"),
    }
    assert!(
        ctx.backend().create_calls().is_empty(),
        "runner-runtime offers must never reach create_instance"
    );
}

#[tokio::test]
async fn test_exhausted_offers_leave_no_side_effects() {
    let ctx = TestContext::new().await;
    ctx.backend()
        .set_offers(vec![offer(BackendType::Aws, "m5.xlarge", 0.5)]);
    ctx.backend()
        .push_create_outcome(CreateOutcome::Error("boom".to_string()));

    let err = instances::create_instance(
        &ctx.state,
        &ctx.project,
        &ctx.user,
        &user_key(),
        None,
        "worker-5",
        &Profile::default(),
        &Requirements::default(),
    )
    .await
    .expect_err("every offer failed");
    match err {
        CoreError::Client(msg) => assert_eq!(msg, "Failed to create the instance."),
        other => panic!("expected a client error, got: {other}"),
    }

    // No instance row was committed
    let pool = pools::get_or_create_pool_by_name(&ctx.state, &ctx.project, None)
        .await
        .expect("pool");
    let instances = ctx
        .persistence
        .list_pool_instances(&pool.id)
        .await
        .expect("list");
    assert!(instances.is_empty());
}

#[tokio::test]
async fn test_created_instance_lands_in_named_pool() {
    let ctx = TestContext::new().await;
    ctx.backend()
        .set_offers(vec![offer(BackendType::Aws, "m5.xlarge", 0.5)]);

    let record = instances::create_instance(
        &ctx.state,
        &ctx.project,
        &ctx.user,
        &user_key(),
        Some("gpu-pool"),
        "worker-6",
        &Profile::default(),
        &Requirements::default(),
    )
    .await
    .expect("create");

    let pool = ctx
        .persistence
        .get_pool_by_name(&ctx.project.id, "gpu-pool")
        .await
        .expect("get pool")
        .expect("pool created on demand");
    assert_eq!(record.pool_id, pool.id);
}
