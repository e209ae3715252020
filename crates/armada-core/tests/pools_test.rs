// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pool manager tests.

mod common;

use armada_core::error::CoreError;
use armada_core::models::{
    BackendType, InstanceStatus, Profile, Requirements, ResourcesSpec, TerminationPolicy,
};
use armada_core::persistence::{InstanceRecord, Persistence};
use armada_core::pools;
use chrono::Utc;
use common::*;
use uuid::Uuid;

fn instance_record(
    ctx: &TestContext,
    pool_id: &str,
    name: &str,
    offer: &armada_core::models::InstanceOffer,
    status: InstanceStatus,
) -> InstanceRecord {
    InstanceRecord {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        project_id: ctx.project.id.clone(),
        pool_id: pool_id.to_string(),
        backend: offer.backend.as_str().to_string(),
        region: offer.region.clone(),
        price: offer.price,
        offer: serde_json::to_string(offer).expect("offer json"),
        provisioning_data: None,
        status: status.as_str().to_string(),
        created_at: Utc::now(),
        started_at: Some(Utc::now()),
        terminated_at: None,
        idle_since: None,
        termination_policy: TerminationPolicy::DestroyAfterIdle.as_str().to_string(),
        termination_idle_time: 72 * 3600,
        job_id: None,
    }
}

#[tokio::test]
async fn test_default_pool_is_created_on_first_reference() {
    let ctx = TestContext::new().await;

    let pool = pools::get_or_create_pool_by_name(&ctx.state, &ctx.project, None)
        .await
        .expect("pool");
    assert_eq!(pool.name, "default-pool");
    assert!(pool.is_default);

    let again = pools::get_or_create_pool_by_name(&ctx.state, &ctx.project, None)
        .await
        .expect("pool again");
    assert_eq!(pool.id, again.id, "get_or_create must be idempotent");
}

#[tokio::test]
async fn test_concurrent_get_or_create_yields_one_pool() {
    let ctx = TestContext::new().await;

    let (a, b) = tokio::join!(
        pools::get_or_create_pool_by_name(&ctx.state, &ctx.project, Some("shared")),
        pools::get_or_create_pool_by_name(&ctx.state, &ctx.project, Some("shared")),
    );
    let a = a.expect("first caller");
    let b = b.expect("second caller");
    assert_eq!(a.id, b.id, "concurrent callers must not create duplicates");

    let listed = pools::list_pools(&ctx.state, &ctx.project).await.expect("list");
    assert_eq!(listed.iter().filter(|p| p.name == "shared").count(), 1);
}

#[tokio::test]
async fn test_exactly_one_default_pool() {
    let ctx = TestContext::new().await;
    pools::get_or_create_pool_by_name(&ctx.state, &ctx.project, None)
        .await
        .expect("default");
    pools::create_pool(&ctx.state, &ctx.project, "second")
        .await
        .expect("create");

    pools::set_default_pool(&ctx.state, &ctx.project, "second")
        .await
        .expect("set default");

    let listed = pools::list_pools(&ctx.state, &ctx.project).await.expect("list");
    let defaults: Vec<_> = listed.iter().filter(|p| p.default).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].name, "second");
}

#[tokio::test]
async fn test_create_existing_pool_fails() {
    let ctx = TestContext::new().await;
    pools::create_pool(&ctx.state, &ctx.project, "gpu-pool")
        .await
        .expect("create");
    let err = pools::create_pool(&ctx.state, &ctx.project, "gpu-pool")
        .await
        .expect_err("duplicate pool must be rejected");
    assert!(matches!(err, CoreError::Client(_)));
}

#[tokio::test]
async fn test_delete_pool_with_instances_requires_force() {
    let ctx = TestContext::new().await;
    let pool = pools::get_or_create_pool_by_name(&ctx.state, &ctx.project, Some("busy-pool"))
        .await
        .expect("pool");
    let o = offer(BackendType::Aws, "m5.xlarge", 0.5);
    ctx.persistence
        .insert_instance(&instance_record(&ctx, &pool.id, "inst-1", &o, InstanceStatus::Idle))
        .await
        .expect("seed");

    let err = pools::delete_pool(&ctx.state, &ctx.project, "busy-pool", false)
        .await
        .expect_err("live instances must block deletion");
    assert!(matches!(err, CoreError::Client(_)));

    pools::delete_pool(&ctx.state, &ctx.project, "busy-pool", true)
        .await
        .expect("force delete");
    assert!(
        ctx.persistence
            .get_pool_by_name(&ctx.project.id, "busy-pool")
            .await
            .expect("get")
            .is_none()
    );
}

#[tokio::test]
async fn test_filter_pool_instances_applies_requirements_and_status() {
    let ctx = TestContext::new().await;
    let pool = pools::get_or_create_pool_by_name(&ctx.state, &ctx.project, None)
        .await
        .expect("pool");

    let big = offer(BackendType::Aws, "m5.2xlarge", 1.0);
    let mut small = offer(BackendType::Aws, "t3.micro", 0.01);
    small.instance.resources.cpus = 1;
    small.instance.resources.memory_mib = 1024;

    let records = vec![
        instance_record(&ctx, &pool.id, "big-idle", &big, InstanceStatus::Idle),
        instance_record(&ctx, &pool.id, "small-idle", &small, InstanceStatus::Idle),
        instance_record(&ctx, &pool.id, "big-terminated", &big, InstanceStatus::Terminated),
        instance_record(&ctx, &pool.id, "big-busy", &big, InstanceStatus::Busy),
    ];

    let requirements = Requirements {
        resources: ResourcesSpec {
            cpus: 4,
            memory_mib: 16384,
            gpus: 0,
            disk_gb: 0,
        },
        max_price: None,
        spot: Default::default(),
    };
    let filtered = pools::filter_pool_instances(&records, &Profile::default(), &requirements);
    let names: Vec<&str> = filtered.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["big-idle", "big-busy"]);
}

#[tokio::test]
async fn test_pool_instance_offers_reflect_instance_status() {
    let ctx = TestContext::new().await;
    let pool = pools::get_or_create_pool_by_name(&ctx.state, &ctx.project, None)
        .await
        .expect("pool");
    let o = offer(BackendType::Aws, "m5.xlarge", 0.5);
    let records = vec![
        instance_record(&ctx, &pool.id, "idle-1", &o, InstanceStatus::Idle),
        instance_record(&ctx, &pool.id, "busy-1", &o, InstanceStatus::Busy),
    ];

    let offers = pools::pool_instance_offers(&records);
    assert_eq!(offers.len(), 2);
    assert_eq!(
        offers[0].availability,
        armada_core::models::InstanceAvailability::Idle
    );
    assert_eq!(
        offers[1].availability,
        armada_core::models::InstanceAvailability::Busy
    );
}

#[tokio::test]
async fn test_remove_instance_terminates_it() {
    let ctx = TestContext::new().await;
    let pool = pools::get_or_create_pool_by_name(&ctx.state, &ctx.project, Some("workers"))
        .await
        .expect("pool");
    let o = offer(BackendType::Aws, "m5.xlarge", 0.5);
    let idle = instance_record(&ctx, &pool.id, "worker-1", &o, InstanceStatus::Idle);
    let busy = instance_record(&ctx, &pool.id, "worker-2", &o, InstanceStatus::Busy);
    ctx.persistence.insert_instance(&idle).await.expect("seed");
    ctx.persistence.insert_instance(&busy).await.expect("seed");

    pools::remove_instance(&ctx.state, &ctx.project, "workers", "worker-1", false)
        .await
        .expect("remove idle");
    let removed = ctx
        .persistence
        .get_instance(&idle.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(removed.status, "terminated");

    let err = pools::remove_instance(&ctx.state, &ctx.project, "workers", "worker-2", false)
        .await
        .expect_err("busy instance needs force");
    assert!(matches!(err, CoreError::Client(_)));

    pools::remove_instance(&ctx.state, &ctx.project, "workers", "worker-2", true)
        .await
        .expect("force remove");
}

#[tokio::test]
async fn test_add_remote_instance_is_idle_and_reusable() {
    let ctx = TestContext::new().await;
    let record = pools::add_remote_instance(
        &ctx.state,
        &ctx.project,
        None,
        "office-box-1",
        "203.0.113.10",
        22,
        armada_core::models::Resources {
            cpus: 16,
            memory_mib: 65536,
            gpus: 1,
            disk_gb: 500,
            spot: false,
        },
    )
    .await
    .expect("add remote");

    assert_eq!(record.status, "idle");
    assert_eq!(record.backend, "remote");
    assert_eq!(record.price, 0.0);
    assert_eq!(
        record.termination_policy,
        TerminationPolicy::DontDestroy.as_str()
    );

    // The machine satisfies matching requirements for reuse
    let requirements = Requirements {
        resources: ResourcesSpec {
            cpus: 8,
            memory_mib: 32768,
            gpus: 1,
            disk_gb: 100,
        },
        max_price: None,
        spot: Default::default(),
    };
    let filtered = pools::filter_pool_instances(
        std::slice::from_ref(&record),
        &Profile::default(),
        &requirements,
    );
    assert_eq!(filtered.len(), 1);

    // The idle cleanup pass never destroys user-managed machines
    ctx.reconciler().tick().await;
    let still_there = ctx
        .persistence
        .get_instance(&record.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(still_there.status, "idle");
}

#[tokio::test]
async fn test_list_pools_counts_instances() {
    let ctx = TestContext::new().await;
    let pool = pools::get_or_create_pool_by_name(&ctx.state, &ctx.project, None)
        .await
        .expect("pool");
    let o = offer(BackendType::Aws, "m5.xlarge", 0.5);
    for (name, status) in [
        ("idle-1", InstanceStatus::Idle),
        ("busy-1", InstanceStatus::Busy),
        ("gone-1", InstanceStatus::Terminated),
    ] {
        ctx.persistence
            .insert_instance(&instance_record(&ctx, &pool.id, name, &o, status))
            .await
            .expect("seed");
    }

    let listed = pools::list_pools(&ctx.state, &ctx.project).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].total_instances, 2);
    assert_eq!(listed[0].available_instances, 1);
}
