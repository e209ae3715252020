// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance pool management.
//!
//! Pools are project-scoped collections of provisioned instances kept
//! for reuse. The default pool is created implicitly on first reference;
//! exactly one default exists per project.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::models::{
    BackendType, DEFAULT_POOL_NAME, InstanceAvailability, InstanceOffer, InstanceRuntime,
    InstanceStatus, InstanceType, Profile, ProvisioningData, Requirements, Resources,
    TerminationPolicy,
};
use crate::persistence::{InstanceRecord, PoolRecord, ProjectRecord};
use crate::state::SchedulerState;

/// A pool as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    /// Pool name.
    pub name: String,
    /// Whether this is the project default.
    pub default: bool,
    /// Creation time.
    pub created_at: chrono::DateTime<Utc>,
    /// Instances in the pool (excluding terminated).
    pub total_instances: usize,
    /// Idle instances available for reuse.
    pub available_instances: usize,
}

/// A pool instance as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolInstance {
    /// Instance name.
    pub name: String,
    /// Backend the instance runs on.
    pub backend: String,
    /// Instance type.
    pub instance_type: InstanceType,
    /// Provider region.
    pub region: String,
    /// Hostname, once provisioned.
    pub hostname: Option<String>,
    /// Current status.
    pub status: InstanceStatus,
    /// Price in USD per hour.
    pub price: f64,
    /// Name of the job currently bound to the instance.
    pub job_name: Option<String>,
}

/// Resolve a pool by name, creating it when missing.
///
/// `None` resolves the project's default pool (created as
/// `default-pool` on first reference). Idempotent under concurrency:
/// losing an insert race falls back to the winner's row.
pub async fn get_or_create_pool_by_name(
    state: &SchedulerState,
    project: &ProjectRecord,
    pool_name: Option<&str>,
) -> Result<PoolRecord> {
    match pool_name {
        Some(name) => {
            if let Some(pool) = state.persistence.get_pool_by_name(&project.id, name).await? {
                return Ok(pool);
            }
            create_pool_record(state, project, name).await
        }
        None => {
            if let Some(pool) = state.persistence.get_default_pool(&project.id).await? {
                return Ok(pool);
            }
            create_pool_record(state, project, DEFAULT_POOL_NAME).await
        }
    }
}

async fn create_pool_record(
    state: &SchedulerState,
    project: &ProjectRecord,
    name: &str,
) -> Result<PoolRecord> {
    let has_default = state
        .persistence
        .get_default_pool(&project.id)
        .await?
        .is_some();
    let pool = PoolRecord {
        id: Uuid::new_v4().to_string(),
        project_id: project.id.clone(),
        name: name.to_string(),
        is_default: !has_default,
        deleted: false,
        created_at: Utc::now(),
    };
    match state.persistence.insert_pool(&pool).await {
        Ok(()) => {
            if pool.is_default {
                state
                    .persistence
                    .set_default_pool(&project.id, &pool.id)
                    .await?;
            }
            debug!(project = %project.name, pool = %pool.name, "Created pool");
            Ok(pool)
        }
        // Lost a creation race: the unique index rejected the insert,
        // the winner's row is the pool
        Err(CoreError::Database(_)) => state
            .persistence
            .get_pool_by_name(&project.id, name)
            .await?
            .ok_or_else(|| CoreError::not_found("Pool", name)),
        Err(e) => Err(e),
    }
}

/// Create a named pool, failing when it already exists.
pub async fn create_pool(
    state: &SchedulerState,
    project: &ProjectRecord,
    name: &str,
) -> Result<()> {
    if state
        .persistence
        .get_pool_by_name(&project.id, name)
        .await?
        .is_some()
    {
        return Err(CoreError::client(format!("Pool {name} already exists")));
    }
    create_pool_record(state, project, name).await?;
    Ok(())
}

/// List the project's pools with instance counts.
pub async fn list_pools(state: &SchedulerState, project: &ProjectRecord) -> Result<Vec<Pool>> {
    let records = state.persistence.list_pools(&project.id).await?;
    let mut pools = Vec::with_capacity(records.len());
    for record in records {
        let instances = state.persistence.list_pool_instances(&record.id).await?;
        let live: Vec<_> = instances
            .iter()
            .filter(|i| {
                i.instance_status()
                    .map(|s| !s.is_finished())
                    .unwrap_or(false)
            })
            .collect();
        let available = live
            .iter()
            .filter(|i| i.instance_status().ok() == Some(InstanceStatus::Idle))
            .count();
        pools.push(Pool {
            name: record.name,
            default: record.is_default,
            created_at: record.created_at,
            total_instances: live.len(),
            available_instances: available,
        });
    }
    Ok(pools)
}

/// The instances of one pool, for `pool show`.
pub async fn show_pool(
    state: &SchedulerState,
    project: &ProjectRecord,
    name: &str,
) -> Result<Vec<PoolInstance>> {
    let pool = state
        .persistence
        .get_pool_by_name(&project.id, name)
        .await?
        .ok_or_else(|| CoreError::client(format!("Pool {name} does not exist")))?;
    let instances = state.persistence.list_pool_instances(&pool.id).await?;
    let mut result = Vec::with_capacity(instances.len());
    for record in instances {
        let status = record.instance_status()?;
        let offer = record.instance_offer()?;
        let hostname = record.provisioning()?.map(|p| p.hostname);
        let job_name = match &record.job_id {
            Some(job_id) => state
                .persistence
                .get_job(job_id)
                .await?
                .map(|job| job.job_name),
            None => None,
        };
        result.push(PoolInstance {
            name: record.name,
            backend: record.backend,
            instance_type: offer.instance,
            region: record.region,
            hostname,
            status,
            price: record.price,
            job_name,
        });
    }
    Ok(result)
}

/// Mark a pool deleted.
///
/// Rejects pools that still hold non-terminated instances unless
/// `force` is set. The default pool cannot be deleted while other pools
/// exist without choosing a new default first.
pub async fn delete_pool(
    state: &SchedulerState,
    project: &ProjectRecord,
    name: &str,
    force: bool,
) -> Result<()> {
    let pool = state
        .persistence
        .get_pool_by_name(&project.id, name)
        .await?
        .ok_or_else(|| CoreError::client(format!("Pool {name} does not exist")))?;
    if !force {
        let instances = state.persistence.list_pool_instances(&pool.id).await?;
        let active = instances
            .iter()
            .filter(|i| {
                i.instance_status()
                    .map(|s| !s.is_finished())
                    .unwrap_or(true)
            })
            .count();
        if active > 0 {
            return Err(CoreError::client(format!(
                "Pool {name} has {active} active instances. Use force to delete it anyway."
            )));
        }
    }
    state.persistence.mark_pool_deleted(&pool.id).await?;
    Ok(())
}

/// Remove an instance from a pool, terminating it through its backend.
///
/// Busy instances are rejected unless `force` is set.
pub async fn remove_instance(
    state: &SchedulerState,
    project: &ProjectRecord,
    pool_name: &str,
    instance_name: &str,
    force: bool,
) -> Result<()> {
    let pool = state
        .persistence
        .get_pool_by_name(&project.id, pool_name)
        .await?
        .ok_or_else(|| CoreError::client(format!("Pool {pool_name} does not exist")))?;
    let mut instance = state
        .persistence
        .list_pool_instances(&pool.id)
        .await?
        .into_iter()
        .find(|i| i.name == instance_name)
        .ok_or_else(|| {
            CoreError::client(format!(
                "Instance {instance_name} not found in pool {pool_name}"
            ))
        })?;
    if !force && instance.instance_status()? == InstanceStatus::Busy {
        return Err(CoreError::client(format!(
            "Instance {instance_name} is busy. Use force to remove it anyway."
        )));
    }
    crate::instances::terminate_instance(state, &mut instance).await;
    Ok(())
}

/// Make the named pool the project default.
pub async fn set_default_pool(
    state: &SchedulerState,
    project: &ProjectRecord,
    name: &str,
) -> Result<()> {
    let pool = state
        .persistence
        .get_pool_by_name(&project.id, name)
        .await?
        .ok_or_else(|| CoreError::client(format!("Pool {name} does not exist")))?;
    state
        .persistence
        .set_default_pool(&project.id, &pool.id)
        .await?;
    Ok(())
}

/// Register a user-managed remote machine as a pool instance.
///
/// The machine shows up as an idle instance of the `remote` backend at
/// zero cost; it is never destroyed by the idle cleanup pass.
pub async fn add_remote_instance(
    state: &SchedulerState,
    project: &ProjectRecord,
    pool_name: Option<&str>,
    instance_name: &str,
    host: &str,
    ssh_port: u16,
    resources: Resources,
) -> Result<InstanceRecord> {
    let pool = get_or_create_pool_by_name(state, project, pool_name).await?;

    let instance_type = InstanceType {
        name: "remote".to_string(),
        resources,
    };
    let offer = InstanceOffer {
        backend: BackendType::Remote,
        instance: instance_type.clone(),
        region: "remote".to_string(),
        price: 0.0,
        availability: InstanceAvailability::Idle,
        instance_runtime: InstanceRuntime::Shim,
    };
    let provisioning = ProvisioningData {
        backend: BackendType::Remote,
        instance_type,
        instance_id: instance_name.to_string(),
        hostname: host.to_string(),
        region: "remote".to_string(),
        price: 0.0,
        username: "root".to_string(),
        ssh_port,
        dockerized: true,
        backend_data: None,
    };

    let now = Utc::now();
    let record = InstanceRecord {
        id: Uuid::new_v4().to_string(),
        name: instance_name.to_string(),
        project_id: project.id.clone(),
        pool_id: pool.id.clone(),
        backend: BackendType::Remote.as_str().to_string(),
        region: "remote".to_string(),
        price: 0.0,
        offer: serde_json::to_string(&offer)?,
        provisioning_data: Some(serde_json::to_string(&provisioning)?),
        status: InstanceStatus::Idle.as_str().to_string(),
        created_at: now,
        started_at: Some(now),
        terminated_at: None,
        idle_since: Some(now),
        termination_policy: TerminationPolicy::DontDestroy.as_str().to_string(),
        termination_idle_time: state.config.default_termination_idle_time,
        job_id: None,
    };
    state.persistence.insert_instance(&record).await?;
    debug!(instance = %instance_name, pool = %pool.name, "Remote instance added");
    Ok(record)
}

/// Filter pool instances down to those reusable for the given profile
/// and requirements.
///
/// Terminating/terminated instances never match; the instance's offer
/// snapshot must satisfy the requirements and the profile's backend and
/// region restrictions.
pub fn filter_pool_instances(
    instances: &[InstanceRecord],
    profile: &Profile,
    requirements: &Requirements,
) -> Vec<InstanceRecord> {
    let mut filtered = Vec::new();
    for instance in instances {
        let Ok(status) = instance.instance_status() else {
            debug!(instance = %instance.name, "Skipping instance with unknown status");
            continue;
        };
        if matches!(
            status,
            InstanceStatus::Terminating | InstanceStatus::Terminated | InstanceStatus::Failed
        ) {
            continue;
        }
        let Ok(offer) = instance.instance_offer() else {
            debug!(instance = %instance.name, "Skipping instance with unreadable offer");
            continue;
        };
        if let Some(backends) = &profile.backends
            && !backends.contains(&offer.backend)
        {
            continue;
        }
        if let Some(regions) = &profile.regions
            && !regions.contains(&offer.region)
        {
            continue;
        }
        if !offer.matches(requirements) {
            continue;
        }
        filtered.push(instance.clone());
    }
    filtered
}

/// Offers derived from pool instances: availability is IDLE for idle
/// instances, BUSY otherwise.
pub fn pool_instance_offers(instances: &[InstanceRecord]) -> Vec<InstanceOffer> {
    let mut offers = Vec::new();
    for instance in instances {
        let Ok(mut offer) = instance.instance_offer() else {
            continue;
        };
        offer.availability = match instance.instance_status() {
            Ok(InstanceStatus::Idle) => InstanceAvailability::Idle,
            _ => InstanceAvailability::Busy,
        };
        offers.push(offer);
    }
    offers
}
