// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Explicit instance creation and instance lifecycle helpers.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backends::BackendError;
use crate::error::{CoreError, Result};
use crate::models::{
    BackendType, DockerConfig, InstanceConfiguration, InstanceRuntime, InstanceStatus, Profile,
    ProvisioningData, Requirements, SshKey, TerminationPolicy,
};
use crate::persistence::{InstanceRecord, PoolRecord, ProjectRecord, RunRecord, UserRecord};
use crate::planner;
use crate::pools;
use crate::state::SchedulerState;

/// Instance configuration for capacity provisioned on behalf of a run's
/// job: authorized with the project keypair, default workload image.
pub fn instance_configuration(
    project: &ProjectRecord,
    run: &RunRecord,
    instance_name: &str,
) -> Result<InstanceConfiguration> {
    Ok(InstanceConfiguration {
        project_name: project.name.clone(),
        instance_name: instance_name.to_string(),
        user: run.user_id.clone(),
        ssh_keys: vec![SshKey {
            public: project.ssh_public_key.trim().to_string(),
            private: Some(project.ssh_private_key.trim().to_string()),
        }],
        job_docker_config: DockerConfig {
            image: crate::jobs::default_image(),
            registry_auth: None,
        },
    })
}

/// Create a standalone pool instance.
///
/// Plans available offers, restricts them to backends with
/// create-instance support, then walks the candidates in order until one
/// launch succeeds. Backend errors skip to the next offer; runner-only
/// offers cannot host a general VM and are skipped outright. Success
/// means a committed PROVISIONING instance row; exhausting every offer
/// is a client-facing failure.
pub async fn create_instance(
    state: &SchedulerState,
    project: &ProjectRecord,
    user: &UserRecord,
    ssh_key: &SshKey,
    pool_name: Option<&str>,
    instance_name: &str,
    profile: &Profile,
    requirements: &Requirements,
) -> Result<InstanceRecord> {
    let all_offers =
        planner::get_offers_by_requirements(state, project, profile, requirements, true).await?;
    let offers: Vec<_> = all_offers
        .iter()
        .filter(|(adapter, _)| adapter.backend_type().supports_create_instance())
        .collect();

    if offers.is_empty() && !all_offers.is_empty() {
        let backends: BTreeSet<&str> = all_offers
            .iter()
            .map(|(adapter, _)| adapter.backend_type().as_str())
            .collect();
        let backends = backends.into_iter().collect::<Vec<_>>().join(", ");
        return Err(CoreError::client(format!(
            "Backends {backends} do not support create_instance. Try to select other backends."
        )));
    }

    let pool = pools::get_or_create_pool_by_name(state, project, pool_name).await?;

    let user_key = ssh_key.clone();
    let project_key = SshKey {
        public: project.ssh_public_key.trim().to_string(),
        private: Some(project.ssh_private_key.trim().to_string()),
    };
    let config = InstanceConfiguration {
        project_name: project.name.clone(),
        instance_name: instance_name.to_string(),
        user: user.name.clone(),
        ssh_keys: vec![user_key, project_key],
        job_docker_config: DockerConfig {
            image: crate::jobs::default_image(),
            registry_auth: None,
        },
    };

    for (adapter, offer) in offers.iter().copied() {
        // Runner-only capacity cannot host a general VM
        if offer.instance_runtime == InstanceRuntime::Runner {
            continue;
        }
        debug!(
            instance_type = %offer.instance.name,
            backend = %offer.backend,
            region = %offer.region,
            price = %format_args!("${:.4}", offer.price),
            "Trying offer"
        );
        let launched = match state.backends.create_with_timeout(adapter, offer, &config).await {
            Ok(launched) => launched,
            Err(BackendError::NotSupported) => continue,
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
        let record = persist_launched_instance(
            state,
            project,
            &pool,
            instance_name,
            offer,
            ProvisioningData::from_launch(offer, launched),
            profile,
        )
        .await?;
        info!(instance = %instance_name, backend = %offer.backend, "Instance created");
        return Ok(record);
    }

    Err(CoreError::client("Failed to create the instance."))
}

async fn persist_launched_instance(
    state: &SchedulerState,
    project: &ProjectRecord,
    pool: &PoolRecord,
    instance_name: &str,
    offer: &crate::models::InstanceOffer,
    provisioning: ProvisioningData,
    profile: &Profile,
) -> Result<InstanceRecord> {
    let now = Utc::now();
    let record = InstanceRecord {
        id: Uuid::new_v4().to_string(),
        name: instance_name.to_string(),
        project_id: project.id.clone(),
        pool_id: pool.id.clone(),
        backend: offer.backend.as_str().to_string(),
        region: offer.region.clone(),
        price: offer.price,
        offer: serde_json::to_string(offer)?,
        provisioning_data: Some(serde_json::to_string(&provisioning)?),
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
        job_id: None,
    };
    state.persistence.insert_instance(&record).await?;
    Ok(record)
}

/// Terminate an instance through its backend and mark it TERMINATED.
///
/// Best-effort on the backend side: an unreachable provider is logged,
/// the row still transitions.
pub async fn terminate_instance(state: &SchedulerState, instance: &mut InstanceRecord) {
    if let Ok(Some(provisioning)) = instance.provisioning()
        && let Some(backend_type) = BackendType::parse(&instance.backend)
        && let Some(adapter) = state.backends.adapter(backend_type)
        && let Err(e) = state
            .backends
            .terminate_with_timeout(&adapter, &provisioning)
            .await
    {
        warn!(instance = %instance.name, error = %e, "Backend terminate failed");
    }
    instance.status = InstanceStatus::Terminated.as_str().to_string();
    instance.terminated_at = Some(Utc::now());
    instance.job_id = None;
    if let Err(e) = state.persistence.update_instance(instance).await {
        warn!(instance = %instance.name, error = %e, "Failed to persist instance termination");
    } else {
        info!(instance = %instance.name, "Instance terminated");
    }
}

/// Terminate idle destroy-after-idle instances whose idle time expired.
pub async fn terminate_idle_instances(state: &SchedulerState) -> Result<()> {
    let now = Utc::now();
    let instances = state
        .persistence
        .list_instances_by_status(InstanceStatus::Idle.as_str())
        .await?;
    for mut instance in instances {
        if instance.policy()? != TerminationPolicy::DestroyAfterIdle {
            continue;
        }
        let Some(idle_since) = instance.idle_since else {
            continue;
        };
        let deadline = idle_since + chrono::Duration::seconds(instance.termination_idle_time);
        if now >= deadline {
            info!(
                instance = %instance.name,
                idle_seconds = instance.termination_idle_time,
                "Terminating idle instance"
            );
            terminate_instance(state, &mut instance).await;
        }
    }
    Ok(())
}
