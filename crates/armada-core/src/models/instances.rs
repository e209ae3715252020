// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instances, offers and provisioning data.

use serde::{Deserialize, Serialize};

use super::backends::BackendType;
use super::profiles::Requirements;

/// Instance lifecycle status.
///
/// Transitions are monotonic toward `Terminated`: an instance is `Busy`
/// iff a non-finished job references it and `Idle` iff no job references
/// it and it is healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Created but not yet launching.
    Pending,
    /// Backend is launching the instance.
    Provisioning,
    /// Healthy and unassigned.
    Idle,
    /// Assigned to a job.
    Busy,
    /// Being shut down.
    Terminating,
    /// Shut down.
    Terminated,
    /// Launch or runtime failure.
    Failed,
}

impl InstanceStatus {
    /// The string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Provisioning => "provisioning",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }

    /// Parse a status from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "provisioning" => Some(Self::Provisioning),
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "terminating" => Some(Self::Terminating),
            "terminated" => Some(Self::Terminated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the instance has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

/// Offer availability as reported by a backend or derived from a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceAvailability {
    /// The backend did not report availability.
    #[default]
    Unknown,
    /// Capacity is available for purchase.
    Available,
    /// Capacity is not available.
    NotAvailable,
    /// The account's quota is exhausted.
    NoQuota,
    /// The provider has no capacity.
    NoCapacity,
    /// A pool instance that is idle.
    Idle,
    /// A pool instance that is busy.
    Busy,
}

impl InstanceAvailability {
    /// Whether the offer can actually be acted on.
    ///
    /// `Unknown` counts as available: backends that don't report
    /// availability still accept creation attempts.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Unknown | Self::Available | Self::Idle)
    }
}

/// How workloads run on an offer's instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRuntime {
    /// A full VM managed through the shim (can host anything).
    #[default]
    Shim,
    /// Runner-only capacity (e.g. marketplace containers); cannot host
    /// arbitrary VMs and is excluded from create-instance paths.
    Runner,
}

/// Hardware shape of an instance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// vCPU count.
    pub cpus: u32,
    /// Memory in MiB.
    pub memory_mib: u64,
    /// GPU count.
    #[serde(default)]
    pub gpus: u32,
    /// Disk in GB.
    #[serde(default)]
    pub disk_gb: u64,
    /// Whether this is spot capacity.
    #[serde(default)]
    pub spot: bool,
}

/// A named instance type with its resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceType {
    /// Provider-specific type name (e.g. `g5.xlarge`).
    pub name: String,
    /// Hardware resources.
    pub resources: Resources,
}

/// A concrete purchasable-or-reusable capacity description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceOffer {
    /// Backend the offer belongs to.
    pub backend: BackendType,
    /// Instance type.
    pub instance: InstanceType,
    /// Provider region.
    pub region: String,
    /// Price in USD per hour.
    pub price: f64,
    /// Availability of the offer.
    #[serde(default)]
    pub availability: InstanceAvailability,
    /// Runtime kind of the offer's capacity.
    #[serde(default)]
    pub instance_runtime: InstanceRuntime,
}

impl InstanceOffer {
    /// Whether this offer satisfies the given requirements.
    pub fn matches(&self, requirements: &Requirements) -> bool {
        let res = &self.instance.resources;
        let spec = &requirements.resources;
        if res.cpus < spec.cpus
            || res.memory_mib < spec.memory_mib
            || res.gpus < spec.gpus
            || res.disk_gb < spec.disk_gb
        {
            return false;
        }
        if !requirements.spot.accepts(res.spot) {
            return false;
        }
        if let Some(max_price) = requirements.max_price
            && self.price > max_price
        {
            return false;
        }
        true
    }
}

/// An SSH keypair (private half optional for authorized-keys-only use).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKey {
    /// Public key material.
    pub public: String,
    /// Private key material.
    #[serde(default)]
    pub private: Option<String>,
}

/// Docker configuration for the workload container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Image reference.
    pub image: String,
    /// Registry auth blob, when the image is private.
    #[serde(default)]
    pub registry_auth: Option<String>,
}

/// Everything a backend needs to create an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfiguration {
    /// Owning project name.
    pub project_name: String,
    /// Name for the created instance.
    pub instance_name: String,
    /// Submitting user name.
    pub user: String,
    /// Keys authorized on the instance (user key + project key).
    pub ssh_keys: Vec<SshKey>,
    /// Container configuration for the workload.
    pub job_docker_config: DockerConfig,
}

/// What a backend reports after successfully launching an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchedInstanceInfo {
    /// Provider-side instance identifier.
    pub instance_id: String,
    /// Public IP address.
    pub ip_address: String,
    /// Region the instance landed in.
    pub region: String,
    /// SSH username.
    pub username: String,
    /// SSH port.
    pub ssh_port: u16,
    /// Whether workloads run dockerized on this instance.
    pub dockerized: bool,
    /// Opaque backend-specific data needed for later operations.
    #[serde(default)]
    pub backend_data: Option<String>,
}

/// Provisioning data bound to a job or instance row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningData {
    /// Backend that provisioned the capacity.
    pub backend: BackendType,
    /// Instance type that was provisioned.
    pub instance_type: InstanceType,
    /// Provider-side instance identifier.
    pub instance_id: String,
    /// Hostname or IP the runner is reachable at.
    pub hostname: String,
    /// Provider region.
    pub region: String,
    /// Price in USD per hour.
    pub price: f64,
    /// SSH username.
    pub username: String,
    /// SSH port.
    pub ssh_port: u16,
    /// Whether workloads run dockerized.
    pub dockerized: bool,
    /// Opaque backend-specific data.
    #[serde(default)]
    pub backend_data: Option<String>,
}

impl ProvisioningData {
    /// Build provisioning data from an accepted offer and the launch info
    /// the backend returned for it.
    pub fn from_launch(offer: &InstanceOffer, launched: LaunchedInstanceInfo) -> Self {
        Self {
            backend: offer.backend,
            instance_type: offer.instance.clone(),
            instance_id: launched.instance_id,
            hostname: launched.ip_address,
            region: launched.region,
            price: offer.price,
            username: launched.username,
            ssh_port: launched.ssh_port,
            dockerized: launched.dockerized,
            backend_data: launched.backend_data,
        }
    }
}
