// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Profiles and requirements: the user-facing constraints on where and
//! how a run may be placed.

use serde::{Deserialize, Serialize};

use super::backends::BackendType;

/// Name of the implicitly created default pool.
pub const DEFAULT_POOL_NAME: &str = "default-pool";

/// Default idle time (seconds) before a destroy-after-idle instance is
/// terminated: 72 hours.
pub const DEFAULT_POOL_TERMINATION_IDLE_TIME: i64 = 72 * 3600;

/// Spot instance policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotPolicy {
    /// Spot instances only.
    Spot,
    /// On-demand instances only.
    OnDemand,
    /// Either kind.
    #[default]
    Auto,
}

impl SpotPolicy {
    /// Whether an offer with the given spot flag satisfies this policy.
    pub fn accepts(&self, spot: bool) -> bool {
        match self {
            Self::Spot => spot,
            Self::OnDemand => !spot,
            Self::Auto => true,
        }
    }
}

/// Whether a run may create fresh instances or only reuse pool capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationPolicy {
    /// Only reuse existing pool instances.
    Reuse,
    /// Reuse when possible, create otherwise.
    #[default]
    ReuseOrCreate,
}

/// What happens to an instance once it goes idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicy {
    /// Keep the instance around indefinitely.
    DontDestroy,
    /// Destroy after the configured idle time.
    #[default]
    DestroyAfterIdle,
}

impl TerminationPolicy {
    /// The string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DontDestroy => "dont_destroy",
            Self::DestroyAfterIdle => "destroy_after_idle",
        }
    }

    /// Parse a termination policy from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dont_destroy" => Some(Self::DontDestroy),
            "destroy_after_idle" => Some(Self::DestroyAfterIdle),
            _ => None,
        }
    }
}

/// Minimum resource constraints for an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcesSpec {
    /// Minimum vCPU count.
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    /// Minimum memory in MiB.
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u64,
    /// Minimum GPU count.
    #[serde(default)]
    pub gpus: u32,
    /// Minimum disk in GB (0 = no constraint).
    #[serde(default)]
    pub disk_gb: u64,
}

fn default_cpus() -> u32 {
    2
}

fn default_memory_mib() -> u64 {
    8192
}

impl Default for ResourcesSpec {
    fn default() -> Self {
        Self {
            cpus: default_cpus(),
            memory_mib: default_memory_mib(),
            gpus: 0,
            disk_gb: 0,
        }
    }
}

/// Full requirement set the planner matches offers against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    /// Minimum resources.
    pub resources: ResourcesSpec,
    /// Maximum price in USD per hour.
    pub max_price: Option<f64>,
    /// Spot policy.
    #[serde(default)]
    pub spot: SpotPolicy,
}

/// Placement preferences attached to a run spec.
///
/// All fields are optional; unset fields fall back to project or server
/// defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    /// Restrict offers to these backends. The aggregator meta-backend is
    /// always queried regardless.
    #[serde(default)]
    pub backends: Option<Vec<BackendType>>,
    /// Restrict offers to these regions.
    #[serde(default)]
    pub regions: Option<Vec<String>>,
    /// Spot policy (default: auto).
    #[serde(default)]
    pub spot_policy: Option<SpotPolicy>,
    /// Whether instances may be created or only reused.
    #[serde(default)]
    pub creation_policy: Option<CreationPolicy>,
    /// Maximum price in USD per hour.
    #[serde(default)]
    pub max_price: Option<f64>,
    /// Pool to draw instances from (default pool when unset).
    #[serde(default)]
    pub pool_name: Option<String>,
    /// Idle termination policy for created instances.
    #[serde(default)]
    pub termination_policy: Option<TerminationPolicy>,
    /// Idle seconds before termination for created instances.
    #[serde(default)]
    pub termination_idle_time: Option<i64>,
}
