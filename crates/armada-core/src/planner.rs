// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Offer planning.
//!
//! Enumerates candidate (backend, offer) pairs satisfying a requirement
//! set and profile constraints, merging live backend offers with
//! pool-derived ones. Offers keep backend-declared order; callers may
//! re-sort.

use std::sync::Arc;

use futures::future::join_all;
use tracing::warn;

use crate::backends::Compute;
use crate::error::Result;
use crate::models::{BackendType, InstanceOffer, Profile, Requirements};
use crate::persistence::ProjectRecord;
use crate::state::SchedulerState;

/// Enumerate offers for a project under profile and requirement
/// constraints.
///
/// Backends are queried concurrently; a failing backend is logged and
/// excluded rather than failing the plan. When the profile restricts
/// backends, the aggregator meta-backend is always retained because it
/// may fan out to others - its returned offers are then re-filtered by
/// the profile's backend and region lists.
pub async fn get_offers_by_requirements(
    state: &SchedulerState,
    project: &ProjectRecord,
    profile: &Profile,
    requirements: &Requirements,
    exclude_not_available: bool,
) -> Result<Vec<(Arc<dyn Compute>, InstanceOffer)>> {
    let mut adapters = state.backends.for_project(project)?;

    if let Some(backends) = &profile.backends {
        adapters.retain(|a| {
            backends.contains(&a.backend_type()) || a.backend_type() == BackendType::Aggregator
        });
    }

    let queries = adapters.iter().map(|adapter| {
        let adapter = adapter.clone();
        async move {
            let result = state.backends.offers_with_timeout(&adapter, requirements).await;
            (adapter, result)
        }
    });

    let mut offers: Vec<(Arc<dyn Compute>, InstanceOffer)> = Vec::new();
    for (adapter, result) in join_all(queries).await {
        match result {
            Ok(backend_offers) => {
                offers.extend(backend_offers.into_iter().map(|o| (adapter.clone(), o)));
            }
            Err(e) => {
                warn!(backend = %adapter.backend_type(), error = %e, "Failed to get offers");
            }
        }
    }

    // Filter by backend again: a meta-backend can return offers of other
    // backend types. The adapter-level filter above remains as an
    // optimization.
    if let Some(backends) = &profile.backends {
        offers.retain(|(_, o)| backends.contains(&o.backend));
    }
    if let Some(regions) = &profile.regions {
        offers.retain(|(_, o)| regions.contains(&o.region));
    }
    if exclude_not_available {
        offers.retain(|(_, o)| o.availability.is_available());
    }

    Ok(offers)
}

/// Offers usable for explicit instance creation: backends without
/// create-instance support are dropped.
pub async fn get_create_instance_offers(
    state: &SchedulerState,
    project: &ProjectRecord,
    profile: &Profile,
    requirements: &Requirements,
    exclude_not_available: bool,
) -> Result<Vec<(Arc<dyn Compute>, InstanceOffer)>> {
    let mut offers =
        get_offers_by_requirements(state, project, profile, requirements, exclude_not_available)
            .await?;
    offers.retain(|(adapter, _)| adapter.backend_type().supports_create_instance());
    Ok(offers)
}

/// How many offers a plan preview carries.
pub const PLAN_OFFERS_PREVIEW_LIMIT: usize = 50;

/// Maximum price across a combined offer list.
pub fn max_offer_price(offers: &[InstanceOffer]) -> Option<f64> {
    offers
        .iter()
        .map(|o| o.price)
        .fold(None, |acc, price| match acc {
            Some(max) if max >= price => Some(max),
            _ => Some(price),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstanceAvailability, InstanceRuntime, InstanceType, Resources};

    fn offer(price: f64) -> InstanceOffer {
        InstanceOffer {
            backend: BackendType::Aws,
            instance: InstanceType {
                name: "test".to_string(),
                resources: Resources {
                    cpus: 4,
                    memory_mib: 16384,
                    gpus: 0,
                    disk_gb: 100,
                    spot: false,
                },
            },
            region: "eu-west-1".to_string(),
            price,
            availability: InstanceAvailability::Available,
            instance_runtime: InstanceRuntime::Shim,
        }
    }

    #[test]
    fn test_max_offer_price() {
        assert_eq!(max_offer_price(&[]), None);
        let offers = vec![offer(0.5), offer(2.0), offer(1.25)];
        assert_eq!(max_offer_price(&offers), Some(2.0));
    }
}
