// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud backend adapters.
//!
//! Each configured backend exposes the compute capability: enumerate
//! offers matching a requirement set and create an instance from a chosen
//! offer. Adapters may reject with a recoverable [`BackendError`] (the
//! caller skips the offer and tries the next) or with
//! [`BackendError::NotSupported`] when the operation is a capability gap
//! for that backend.
//!
//! Adapters are PURE capacity providers - they do NOT touch the database.
//! Persisting launched instances is the caller's job.

pub mod mock;

pub use mock::MockCompute;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    BackendType, InstanceConfiguration, InstanceOffer, LaunchedInstanceInfo, ProvisioningData,
    Requirements,
};
use crate::persistence::ProjectRecord;

/// Errors from backend compute operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The provider rejected or failed the request. Recoverable: skip
    /// the offer and try the next one.
    #[error("Backend request failed: {0}")]
    Request(String),

    /// The provider has no capacity for the requested offer.
    #[error("No capacity: {0}")]
    NoCapacity(String),

    /// The backend does not implement the requested operation.
    #[error("Operation not supported by this backend")]
    NotSupported,

    /// The call exceeded its per-call timeout.
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// The compute capability of a backend.
#[async_trait]
pub trait Compute: Send + Sync {
    /// The backend type this adapter serves.
    fn backend_type(&self) -> BackendType;

    /// Enumerate offers matching the requirements.
    ///
    /// The aggregator meta-backend may return offers of other backend
    /// types; callers re-filter.
    async fn get_offers(&self, requirements: &Requirements) -> Result<Vec<InstanceOffer>>;

    /// Create an instance from an offer.
    async fn create_instance(
        &self,
        offer: &InstanceOffer,
        config: &InstanceConfiguration,
    ) -> Result<LaunchedInstanceInfo>;

    /// Terminate a previously created instance.
    async fn terminate_instance(&self, provisioning: &ProvisioningData) -> Result<()>;
}

/// The set of backend adapters available to the server.
///
/// Per-project views filter this set down to the project's configured
/// backend types, preserving registration order (which is the order
/// offers are returned in).
pub struct BackendRegistry {
    adapters: Vec<Arc<dyn Compute>>,
    by_type: HashMap<BackendType, Arc<dyn Compute>>,
    call_timeout: Duration,
}

impl BackendRegistry {
    /// Create an empty registry with the given per-call timeout.
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            adapters: Vec::new(),
            by_type: HashMap::new(),
            call_timeout,
        }
    }

    /// Register an adapter. Replaces any previous adapter of the same
    /// backend type in the type lookup but keeps enumeration order.
    pub fn register(&mut self, adapter: Arc<dyn Compute>) {
        self.by_type.insert(adapter.backend_type(), adapter.clone());
        self.adapters.push(adapter);
    }

    /// Look up the adapter for a backend type.
    pub fn adapter(&self, backend_type: BackendType) -> Option<Arc<dyn Compute>> {
        self.by_type.get(&backend_type).cloned()
    }

    /// The adapters active for a project, in registration order.
    pub fn for_project(
        &self,
        project: &ProjectRecord,
    ) -> crate::error::Result<Vec<Arc<dyn Compute>>> {
        let configured = project.backend_types()?;
        Ok(self
            .adapters
            .iter()
            .filter(|a| configured.contains(&a.backend_type()))
            .cloned()
            .collect())
    }

    /// `get_offers` with the registry's per-call timeout applied.
    pub async fn offers_with_timeout(
        &self,
        adapter: &Arc<dyn Compute>,
        requirements: &Requirements,
    ) -> Result<Vec<InstanceOffer>> {
        match tokio::time::timeout(self.call_timeout, adapter.get_offers(requirements)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.call_timeout)),
        }
    }

    /// `create_instance` with the registry's per-call timeout applied.
    pub async fn create_with_timeout(
        &self,
        adapter: &Arc<dyn Compute>,
        offer: &InstanceOffer,
        config: &InstanceConfiguration,
    ) -> Result<LaunchedInstanceInfo> {
        match tokio::time::timeout(self.call_timeout, adapter.create_instance(offer, config)).await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.call_timeout)),
        }
    }

    /// `terminate_instance` with the registry's per-call timeout applied.
    pub async fn terminate_with_timeout(
        &self,
        adapter: &Arc<dyn Compute>,
        provisioning: &ProvisioningData,
    ) -> Result<()> {
        match tokio::time::timeout(self.call_timeout, adapter.terminate_instance(provisioning))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.call_timeout)),
        }
    }
}
