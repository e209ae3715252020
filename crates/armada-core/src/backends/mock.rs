// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock compute backend for testing.
//!
//! Serves a scripted offer list and lets tests script per-call
//! create-instance outcomes (success, backend error, capability gap)
//! without talking to any provider.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{BackendError, Compute, Result};
use crate::models::{
    BackendType, InstanceConfiguration, InstanceOffer, LaunchedInstanceInfo, ProvisioningData,
    Requirements,
};

/// Scripted outcome for one `create_instance` call.
pub enum CreateOutcome {
    /// Launch succeeds.
    Success,
    /// Launch fails with a recoverable backend error.
    Error(String),
    /// The backend reports the capability gap.
    NotSupported,
}

/// Mock compute backend.
pub struct MockCompute {
    backend_type: BackendType,
    offers: Mutex<Vec<InstanceOffer>>,
    /// Outcomes consumed one per create call; when empty, calls succeed.
    create_outcomes: Mutex<VecDeque<CreateOutcome>>,
    create_calls: Mutex<Vec<InstanceOffer>>,
    terminate_calls: Mutex<Vec<String>>,
    /// Fail `get_offers` entirely (planner must tolerate it).
    offers_fail: Mutex<bool>,
    launch_counter: AtomicU64,
}

impl MockCompute {
    /// Create a mock backend of the given type with no offers.
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            offers: Mutex::new(Vec::new()),
            create_outcomes: Mutex::new(VecDeque::new()),
            create_calls: Mutex::new(Vec::new()),
            terminate_calls: Mutex::new(Vec::new()),
            offers_fail: Mutex::new(false),
            launch_counter: AtomicU64::new(0),
        }
    }

    /// Create a mock backend pre-loaded with offers.
    pub fn with_offers(backend_type: BackendType, offers: Vec<InstanceOffer>) -> Self {
        let mock = Self::new(backend_type);
        *mock.offers.lock().unwrap() = offers;
        mock
    }

    /// Replace the offer list.
    pub fn set_offers(&self, offers: Vec<InstanceOffer>) {
        *self.offers.lock().unwrap() = offers;
    }

    /// Make `get_offers` fail until reset.
    pub fn set_offers_fail(&self, fail: bool) {
        *self.offers_fail.lock().unwrap() = fail;
    }

    /// Script the outcome of the next `create_instance` call. Outcomes
    /// queue up and are consumed in order; once drained, calls succeed.
    pub fn push_create_outcome(&self, outcome: CreateOutcome) {
        self.create_outcomes.lock().unwrap().push_back(outcome);
    }

    /// Offers `create_instance` was called with, in call order.
    pub fn create_calls(&self) -> Vec<InstanceOffer> {
        self.create_calls.lock().unwrap().clone()
    }

    /// Provider instance ids `terminate_instance` was called with.
    pub fn terminate_calls(&self) -> Vec<String> {
        self.terminate_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Compute for MockCompute {
    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    async fn get_offers(&self, requirements: &Requirements) -> Result<Vec<InstanceOffer>> {
        if *self.offers_fail.lock().unwrap() {
            return Err(BackendError::Request("offers unavailable".to_string()));
        }
        let offers = self.offers.lock().unwrap();
        Ok(offers
            .iter()
            .filter(|offer| offer.matches(requirements))
            .cloned()
            .collect())
    }

    async fn create_instance(
        &self,
        offer: &InstanceOffer,
        config: &InstanceConfiguration,
    ) -> Result<LaunchedInstanceInfo> {
        self.create_calls.lock().unwrap().push(offer.clone());
        let outcome = self.create_outcomes.lock().unwrap().pop_front();
        match outcome {
            Some(CreateOutcome::Error(msg)) => Err(BackendError::Request(msg)),
            Some(CreateOutcome::NotSupported) => Err(BackendError::NotSupported),
            Some(CreateOutcome::Success) | None => {
                let n = self.launch_counter.fetch_add(1, Ordering::SeqCst);
                Ok(LaunchedInstanceInfo {
                    instance_id: format!("{}-instance-{}", self.backend_type, n),
                    ip_address: format!("10.0.0.{}", n + 1),
                    region: offer.region.clone(),
                    username: "ubuntu".to_string(),
                    ssh_port: 22,
                    dockerized: true,
                    backend_data: Some(format!("{{\"name\":\"{}\"}}", config.instance_name)),
                })
            }
        }
    }

    async fn terminate_instance(&self, provisioning: &ProvisioningData) -> Result<()> {
        self.terminate_calls
            .lock()
            .unwrap()
            .push(provisioning.instance_id.clone());
        Ok(())
    }
}
