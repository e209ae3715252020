// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared scheduler state.

use std::sync::Arc;

use armada_gateway::Nginx;

use crate::backends::BackendRegistry;
use crate::config::SchedulerConfig;
use crate::locks::LockService;
use crate::names::NameGenerator;
use crate::persistence::Persistence;
use crate::runner::RunnerClient;

/// Everything run/job/instance operations need, shared across handlers
/// and reconciler passes.
pub struct SchedulerState {
    /// Storage.
    pub persistence: Arc<dyn Persistence>,
    /// Configured backend adapters.
    pub backends: Arc<BackendRegistry>,
    /// Runner-agent client.
    pub runner: Arc<dyn RunnerClient>,
    /// Gateway controller, when service runs are enabled.
    pub gateway: Option<Arc<Nginx>>,
    /// Processing-set locks.
    pub locks: Arc<LockService>,
    /// Run name generator.
    pub names: NameGenerator,
    /// Scheduler tunables.
    pub config: SchedulerConfig,
}

impl SchedulerState {
    /// Create scheduler state without a gateway.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        backends: Arc<BackendRegistry>,
        runner: Arc<dyn RunnerClient>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            persistence,
            backends,
            runner,
            gateway: None,
            locks: Arc::new(LockService::new()),
            names: NameGenerator::new(),
            config,
        }
    }

    /// Attach a gateway controller for service runs.
    pub fn with_gateway(mut self, gateway: Arc<Nginx>) -> Self {
        self.gateway = Some(gateway);
        self
    }
}
