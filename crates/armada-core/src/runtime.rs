// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable scheduler runtime.
//!
//! [`SchedulerRuntime`] wires persistence, backends, the runner client
//! and (optionally) a gateway into shared scheduler state and runs the
//! reconciler as a background task inside an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use armada_core::backends::BackendRegistry;
//! use armada_core::persistence::SqlitePersistence;
//! use armada_core::runtime::SchedulerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let persistence = Arc::new(SqlitePersistence::from_path(".data/armada.db").await?);
//!     let mut backends = BackendRegistry::new(std::time::Duration::from_secs(30));
//!     // backends.register(Arc::new(AwsCompute::new(...)));
//!
//!     let runtime = SchedulerRuntime::builder()
//!         .persistence(persistence)
//!         .backends(Arc::new(backends))
//!         .runner(Arc::new(MyRunnerClient::new()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... serve the HTTP API against runtime.state() ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use armada_gateway::Nginx;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

use crate::backends::BackendRegistry;
use crate::config::SchedulerConfig;
use crate::persistence::Persistence;
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::runner::RunnerClient;
use crate::state::SchedulerState;

/// Builder for creating a [`SchedulerRuntime`].
pub struct SchedulerRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    backends: Option<Arc<BackendRegistry>>,
    runner: Option<Arc<dyn RunnerClient>>,
    gateway: Option<Arc<Nginx>>,
    config: SchedulerConfig,
    reconciler: ReconcilerConfig,
}

impl std::fmt::Debug for SchedulerRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerRuntimeBuilder")
            .field("persistence", &self.persistence.as_ref().map(|_| "..."))
            .field("backends", &self.backends.as_ref().map(|_| "..."))
            .field("gateway", &self.gateway.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .field("reconciler", &self.reconciler)
            .finish()
    }
}

impl Default for SchedulerRuntimeBuilder {
    fn default() -> Self {
        Self {
            persistence: None,
            backends: None,
            runner: None,
            gateway: None,
            config: SchedulerConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

impl SchedulerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the backend registry (required).
    pub fn backends(mut self, backends: Arc<BackendRegistry>) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Set the runner-agent client (required).
    pub fn runner(mut self, runner: Arc<dyn RunnerClient>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Attach a gateway controller for service runs.
    pub fn gateway(mut self, gateway: Arc<Nginx>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Override the scheduler tunables.
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the reconciler cadence.
    pub fn reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required components are missing.
    pub fn build(self) -> Result<SchedulerRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        let backends = self
            .backends
            .ok_or_else(|| anyhow::anyhow!("backends are required"))?;
        let runner = self
            .runner
            .ok_or_else(|| anyhow::anyhow!("runner client is required"))?;

        let mut state = SchedulerState::new(persistence, backends, runner, self.config);
        if let Some(gateway) = self.gateway {
            state = state.with_gateway(gateway);
        }
        Ok(SchedulerRuntimeConfig {
            state: Arc::new(state),
            reconciler: self.reconciler,
        })
    }
}

/// Configuration for a [`SchedulerRuntime`].
pub struct SchedulerRuntimeConfig {
    state: Arc<SchedulerState>,
    reconciler: ReconcilerConfig,
}

impl SchedulerRuntimeConfig {
    /// Start the runtime, spawning the reconciler task.
    pub async fn start(self) -> Result<SchedulerRuntime> {
        let reconciler = Reconciler::new(self.state.clone(), self.reconciler);
        let shutdown = reconciler.shutdown_handle();
        let handle = tokio::spawn(reconciler.run());
        info!("SchedulerRuntime started");
        Ok(SchedulerRuntime {
            state: self.state,
            shutdown,
            handle,
        })
    }
}

/// A running scheduler that can be embedded in an application.
pub struct SchedulerRuntime {
    state: Arc<SchedulerState>,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl SchedulerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SchedulerRuntimeBuilder {
        SchedulerRuntimeBuilder::new()
    }

    /// The shared scheduler state, for serving API operations.
    pub fn state(&self) -> &Arc<SchedulerState> {
        &self.state
    }

    /// Check if the reconciler is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("SchedulerRuntime shutting down...");
        // notify_one stores a permit, so the signal is not lost when the
        // reconciler is mid-tick rather than parked on notified()
        self.shutdown.notify_one();
        match self.handle.await {
            Ok(()) => {
                info!("SchedulerRuntime shutdown complete");
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("reconciler task panicked: {e}")),
        }
    }
}
