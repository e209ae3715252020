// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Armada Core - Run Orchestration Engine
//!
//! This crate is the orchestration core of the armada multi-cloud workload
//! scheduler. Users submit declarative run specs describing containerized
//! jobs (batch tasks or long-lived services); the core plans execution
//! across cloud backends, provisions instances from pools, drives each run
//! through its lifecycle state machine and reconciles user-initiated
//! termination with in-flight job processing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    External Transport (HTTP API, CLI)               │
//! └──────────────────────────────────┬──────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          armada-core                                │
//! │                                                                     │
//! │  runs / jobs            planner + pools          reconciler         │
//! │  (state machine)  ◄───  (offer selection)  ◄───  (periodic driver)  │
//! │        │                       │                                    │
//! └────────┼───────────────────────┼────────────────────────────────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌───────────────────┐   ┌─────────────────────┐   ┌──────────────────┐
//! │      SQLite       │   │   Cloud backends    │   │  armada-gateway  │
//! │ (durable storage) │   │ (offers, instances) │   │ (service runs)   │
//! └───────────────────┘   └─────────────────────┘   └──────────────────┘
//! ```
//!
//! # Run Status State Machine
//!
//! ```text
//!  ┌───────────┐      ┌──────────────┐      ┌─────────┐
//!  │ SUBMITTED │ ───► │ PROVISIONING │ ───► │ RUNNING │
//!  └─────┬─────┘      └──────┬───────┘      └────┬────┘
//!        │                   │                   │
//!        └───────────────────┴───────┬───────────┘
//!                                    │ stop / all jobs done / job failed
//!                                    ▼
//!                             ┌─────────────┐
//!                             │ TERMINATING │
//!                             └──────┬──────┘
//!                                    │ termination reason
//!                    ┌───────────────┼───────────────┐
//!                    ▼               ▼               ▼
//!               ┌────────┐      ┌────────┐     ┌────────────┐
//!               │  DONE  │      │ FAILED │     │ TERMINATED │
//!               └────────┘      └────────┘     └────────────┘
//! ```
//!
//! Jobs follow the same shape with an extra terminal `ABORTED` status;
//! retried jobs get a fresh submission row with `submission_num + 1`.
//!
//! # Concurrency Protocol
//!
//! Multiple reconciler passes mutate runs and jobs concurrently. Mutations
//! are guarded by the [`locks::LockService`]: one processing set for runs
//! and three disjoint sets for job phases (submitted, running,
//! terminating). Run processing has priority over job processing: a job
//! pass skips jobs whose run is being processed, while a run entering its
//! terminating flow waits until none of its job ids are held by any job
//! phase. See [`locks`] for the full protocol.
//!
//! # Modules
//!
//! - [`backends`]: Compute capability trait, backend registry, mock backend
//! - [`config`]: Environment-driven configuration
//! - [`error`]: Error taxonomy for core operations
//! - [`instances`]: Explicit instance creation and idle cleanup
//! - [`jobs`]: Job state machine and submission handling
//! - [`locks`]: Processing-set lock service
//! - [`models`]: Data model: runs, jobs, instances, offers, profiles
//! - [`names`]: Run name generation and validation
//! - [`persistence`]: Storage trait and SQLite implementation
//! - [`planner`]: Offer planning over pools and live backends
//! - [`pools`]: Instance pool management
//! - [`reconciler`]: Periodic processing driver
//! - [`runner`]: Runner-agent client interface
//! - [`runs`]: Run submission, planning, termination
//! - [`runtime`]: Embeddable scheduler runtime
//! - [`state`]: Shared scheduler state

#![deny(missing_docs)]

/// Cloud backend adapters: compute trait, registry, mock backend.
pub mod backends;

/// Configuration loading from environment variables.
pub mod config;

/// Error types for core operations.
pub mod error;

/// Explicit instance creation and instance lifecycle helpers.
pub mod instances;

/// Job state machine: materialization, processing, termination.
pub mod jobs;

/// Processing-set locks for runs and job phases.
pub mod locks;

/// Data model: entities, statuses, specs, offers.
pub mod models;

/// Run name generation and validation.
pub mod names;

/// Storage trait and SQLite-backed implementation.
pub mod persistence;

/// Offer planning: pool and backend offer enumeration and filtering.
pub mod planner;

/// Instance pool management.
pub mod pools;

/// Periodic reconciliation driver.
pub mod reconciler;

/// Runner-agent client interface.
pub mod runner;

/// Run submission, planning, listing and termination.
pub mod runs;

/// Embeddable scheduler runtime.
pub mod runtime;

/// Shared scheduler state wired into every operation.
pub mod state;
