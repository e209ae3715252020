// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Processing-set locks for runs and job phases.
//!
//! Reconciler passes and user-initiated operations coordinate through
//! four id sets: one for runs being processed and three disjoint sets for
//! job phases. The protocol:
//!
//! - Run processing has priority over job processing. A job pass must
//!   skip jobs whose `run_id` is in the run set ([`LockService::contains`]).
//! - A run entering its terminating flow must wait until none of its job
//!   ids appear in any job phase ([`LockService::wait_empty`]) before
//!   mutating those jobs.
//! - A job is in at most one phase set at a time: its status determines
//!   which pass (and therefore which set) may pick it up.
//!
//! Membership is guarded by plain mutexes that are never held across an
//! await; waiting is a poll loop with a short sleep. Acquisition returns
//! a guard whose `Drop` removes the id, so a cancelled task can never
//! leave its id behind.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// How long waiters sleep between membership checks.
const POLL_DELAY: Duration = Duration::from_millis(100);

/// The processing phases ids can be locked under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingPhase {
    /// Runs being processed (submission-side or terminating flows).
    Runs,
    /// Jobs being processed by the submitted-jobs pass.
    SubmittedJobs,
    /// Jobs being processed by the provisioning/running pass.
    RunningJobs,
    /// Jobs being processed by the terminating-jobs pass.
    TerminatingJobs,
}

impl ProcessingPhase {
    fn index(&self) -> usize {
        match self {
            Self::Runs => 0,
            Self::SubmittedJobs => 1,
            Self::RunningJobs => 2,
            Self::TerminatingJobs => 3,
        }
    }

    /// The three job phases.
    pub fn job_phases() -> [ProcessingPhase; 3] {
        [
            Self::SubmittedJobs,
            Self::RunningJobs,
            Self::TerminatingJobs,
        ]
    }
}

/// The process-global lock sets.
#[derive(Debug, Default)]
pub struct LockService {
    sets: [Mutex<HashSet<String>>; 4],
}

impl LockService {
    /// Create an empty lock service.
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, phase: ProcessingPhase) -> &Mutex<HashSet<String>> {
        &self.sets[phase.index()]
    }

    fn with_set<T>(&self, phase: ProcessingPhase, f: impl FnOnce(&mut HashSet<String>) -> T) -> T {
        // A poisoned set would otherwise wedge every reconciler pass
        let mut guard = self
            .set(phase)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Try to add `id` to the phase set.
    ///
    /// Returns `None` when another worker already holds it.
    pub fn try_lock(&self, phase: ProcessingPhase, id: &str) -> Option<LockGuard<'_>> {
        let inserted = self.with_set(phase, |set| set.insert(id.to_string()));
        inserted.then(|| LockGuard {
            service: self,
            phase,
            id: id.to_string(),
        })
    }

    /// Add `id` to the phase set, waiting until it is free.
    pub async fn lock(&self, phase: ProcessingPhase, id: &str) -> LockGuard<'_> {
        loop {
            if let Some(guard) = self.try_lock(phase, id) {
                return guard;
            }
            tokio::time::sleep(POLL_DELAY).await;
        }
    }

    /// Whether `id` is currently held in the phase set.
    pub fn contains(&self, phase: ProcessingPhase, id: &str) -> bool {
        self.with_set(phase, |set| set.contains(id))
    }

    /// Wait until none of `ids` are held in the phase set.
    pub async fn wait_empty(&self, phase: ProcessingPhase, ids: &[String]) {
        loop {
            let busy = self.with_set(phase, |set| ids.iter().any(|id| set.contains(id)));
            if !busy {
                return;
            }
            tokio::time::sleep(POLL_DELAY).await;
        }
    }
}

/// Holds an id in a phase set; removes it on drop.
#[derive(Debug)]
pub struct LockGuard<'a> {
    service: &'a LockService,
    phase: ProcessingPhase,
    id: String,
}

impl LockGuard<'_> {
    /// The locked id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.service.with_set(self.phase, |set| {
            set.remove(&self.id);
        });
    }
}
