// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Run name generation and validation.
//!
//! Generated names have the form `<adjective>-<noun>-<n>` where `n` is
//! the smallest positive integer making the name unique within the
//! project. Uniqueness of freshly generated names is guaranteed by a
//! per-project critical section around the probe-and-pick loop.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use rand::seq::SliceRandom;
use regex::Regex;

use crate::error::{CoreError, Result};
use crate::persistence::{Persistence, ProjectRecord};

static RUN_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^[a-z][a-z0-9-]{1,40}$").expect("run name regex is valid")
});

const ADJECTIVES: &[&str] = &[
    "ancient", "bold", "brave", "bright", "calm", "clever", "crimson", "curious", "daring",
    "eager", "fearless", "gentle", "golden", "happy", "hidden", "humble", "jolly", "keen",
    "lively", "lucky", "mellow", "mighty", "noble", "patient", "proud", "quiet", "rapid",
    "rustic", "silent", "smooth", "solid", "swift", "tranquil", "vivid", "wise", "zesty",
];

const NOUNS: &[&str] = &[
    "albatross", "badger", "beaver", "bison", "condor", "coral", "crane", "dolphin", "falcon",
    "fox", "gecko", "harbor", "heron", "ibis", "jaguar", "kestrel", "lagoon", "lemur", "lynx",
    "marmot", "meadow", "mole", "narwhal", "otter", "owl", "panther", "pelican", "puffin",
    "quokka", "raven", "reef", "seal", "sparrow", "tern", "tiger", "walrus",
];

/// Validate a user-provided run name.
pub fn validate_run_name(run_name: &str) -> Result<()> {
    if !RUN_NAME_RE.is_match(run_name) {
        return Err(CoreError::client(
            "run_name should match regex '^[a-z][a-z0-9-]{1,40}$'",
        ));
    }
    Ok(())
}

/// Generates unique run names under per-project critical sections.
#[derive(Default)]
pub struct NameGenerator {
    project_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl NameGenerator {
    /// Create a name generator.
    pub fn new() -> Self {
        Self::default()
    }

    fn project_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .project_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Allocate a fresh unique run name for the project.
    pub async fn generate(
        &self,
        persistence: &dyn Persistence,
        project: &ProjectRecord,
    ) -> Result<String> {
        let base = {
            let mut rng = rand::thread_rng();
            let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("brave");
            let noun = NOUNS.choose(&mut rng).copied().unwrap_or("otter");
            format!("{adjective}-{noun}")
        };

        let lock = self.project_lock(&project.id);
        let _held = lock.lock().await;
        let mut idx: u32 = 1;
        loop {
            let candidate = format!("{base}-{idx}");
            if persistence
                .get_run_by_name(&project.id, &candidate)
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
            idx += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_generated_shapes() {
        for name in ["brave-otter-1", "a1", "run-with-dashes-42"] {
            assert!(validate_run_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        for name in ["A-upper", "1starts-with-digit", "x", "", "has_underscore"] {
            assert!(validate_run_name(name).is_err(), "{name} should be invalid");
        }
        // 42 chars total exceeds the 41-char maximum
        let too_long = format!("a{}", "b".repeat(41));
        assert!(validate_run_name(&too_long).is_err());
    }

    #[test]
    fn test_word_lists_produce_valid_names() {
        for adjective in ADJECTIVES {
            for noun in NOUNS {
                let name = format!("{adjective}-{noun}-1");
                assert!(validate_run_name(&name).is_ok(), "{name} should be valid");
            }
        }
    }
}
