// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Utilities for testing code that records metrics.
//!
//! To enable this module, you must enable the `test-util` feature.

use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use turnstile_core::{CombinationKey, Persist, PersistError, TrackerDataSnapshot};

/// Identity of a snapshot for at-least-once merge purposes.
type SnapshotId = (String, String, Duration);

fn id(snapshot: &TrackerDataSnapshot) -> SnapshotId {
    (
        snapshot.metric().to_owned(),
        snapshot.key().to_string(),
        snapshot
            .window()
            .start()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default(),
    )
}

#[derive(Default)]
struct State {
    delivered: Vec<TrackerDataSnapshot>,
    merged: hashbrown::HashMap<SnapshotId, TrackerDataSnapshot>,
    fail_budget: usize,
    attempts: usize,
}

/// An in-memory [`Persist`] implementation that captures snapshots.
///
/// Keeps both the raw delivery log (every successful `persist` call, so
/// duplicate deliveries are visible) and a merged view keyed by
/// (metric, key, window) upsert semantics — the at-least-once-safe merge a
/// real backend is expected to apply.
///
/// Failures can be injected with [`fail_times`](TestPersister::fail_times)
/// to exercise the flush pipeline's retry and drop behavior.
#[derive(Clone, Default)]
pub struct TestPersister {
    state: Arc<Mutex<State>>,
}

impl TestPersister {
    /// A fresh, empty persister.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `failures` persist calls fail.
    pub fn fail_times(&self, failures: usize) {
        self.state.lock().unwrap().fail_budget = failures;
    }

    /// Total persist calls seen, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Every successfully delivered snapshot, in delivery order, duplicates
    /// included.
    pub fn delivered(&self) -> Vec<TrackerDataSnapshot> {
        self.state.lock().unwrap().delivered.clone()
    }

    /// The merged (upsert-by-identity) view of everything delivered.
    pub fn merged(&self) -> Vec<TrackerDataSnapshot> {
        self.state.lock().unwrap().merged.values().cloned().collect()
    }

    /// The merged snapshot for a (metric, key) pair, if exactly one window
    /// of it was delivered. Convenient for single-window scenario tests.
    pub fn find(&self, metric: &str, key: &CombinationKey) -> Option<TrackerDataSnapshot> {
        let state = self.state.lock().unwrap();
        let mut matches = state
            .merged
            .values()
            .filter(|s| s.metric() == metric && s.key() == key);
        let found = matches.next()?;
        match matches.next() {
            None => Some(found.clone()),
            Some(_) => None,
        }
    }
}

impl Persist for TestPersister {
    fn persist(&self, snapshot: &TrackerDataSnapshot) -> Result<(), PersistError> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if state.fail_budget > 0 {
            state.fail_budget -= 1;
            return Err(PersistError::new("injected failure"));
        }
        state.delivered.push(snapshot.clone());
        state.merged.insert(id(snapshot), snapshot.clone());
        Ok(())
    }
}
