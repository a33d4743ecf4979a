// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Minimal end-to-end use of the engine with a stdout persister.
//!
//! Run with `cargo run --example store_visits`.

use std::time::Duration;

use turnstile::{
    FieldDef, Filter, Persist, PersistError, Resolution, Trackable, TrackerDataSnapshot, Turnstile,
};

struct CustomerVisits;

impl Trackable for CustomerVisits {
    fn name(&self) -> &'static str {
        "CustomerVisits"
    }
    fn description(&self) -> &'static str {
        "Counts customer visits per store"
    }
    fn min_resolution(&self) -> Resolution {
        Resolution::Minute
    }
}

struct CheckoutLatency;

impl Trackable for CheckoutLatency {
    fn name(&self) -> &'static str {
        "CheckoutLatency"
    }
    fn description(&self) -> &'static str {
        "Time spent in the checkout flow"
    }
    fn min_resolution(&self) -> Resolution {
        Resolution::FiveMinute
    }
    fn fields(&self) -> &'static [FieldDef] {
        const FIELDS: &[FieldDef] = &[FieldDef::counter("Calls"), FieldDef::duration("TotalTime")];
        FIELDS
    }
}

struct StdoutPersister;

impl Persist for StdoutPersister {
    fn persist(&self, snapshot: &TrackerDataSnapshot) -> Result<(), PersistError> {
        let fields: Vec<String> = snapshot
            .fields()
            .map(|(name, value)| format!("{name}={value:?}"))
            .collect();
        println!(
            "{} [{:?}] {} -> {}",
            snapshot.metric(),
            snapshot.window().start(),
            snapshot.key(),
            fields.join(", ")
        );
        Ok(())
    }
}

fn main() {
    let (turnstile, handle) = Turnstile::new(StdoutPersister);

    let filter = Filter::new().with("State", "CA").with("StoreID", "3234");
    for _ in 0..3 {
        turnstile
            .increment_default(&CustomerVisits, Some(&filter), 1)
            .unwrap();
    }
    turnstile.increment_default(&CustomerVisits, None, 1).unwrap();

    turnstile
        .entry(&CheckoutLatency)
        .filter(&filter)
        .add("Calls", 1)
        .add("TotalTime", Duration::from_millis(64))
        .record()
        .unwrap();

    // closes the open windows and prints their snapshots on the way out
    handle.shut_down();
}
