// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The live counter store for one window of one metric type.
//!
//! A [`WindowMap`] owns every counter record of the metric's *current*
//! window. Writers look up (or lazily create) the record for each combination
//! key and bump field cells with atomic adds; no lock ever spans the whole
//! map. The map itself is insert-only — records are never removed while the
//! window is live, and the rollover scheduler retires the entire map in one
//! reference swap rather than clearing it in place.
//!
//! Shard locks are held only for record lookup/insert; the returned record is
//! an `Arc`, so the atomic adds happen entirely outside any lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use std::hash::BuildHasher;

use turnstile_core::{CombinationKey, FieldKind, FieldValue, TimeWindow};

const SHARD_COUNT: usize = 16;

/// Encode a field value into the raw cell representation.
///
/// Counts are stored as-is; durations accumulate as saturating microseconds.
pub(crate) fn encode(value: FieldValue) -> u64 {
    match value {
        FieldValue::Count(count) => count,
        FieldValue::Elapsed(elapsed) => u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
    }
}

/// Decode a raw cell back into the field's declared value kind.
pub(crate) fn decode(kind: FieldKind, raw: u64) -> FieldValue {
    match kind {
        FieldKind::Counter => FieldValue::Count(raw),
        FieldKind::Duration => FieldValue::Elapsed(Duration::from_micros(raw)),
    }
}

/// Accumulated totals for one (metric, combination key, window) triple.
///
/// One cell per schema field. Mutated only through atomic adds while the
/// window is live; read-only once the window closes.
pub(crate) struct CounterRecord {
    cells: Box<[AtomicU64]>,
}

impl CounterRecord {
    fn new(field_count: usize) -> Self {
        Self {
            cells: (0..field_count).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub(crate) fn add(&self, field: usize, raw: u64) {
        self.cells[field].fetch_add(raw, Ordering::Relaxed);
    }

    pub(crate) fn load(&self, field: usize) -> u64 {
        self.cells[field].load(Ordering::Relaxed)
    }
}

type Shard = RwLock<hashbrown::HashMap<CombinationKey, Arc<CounterRecord>>>;

/// All counter records of one metric's window, sharded by key hash.
pub(crate) struct WindowMap {
    window: TimeWindow,
    field_count: usize,
    hasher: ahash::RandomState,
    shards: Box<[Shard]>,
}

impl WindowMap {
    pub(crate) fn new(window: TimeWindow, field_count: usize) -> Self {
        Self {
            window,
            field_count,
            hasher: ahash::RandomState::new(),
            shards: (0..SHARD_COUNT)
                .map(|_| RwLock::new(hashbrown::HashMap::new()))
                .collect(),
        }
    }

    pub(crate) fn window(&self) -> TimeWindow {
        self.window
    }

    /// Apply every add to every key's record.
    ///
    /// Each cell add is individually atomic; a concurrent reader of the live
    /// window may observe a partially applied call, but once the window
    /// closes (which waits out in-flight callers) every call is fully
    /// reflected or not started.
    pub(crate) fn apply(&self, keys: &[CombinationKey], adds: &[(usize, u64)]) {
        for key in keys {
            let record = self.record(key);
            for &(field, raw) in adds {
                record.add(field, raw);
            }
        }
    }

    fn record(&self, key: &CombinationKey) -> Arc<CounterRecord> {
        let shard = &self.shards[self.hasher.hash_one(key) as usize % SHARD_COUNT];
        if let Some(record) = shard.read().unwrap().get(key) {
            return Arc::clone(record);
        }
        let mut shard = shard.write().unwrap();
        Arc::clone(
            shard
                .entry(key.clone())
                .or_insert_with(|| Arc::new(CounterRecord::new(self.field_count))),
        )
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().unwrap().is_empty())
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap().len()).sum()
    }

    pub(crate) fn for_each_record(&self, mut f: impl FnMut(&CombinationKey, &CounterRecord)) {
        for shard in self.shards.iter() {
            for (key, record) in shard.read().unwrap().iter() {
                f(key, record);
            }
        }
    }
}
