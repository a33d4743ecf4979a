// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The reporting contract.
//!
//! Reporting is not implemented by the engine: a reporting layer reads
//! persisted [`TrackerDataSnapshot`]s back out of the storage backend and
//! rolls them up. The types here pin down what such a layer is asked for, so
//! engine, backend, and reporting code agree on the request shape.
//!
//! The semantics the reporting layer is expected to implement: select
//! snapshots whose metric name is in [`metrics`](ReportSpec::metrics), whose
//! combination key is one of [`combinations`](ReportSpec::combinations), and
//! whose window start falls inside `[from, to)`; then sum field values per
//! (metric, key, bucket), where buckets are the requested
//! [`ReportResolution`]. Windows finer than the requested resolution roll up
//! by plain addition — counter and duration fields are both sums, so no
//! other merge is needed.
//!
//! [`TrackerDataSnapshot`]: crate::snapshot::TrackerDataSnapshot

use std::time::SystemTime;

use crate::filter::CombinationKey;

/// Calendar granularity a report rolls windows up to.
///
/// Coarser than [`Resolution`](crate::trackable::Resolution) on purpose:
/// reports aggregate over days, months, or years of persisted windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ReportResolution {
    /// Per-minute buckets.
    Minute,
    /// Per-hour buckets.
    Hour,
    /// Per-day buckets.
    Day,
    /// Per-month buckets.
    Month,
    /// Per-year buckets.
    Year,
}

/// A request to the external reporting layer.
#[derive(Debug, Clone)]
pub struct ReportSpec {
    from: SystemTime,
    to: SystemTime,
    resolution: ReportResolution,
    metrics: Vec<String>,
    combinations: Vec<CombinationKey>,
}

impl ReportSpec {
    /// Report over `[from, to)` with the given rollup granularity.
    ///
    /// With no further constraints the spec selects every metric and only
    /// the global-total (empty) combination key.
    pub fn new(from: SystemTime, to: SystemTime, resolution: ReportResolution) -> Self {
        Self {
            from,
            to,
            resolution,
            metrics: Vec::new(),
            combinations: vec![CombinationKey::empty()],
        }
    }

    /// Restrict the report to a metric type (repeatable).
    pub fn with_metric(mut self, name: impl Into<String>) -> Self {
        self.metrics.push(name.into());
        self
    }

    /// Add a combination key to break the report out by (repeatable).
    pub fn with_combination(mut self, key: CombinationKey) -> Self {
        self.combinations.push(key);
        self
    }

    /// Inclusive start of the reporting range.
    pub fn from(&self) -> SystemTime {
        self.from
    }

    /// Exclusive end of the reporting range.
    pub fn to(&self) -> SystemTime {
        self.to
    }

    /// The rollup granularity.
    pub fn resolution(&self) -> ReportResolution {
        self.resolution
    }

    /// Metric type names to include; empty means all.
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// Combination keys to break out by.
    pub fn combinations(&self) -> &[CombinationKey] {
        &self.combinations
    }
}
