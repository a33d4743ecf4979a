// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The persisted unit: one combination key's totals for one closed window.

use crate::filter::CombinationKey;
use crate::trackable::FieldValue;
use crate::window::TimeWindow;

/// Immutable totals for one (metric, combination key, window) triple.
///
/// Built by the flush pipeline after a window closes and handed to the
/// [`Persist`](crate::persist::Persist) implementation. Only fields that were
/// actually touched during the window appear; a metric that never recorded
/// into a field does not persist a zero for it.
///
/// The engine delivers snapshots at-least-once: a retry after an ambiguous
/// persistence failure can hand the backend the same snapshot twice. The
/// (metric, key, window start) triple identifies a snapshot uniquely, so
/// backends should upsert on that identity rather than blindly accumulate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TrackerDataSnapshot {
    metric: &'static str,
    description: &'static str,
    window: TimeWindow,
    key: CombinationKey,
    fields: Vec<(&'static str, FieldValue)>,
}

impl TrackerDataSnapshot {
    /// Assemble a snapshot. Normally only the flush pipeline does this, but
    /// it is public so tests and backends can fabricate expected values.
    pub fn new(
        metric: &'static str,
        description: &'static str,
        window: TimeWindow,
        key: CombinationKey,
        fields: Vec<(&'static str, FieldValue)>,
    ) -> Self {
        Self {
            metric,
            description,
            window,
            key,
            fields,
        }
    }

    /// Name of the metric type this snapshot belongs to.
    pub fn metric(&self) -> &'static str {
        self.metric
    }

    /// The metric's registered description.
    pub fn description(&self) -> &'static str {
        self.description
    }

    /// The closed window the totals were accumulated in.
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// The combination key the totals are partitioned by.
    pub fn key(&self) -> &CombinationKey {
        &self.key
    }

    /// All touched fields and their accumulated totals.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, FieldValue)> {
        self.fields.iter().copied()
    }

    /// A single field's total, if it was touched during the window.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| *value)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::trackable::Resolution;

    #[test]
    fn field_lookup() {
        let snapshot = TrackerDataSnapshot::new(
            "Latency",
            "request latency",
            TimeWindow::containing(Resolution::Minute, UNIX_EPOCH),
            CombinationKey::empty(),
            vec![
                ("Calls", FieldValue::Count(2)),
                ("Total", FieldValue::Elapsed(Duration::from_millis(120))),
            ],
        );
        assert_eq!(snapshot.field("Calls"), Some(FieldValue::Count(2)));
        assert_eq!(
            snapshot.field("Total"),
            Some(FieldValue::Elapsed(Duration::from_millis(120)))
        );
        assert_eq!(snapshot.field("Other"), None);
        assert_eq!(snapshot.fields().count(), 2);
    }
}
