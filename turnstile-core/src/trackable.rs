// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The metric registration contract: what a trackable metric looks like.
//!
//! A metric type is described once, by a type implementing [`Trackable`], and
//! registered lazily the first time it is incremented. The description is
//! entirely static: a name, a human-readable description, the minimum time
//! resolution counts are bucketed at, and the schema of numeric fields the
//! metric accumulates. Fields are addressed by name and validated against the
//! schema at registration time — there is no runtime reflection anywhere in
//! the increment path.

use std::time::Duration;

/// Name of the implicit counter field every metric carries.
///
/// `increment_default` style operations add to this field. A [`Trackable`]
/// may not declare a custom field with this name.
pub const DEFAULT_FIELD: &str = "Count";

/// The finest time granularity a metric's counts are bucketed at.
///
/// Windows are aligned to wall-clock multiples of the resolution (see
/// [`crate::window::TimeWindow::containing`]), so five-minute windows start
/// at :00, :05, :10 and so on regardless of when the process started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Resolution {
    /// One-minute windows.
    Minute,
    /// Five-minute windows.
    FiveMinute,
    /// Fifteen-minute windows.
    FifteenMinute,
    /// Thirty-minute windows.
    ThirtyMinute,
    /// One-hour windows.
    Hour,
}

impl Resolution {
    /// The length of one window at this resolution.
    pub const fn duration(self) -> Duration {
        match self {
            Resolution::Minute => Duration::from_secs(60),
            Resolution::FiveMinute => Duration::from_secs(5 * 60),
            Resolution::FifteenMinute => Duration::from_secs(15 * 60),
            Resolution::ThirtyMinute => Duration::from_secs(30 * 60),
            Resolution::Hour => Duration::from_secs(60 * 60),
        }
    }
}

/// What kind of value a metric field accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FieldKind {
    /// A non-negative integer count, summed.
    Counter,
    /// A duration accumulator, summed.
    Duration,
}

/// One named field in a metric's schema.
///
/// Schemas are `const`-constructible so they can live in a `static`:
///
/// ```
/// use turnstile_core::FieldDef;
///
/// static FIELDS: &[FieldDef] = &[
///     FieldDef::counter("Calls"),
///     FieldDef::duration("TotalTime"),
/// ];
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    name: &'static str,
    kind: FieldKind,
}

impl FieldDef {
    /// A field that sums non-negative integer deltas.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Counter,
        }
    }

    /// A field that sums elapsed durations.
    pub const fn duration(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Duration,
        }
    }

    /// The field's name, as addressed by increment calls.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The kind of value this field accumulates.
    pub const fn kind(&self) -> FieldKind {
        self.kind
    }
}

/// A single value recorded into (or read back out of) a metric field.
///
/// Converts from the natural Rust types, so increment call sites can pass
/// `1u64` or a [`Duration`] directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FieldValue {
    /// An integer count.
    Count(u64),
    /// An elapsed duration.
    Elapsed(Duration),
}

impl FieldValue {
    /// The field kind this value is compatible with.
    pub const fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Count(_) => FieldKind::Counter,
            FieldValue::Elapsed(_) => FieldKind::Duration,
        }
    }

    /// The count, if this is a counter value.
    pub const fn as_count(&self) -> Option<u64> {
        match self {
            FieldValue::Count(n) => Some(*n),
            FieldValue::Elapsed(_) => None,
        }
    }

    /// The duration, if this is a duration value.
    pub const fn as_elapsed(&self) -> Option<Duration> {
        match self {
            FieldValue::Count(_) => None,
            FieldValue::Elapsed(d) => Some(*d),
        }
    }
}

impl From<u64> for FieldValue {
    fn from(count: u64) -> Self {
        FieldValue::Count(count)
    }
}

impl From<Duration> for FieldValue {
    fn from(elapsed: Duration) -> Self {
        FieldValue::Elapsed(elapsed)
    }
}

/// A metric type that can be tracked.
///
/// Implementations are passive descriptions; all counting state lives in the
/// engine. The same type registers at most once per engine (keyed by
/// [`name`](Trackable::name)), on first use, and must describe the same
/// schema every time it is seen.
///
/// ```
/// use turnstile_core::{Resolution, Trackable};
///
/// struct CustomerVisits;
///
/// impl Trackable for CustomerVisits {
///     fn name(&self) -> &'static str {
///         "CustomerVisits"
///     }
///
///     fn description(&self) -> &'static str {
///         "Counts customer visits per store"
///     }
///
///     fn min_resolution(&self) -> Resolution {
///         Resolution::FiveMinute
///     }
/// }
/// ```
///
/// A metric with no custom fields (the default) tracks only the implicit
/// [`DEFAULT_FIELD`] counter.
pub trait Trackable: Send + Sync {
    /// Unique name of this metric type. Registration is keyed by this value.
    fn name(&self) -> &'static str;

    /// Human-readable description, carried through to persisted snapshots.
    fn description(&self) -> &'static str;

    /// The finest window granularity this metric is bucketed at.
    fn min_resolution(&self) -> Resolution;

    /// Custom fields beyond the implicit [`DEFAULT_FIELD`] counter.
    fn fields(&self) -> &'static [FieldDef] {
        &[]
    }
}
