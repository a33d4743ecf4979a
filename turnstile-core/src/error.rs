// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Errors reported synchronously by increment operations.
//!
//! Every variant is an input error: it is detected before any counter is
//! touched, so a failed call has no partial effect. Persistence failures are
//! deliberately *not* represented here — they are recovered (and, past the
//! retry budget, surfaced) inside the flush pipeline and never reach
//! increment callers.

use std::fmt;

use crate::trackable::FieldKind;

/// Why an increment operation was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrackError {
    /// The addressed field is not part of the metric's registered schema.
    UnknownField {
        /// Metric type name.
        metric: &'static str,
        /// The field name that failed to resolve.
        field: String,
    },
    /// The value's kind does not match the field's declared kind.
    FieldKindMismatch {
        /// Metric type name.
        metric: &'static str,
        /// The addressed field.
        field: String,
        /// The kind the schema declares for that field.
        expected: FieldKind,
    },
    /// A metric type was seen again with a different schema or resolution
    /// than it first registered with.
    SchemaMismatch {
        /// Metric type name.
        metric: &'static str,
    },
    /// The metric's field schema is malformed (duplicate, empty, or reserved
    /// field names).
    InvalidSchema {
        /// Metric type name.
        metric: &'static str,
        /// What is wrong with the schema.
        reason: String,
    },
    /// A filter dimension is structurally invalid (empty dimension name).
    InvalidDimension(
        /// What is wrong with the dimension.
        String,
    ),
    /// The filter has more populated dimensions than the engine will expand.
    ///
    /// Expansion is exponential in the number of populated dimensions, so the
    /// engine refuses filters beyond [`crate::filter::MAX_FILTER_DIMENSIONS`].
    TooManyDimensions {
        /// How many dimensions the filter populated.
        populated: usize,
        /// The expansion limit.
        limit: usize,
    },
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackError::UnknownField { metric, field } => {
                write!(f, "metric `{metric}` has no field `{field}`")
            }
            TrackError::FieldKindMismatch {
                metric,
                field,
                expected,
            } => write!(
                f,
                "field `{field}` of metric `{metric}` accumulates {expected:?} values"
            ),
            TrackError::SchemaMismatch { metric } => write!(
                f,
                "metric `{metric}` was re-registered with a different schema"
            ),
            TrackError::InvalidSchema { metric, reason } => {
                write!(f, "invalid schema for metric `{metric}`: {reason}")
            }
            TrackError::InvalidDimension(reason) => write!(f, "invalid filter dimension: {reason}"),
            TrackError::TooManyDimensions { populated, limit } => write!(
                f,
                "filter populates {populated} dimensions, more than the expansion limit of {limit}"
            ),
        }
    }
}

impl std::error::Error for TrackError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_input() {
        let err = TrackError::UnknownField {
            metric: "Visits",
            field: "Missing".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("Visits"));
        assert!(rendered.contains("Missing"));

        let err = TrackError::TooManyDimensions {
            populated: 12,
            limit: 10,
        };
        assert!(err.to_string().contains("12"));
    }
}
