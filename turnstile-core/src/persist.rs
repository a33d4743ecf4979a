// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The persistence boundary.
//!
//! The engine does not know or care where snapshots go — a document store, a
//! log file, a network service. Backends implement [`Persist`] and are handed
//! snapshots by the flush pipeline, off the increment path, with bounded
//! retry on failure.

use std::fmt;

use crate::snapshot::TrackerDataSnapshot;

/// A storage backend for closed-window snapshots.
///
/// Contract:
/// - called only from the flush pipeline's worker, never from increment
///   callers, so it may block on I/O;
/// - must be safe to call concurrently (the trait requires `Send + Sync`
///   because the whole engine is);
/// - must tolerate at-least-once delivery: a retry after an ambiguous
///   failure can deliver the same snapshot again, and the backend must
///   upsert by (metric, key, window) rather than double-count;
/// - is responsible for bounding the time of a single call (e.g. a request
///   timeout). The pipeline bounds the *number* of attempts, not their
///   duration.
pub trait Persist: Send + Sync + 'static {
    /// Durably store one snapshot, or report why it could not be stored.
    fn persist(&self, snapshot: &TrackerDataSnapshot) -> Result<(), PersistError>;
}

/// Why a single persistence attempt failed.
///
/// Errors are free to allocate; the failure path is not performance
/// sensitive.
#[derive(Debug, Clone)]
pub struct PersistError(String);

impl PersistError {
    /// Record a persistence failure with a reason string.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for PersistError {}
