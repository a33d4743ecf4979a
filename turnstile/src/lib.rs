// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod clock;
mod flush;
mod index;
mod registry;
mod rollover;
mod tracker;

#[cfg(feature = "test-util")]
pub mod test_util;

pub use clock::{Clock, SystemClock};
#[cfg(feature = "test-util")]
pub use clock::ManualClock;
pub use flush::{FlushTotals, FlushWait, RetryPolicy};
pub use tracker::{Entry, Turnstile, TurnstileBuilder, TurnstileHandle};

pub use turnstile_core::{
    CombinationKey, FieldDef, FieldKind, FieldValue, Filter, Persist, PersistError, Resolution,
    TimeWindow, TrackError, Trackable, TrackerDataSnapshot, DEFAULT_FIELD, MAX_FILTER_DIMENSIONS,
};
