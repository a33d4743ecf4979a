// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod error;
pub mod filter;
pub mod persist;
pub mod report;
pub mod snapshot;
pub mod trackable;
pub mod window;

pub use error::TrackError;
pub use filter::{CombinationKey, Filter, MAX_FILTER_DIMENSIONS};
pub use persist::{Persist, PersistError};
pub use report::{ReportResolution, ReportSpec};
pub use snapshot::TrackerDataSnapshot;
pub use trackable::{FieldDef, FieldKind, FieldValue, Resolution, Trackable, DEFAULT_FIELD};
pub use window::TimeWindow;
