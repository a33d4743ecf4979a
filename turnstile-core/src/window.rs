// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wall-clock aligned time windows.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::trackable::Resolution;

/// One fixed-length interval counts accumulate in.
///
/// Windows are aligned to multiples of their resolution since the Unix epoch
/// (so to UTC wall-clock boundaries: five-minute windows start at :00, :05,
/// :10...), not to process start. Metrics sharing a resolution therefore
/// share window boundaries, which is what makes cross-metric correlation at
/// report time meaningful.
///
/// An instant exactly on a boundary belongs to the window that *starts*
/// there: windows cover `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TimeWindow {
    start: SystemTime,
    end: SystemTime,
    resolution: Resolution,
}

impl TimeWindow {
    /// The aligned window containing `at` for the given resolution.
    pub fn containing(resolution: Resolution, at: SystemTime) -> Self {
        let step = resolution.duration().as_secs();
        let since_epoch = at
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        let start = UNIX_EPOCH + Duration::from_secs((since_epoch / step) * step);
        Self {
            start,
            end: start + resolution.duration(),
            resolution,
        }
    }

    /// Inclusive start of the window (UTC).
    pub fn start(&self) -> SystemTime {
        self.start
    }

    /// Exclusive end of the window (UTC).
    pub fn end(&self) -> SystemTime {
        self.end
    }

    /// The resolution the window was aligned at.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// True if `at` falls inside `[start, end)`.
    pub fn contains(&self, at: SystemTime) -> bool {
        self.start <= at && at < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn windows_align_to_resolution_multiples() {
        let w = TimeWindow::containing(Resolution::FiveMinute, at(7 * 60 + 13));
        assert_eq!(w.start(), at(5 * 60));
        assert_eq!(w.end(), at(10 * 60));

        let w = TimeWindow::containing(Resolution::Hour, at(3 * 3600 + 59 * 60));
        assert_eq!(w.start(), at(3 * 3600));
        assert_eq!(w.end(), at(4 * 3600));
    }

    #[test]
    fn length_equals_resolution() {
        for resolution in [
            Resolution::Minute,
            Resolution::FiveMinute,
            Resolution::FifteenMinute,
            Resolution::ThirtyMinute,
            Resolution::Hour,
        ] {
            let w = TimeWindow::containing(resolution, at(123_456));
            assert_eq!(w.end().duration_since(w.start()).unwrap(), resolution.duration());
        }
    }

    #[test]
    fn boundary_instant_starts_the_next_window() {
        let boundary = at(10 * 60);
        let w = TimeWindow::containing(Resolution::FiveMinute, boundary);
        assert_eq!(w.start(), boundary);
        assert!(w.contains(boundary));

        let before = TimeWindow::containing(Resolution::FiveMinute, at(10 * 60 - 1));
        assert_eq!(before.end(), boundary);
        assert!(!before.contains(boundary));
    }

    #[test]
    fn same_instant_same_window() {
        let now = at(987_654);
        assert_eq!(
            TimeWindow::containing(Resolution::Minute, now),
            TimeWindow::containing(Resolution::Minute, now)
        );
    }
}
