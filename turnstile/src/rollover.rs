// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The rollover scheduler: a background clock that closes windows on their
//! wall-clock boundaries.
//!
//! One thread serves every metric type. Each pass it rolls whatever windows
//! are due, hands the retired maps to the flush pipeline, and parks until
//! the earliest upcoming boundary. Registration of a new metric unparks it
//! (the new metric's boundary may be nearer than anything it was waiting
//! for), as does shutdown. The scheduler itself has no failure mode — only
//! the handoff to persistence can fail, and that is the flush pipeline's
//! problem.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_utils::sync::{Parker, Unparker};

use crate::flush::{self, FlushStats, Message};
use crate::registry::MetricRegistry;

pub(crate) fn spawn(
    registry: Arc<MetricRegistry>,
    tx: SyncSender<Message>,
    stats: Arc<FlushStats>,
    shutdown: Arc<AtomicBool>,
) -> (thread::JoinHandle<()>, Unparker) {
    let parker = Parker::new();
    let unparker = parker.unparker().clone();
    let scheduler = Scheduler {
        registry,
        tx,
        stats,
        shutdown,
        parker,
    };
    let handle = thread::Builder::new()
        .name("turnstile-rollover".into())
        .spawn(move || scheduler.run())
        .unwrap();
    (handle, unparker)
}

struct Scheduler {
    registry: Arc<MetricRegistry>,
    tx: SyncSender<Message>,
    stats: Arc<FlushStats>,
    shutdown: Arc<AtomicBool>,
    parker: Parker,
}

impl Scheduler {
    fn run(self) {
        tracing::debug!("rollover scheduler started");
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let now = self.registry.now();
            let (closed, next_boundary) = self.registry.roll_due(now);
            for window in closed {
                flush::enqueue(&self.tx, window, &self.stats);
            }

            match next_boundary {
                Some(boundary) => {
                    let wait = boundary.duration_since(now).unwrap_or(Duration::ZERO);
                    self.parker.park_timeout(wait);
                }
                // nothing registered yet; wait for a registration or shutdown
                None => self.parker.park(),
            }
        }
        tracing::debug!("rollover scheduler stopped");
    }
}
