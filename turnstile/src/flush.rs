// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The flush pipeline: closed windows in, persisted snapshots out.
//!
//! A dedicated worker thread receives retired window maps over a bounded
//! channel, converts each record into an immutable [`TrackerDataSnapshot`],
//! and delivers the snapshots to the configured [`Persist`] backend. Delivery
//! retries in rounds with exponential backoff: every round attempts all
//! still-pending snapshots of the window, so one failing snapshot delays but
//! never starves its siblings. Snapshots that exhaust the retry budget are
//! dropped, counted in [`FlushTotals`], and logged — persistence failures are
//! surfaced to operators, never to increment callers and never silently.
//!
//! Windows flow through the single worker in FIFO order, which keeps
//! delivery of the same combination key's windows in chronological order as
//! long as the backend keeps accepting writes (a best-effort property; the
//! window timestamps disambiguate regardless).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use turnstile_core::{Persist, TrackerDataSnapshot};

use crate::index::{decode, WindowMap};
use crate::registry::RegisteredMetric;

/// A retired window map on its way to the persistence backend.
pub(crate) struct ClosedWindow {
    pub(crate) metric: Arc<RegisteredMetric>,
    pub(crate) map: Arc<WindowMap>,
}

pub(crate) enum Message {
    Window(ClosedWindow),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// How persistently the flush pipeline retries a failing backend.
///
/// Attempts are bounded and backoff grows exponentially from
/// [`initial_backoff`](RetryPolicy::initial_backoff) up to
/// [`max_backoff`](RetryPolicy::max_backoff). Once a snapshot has failed
/// [`max_attempts`](RetryPolicy::max_attempts) times it is dropped and the
/// drop is surfaced via [`FlushTotals`] and an error log; retrying forever
/// would let a dead backend grow memory without bound.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Total delivery attempts per snapshot, including the first.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        assert!(max_attempts > 0, "at least one delivery attempt is required");
        self.max_attempts = max_attempts;
        self
    }

    /// Backoff before the second attempt; doubles per round after that.
    pub fn initial_backoff(mut self, initial_backoff: Duration) -> Self {
        assert!(initial_backoff > Duration::ZERO);
        self.initial_backoff = initial_backoff;
        self
    }

    /// Upper bound on the backoff between rounds.
    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        assert!(max_backoff > Duration::ZERO);
        self.max_backoff = max_backoff;
        self
    }

    fn attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff(&self, failed_attempts: u32) -> Duration {
        let doublings = failed_attempts.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }
}

/// Flush pipeline counters, readable at any time via
/// [`Turnstile::flush_stats`](crate::Turnstile::flush_stats).
///
/// `snapshots_dropped` and `windows_dropped` are the data-loss signals an
/// operator should alarm on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushTotals {
    /// Snapshots acknowledged by the persistence backend.
    pub snapshots_persisted: u64,
    /// Snapshot delivery attempts that were retried after a failure.
    pub snapshots_retried: u64,
    /// Snapshots abandoned after exhausting the retry budget.
    pub snapshots_dropped: u64,
    /// Closed windows handed to the pipeline.
    pub windows_flushed: u64,
    /// Closed windows dropped whole (full queue or shutdown deadline).
    pub windows_dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct FlushStats {
    snapshots_persisted: AtomicU64,
    snapshots_retried: AtomicU64,
    snapshots_dropped: AtomicU64,
    windows_flushed: AtomicU64,
    windows_dropped: AtomicU64,
}

impl FlushStats {
    pub(crate) fn totals(&self) -> FlushTotals {
        FlushTotals {
            snapshots_persisted: self.snapshots_persisted.load(Ordering::Relaxed),
            snapshots_retried: self.snapshots_retried.load(Ordering::Relaxed),
            snapshots_dropped: self.snapshots_dropped.load(Ordering::Relaxed),
            windows_flushed: self.windows_flushed.load(Ordering::Relaxed),
            windows_dropped: self.windows_dropped.load(Ordering::Relaxed),
        }
    }

    fn add(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn window_dropped(&self) {
        Self::add(&self.windows_dropped, 1);
    }
}

/// Future returned by [`Turnstile::flush_async`](crate::Turnstile::flush_async).
///
/// Resolves once everything enqueued before the call has been delivered to
/// the backend or dropped. Also resolves immediately if the pipeline has
/// already shut down.
#[must_use = "future does nothing unless polled"]
pub struct FlushWait(oneshot::Receiver<()>);

impl FlushWait {
    pub(crate) fn new(receiver: oneshot::Receiver<()>) -> Self {
        Self(receiver)
    }
}

impl Future for FlushWait {
    type Output = ();

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        // a dropped sender (worker gone) counts as flushed
        std::pin::Pin::new(&mut self.0).poll(cx).map(|_| ())
    }
}

/// Hand a closed window to the worker without ever blocking the caller.
///
/// A full queue means the backend has fallen far behind; the window is
/// dropped whole and the loss is surfaced, because making rollover wait on
/// persistence is the one thing this pipeline must never do.
pub(crate) fn enqueue(tx: &SyncSender<Message>, closed: ClosedWindow, stats: &FlushStats) {
    let metric = closed.metric.name;
    match tx.try_send(Message::Window(closed)) {
        Ok(()) => {}
        Err(err) => {
            stats.window_dropped();
            let reason = match err {
                TrySendError::Full(_) => "flush queue is full",
                TrySendError::Disconnected(_) => "flush worker has shut down",
            };
            tracing::error!(metric, reason, "dropping a closed window");
        }
    }
}

pub(crate) fn spawn(
    persister: Arc<dyn Persist>,
    retry: RetryPolicy,
    stats: Arc<FlushStats>,
    queue_capacity: usize,
    shutdown_timeout: Duration,
) -> (SyncSender<Message>, thread::JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::sync_channel(queue_capacity);
    let worker = FlushWorker {
        rx,
        persister,
        retry,
        stats,
        shutdown_timeout,
    };
    let handle = thread::Builder::new()
        .name("turnstile-flush".into())
        .spawn(move || worker.run())
        .unwrap();
    (tx, handle)
}

struct FlushWorker {
    rx: Receiver<Message>,
    persister: Arc<dyn Persist>,
    retry: RetryPolicy,
    stats: Arc<FlushStats>,
    shutdown_timeout: Duration,
}

impl FlushWorker {
    fn run(self) {
        tracing::debug!("flush worker started");
        while let Ok(message) = self.rx.recv() {
            match message {
                Message::Window(closed) => self.deliver(closed, None),
                // FIFO: everything enqueued before this marker has been
                // delivered or dropped by the time we see it
                Message::Flush(done) => {
                    let _ = done.send(());
                }
                Message::Shutdown => return self.drain(),
            }
        }
        tracing::debug!("all senders dropped, flush worker stopped");
    }

    /// Drain whatever is already queued, bounded by the shutdown timeout.
    fn drain(self) {
        let deadline = Instant::now() + self.shutdown_timeout;
        let mut abandoned = 0u64;
        while let Ok(message) = self.rx.try_recv() {
            match message {
                Message::Window(closed) => {
                    if Instant::now() < deadline {
                        self.deliver(closed, Some(deadline));
                    } else {
                        abandoned += 1;
                        self.stats.window_dropped();
                    }
                }
                Message::Flush(done) => {
                    let _ = done.send(());
                }
                Message::Shutdown => {}
            }
        }
        if abandoned > 0 {
            tracing::warn!(
                windows = abandoned,
                "shutdown deadline passed before all closed windows were persisted"
            );
        }
        tracing::info!("flush worker shut down");
    }

    fn deliver(&self, closed: ClosedWindow, deadline: Option<Instant>) {
        let mut pending = snapshots(&closed);
        if pending.is_empty() {
            return;
        }
        FlushStats::add(&self.stats.windows_flushed, 1);
        let total = pending.len();
        let window_start = closed.map.window().start();
        let mut failed_attempts = 0u32;

        loop {
            let mut failed = Vec::new();
            let mut last_error = None;
            for snapshot in pending {
                match self.persister.persist(&snapshot) {
                    Ok(()) => FlushStats::add(&self.stats.snapshots_persisted, 1),
                    Err(err) => {
                        last_error = Some(err);
                        failed.push(snapshot);
                    }
                }
            }
            let Some(err) = last_error else { return };

            failed_attempts += 1;
            if failed_attempts >= self.retry.attempts() {
                FlushStats::add(&self.stats.snapshots_dropped, failed.len() as u64);
                tracing::error!(
                    metric = closed.metric.name,
                    %err,
                    dropped = failed.len(),
                    of = total,
                    ?window_start,
                    "dropping snapshots after exhausting the retry budget"
                );
                return;
            }

            let backoff = self.retry.backoff(failed_attempts);
            if let Some(deadline) = deadline {
                if Instant::now() + backoff >= deadline {
                    FlushStats::add(&self.stats.snapshots_dropped, failed.len() as u64);
                    tracing::warn!(
                        metric = closed.metric.name,
                        dropped = failed.len(),
                        "shutdown deadline cut the retry budget short"
                    );
                    return;
                }
            }

            FlushStats::add(&self.stats.snapshots_retried, failed.len() as u64);
            tracing::debug!(
                metric = closed.metric.name,
                %err,
                failed = failed.len(),
                attempt = failed_attempts,
                "persist attempt failed, backing off"
            );
            thread::sleep(backoff);
            pending = failed;
        }
    }
}

/// Convert a retired window map into one snapshot per touched combination.
fn snapshots(closed: &ClosedWindow) -> Vec<TrackerDataSnapshot> {
    let metric = &closed.metric;
    let window = closed.map.window();
    let mut out = Vec::with_capacity(closed.map.len());
    closed.map.for_each_record(|key, record| {
        let fields: Vec<_> = metric
            .fields
            .iter()
            .enumerate()
            .filter_map(|(i, def)| {
                let raw = record.load(i);
                (raw > 0).then(|| (def.name(), decode(def.kind(), raw)))
            })
            .collect();
        if !fields.is_empty() {
            out.push(TrackerDataSnapshot::new(
                metric.name,
                metric.description,
                window,
                key.clone(),
                fields,
            ));
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let retry = RetryPolicy::default()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(350));
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(350));
        assert_eq!(retry.backoff(30), Duration::from_millis(350));
    }

    #[test]
    #[should_panic]
    fn zero_attempts_is_rejected() {
        let _ = RetryPolicy::default().max_attempts(0);
    }
}
