// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The engine's public face: the [`Turnstile`] context, its builder, and the
//! increment API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_utils::sync::Unparker;
use smallvec::SmallVec;
use tokio::sync::oneshot;
use turnstile_core::{
    FieldValue, Filter, Persist, TrackError, Trackable, DEFAULT_FIELD,
};

use crate::clock::{Clock, SystemClock};
use crate::flush::{self, FlushStats, FlushTotals, FlushWait, Message, RetryPolicy};
use crate::index;
use crate::registry::MetricRegistry;
use crate::rollover;

/// The process-wide tracking context.
///
/// Owns the metric registry and the handles into the rollover scheduler and
/// flush pipeline. Cheap to clone; all clones share the same counters. There
/// is deliberately no hidden global instance — construct one at startup,
/// pass it where increments happen, and drop the [`TurnstileHandle`] at
/// shutdown to drain what remains.
///
/// All increment operations validate their input first and fail without any
/// partial effect; a successful call has applied its delta to every
/// combination of the filter exactly once before returning. Increments never
/// block on I/O.
#[derive(Clone)]
pub struct Turnstile {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<MetricRegistry>,
    tx: SyncSender<Message>,
    stats: Arc<FlushStats>,
}

impl Turnstile {
    /// Build an engine with default tuning. See [`TurnstileBuilder`].
    pub fn new(persister: impl Persist) -> (Self, TurnstileHandle) {
        Self::builder().build(persister)
    }

    /// Start configuring an engine.
    pub fn builder() -> TurnstileBuilder {
        TurnstileBuilder::default()
    }

    /// Add `delta` to the metric's implicit [`DEFAULT_FIELD`] counter, under
    /// every combination of the filter (`None` means the empty filter: only
    /// the global total is incremented).
    pub fn increment_default(
        &self,
        metric: &dyn Trackable,
        filter: Option<&Filter>,
        delta: u64,
    ) -> Result<(), TrackError> {
        self.apply(metric, filter, &[(DEFAULT_FIELD, FieldValue::Count(delta))])
    }

    /// Add a value to one named field of the metric, under every combination
    /// of the filter.
    ///
    /// The value must match the field's declared kind: a `u64` for counter
    /// fields, a [`Duration`] for duration fields.
    pub fn increment_field(
        &self,
        metric: &dyn Trackable,
        filter: Option<&Filter>,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), TrackError> {
        self.apply(metric, filter, &[(field, value.into())])
    }

    /// Record several fields of one metric against one filter in a single
    /// call:
    ///
    /// ```rust,ignore
    /// turnstile
    ///     .entry(&RequestLatency)
    ///     .filter(&filter)
    ///     .add("Calls", 1)
    ///     .add("TotalTime", elapsed)
    ///     .record()?;
    /// ```
    ///
    /// The filter is expanded once and every add is validated before any
    /// counter is touched.
    pub fn entry<'a>(&'a self, metric: &'a dyn Trackable) -> Entry<'a> {
        Entry {
            turnstile: self,
            metric,
            filter: None,
            adds: SmallVec::new(),
        }
    }

    /// Wait for everything already handed to the flush pipeline to reach the
    /// backend (or be dropped).
    ///
    /// Does not close the currently open windows — those belong to their
    /// time interval until the scheduler rolls them. In synchronous code,
    /// wait with `futures::executor::block_on`.
    pub fn flush_async(&self) -> FlushWait {
        let (done, wait) = oneshot::channel();
        // a send error means the worker is gone; the dropped sender resolves
        // the wait immediately
        let _ = self.inner.tx.send(Message::Flush(done));
        FlushWait::new(wait)
    }

    /// Current flush pipeline counters.
    pub fn flush_stats(&self) -> FlushTotals {
        self.inner.stats.totals()
    }

    /// Close every window whose boundary has passed, returning how many
    /// non-empty windows were handed to the flush pipeline.
    ///
    /// The background scheduler does this continuously; calling it by hand
    /// is only useful with [`TurnstileBuilder::background_rollover`] disabled
    /// (deterministic tests, externally-driven tick loops).
    pub fn run_pending_rollovers(&self) -> usize {
        let (closed, _) = self.inner.registry.roll_due(self.inner.registry.now());
        let count = closed.len();
        for window in closed {
            flush::enqueue(&self.inner.tx, window, &self.inner.stats);
        }
        count
    }

    fn apply(
        &self,
        metric: &dyn Trackable,
        filter: Option<&Filter>,
        adds: &[(&str, FieldValue)],
    ) -> Result<(), TrackError> {
        let registered = self.inner.registry.resolve(metric)?;

        // resolve and validate everything up front so a failure leaves no
        // partial effect
        let mut resolved: SmallVec<[(usize, u64); 4]> = SmallVec::new();
        for (field, value) in adds {
            let Some(idx) = registered.field_index(field) else {
                return Err(TrackError::UnknownField {
                    metric: registered.name,
                    field: (*field).to_owned(),
                });
            };
            if registered.fields[idx].kind() != value.kind() {
                return Err(TrackError::FieldKindMismatch {
                    metric: registered.name,
                    field: (*field).to_owned(),
                    expected: registered.fields[idx].kind(),
                });
            }
            resolved.push((idx, index::encode(*value)));
        }

        let empty;
        let filter = match filter {
            Some(filter) => filter,
            None => {
                empty = Filter::new();
                &empty
            }
        };
        let keys = filter.combinations()?;
        registered.apply(&keys, &resolved);
        Ok(())
    }
}

/// A multi-field increment in the making. See [`Turnstile::entry`].
#[must_use = "increments are only applied by `record()`"]
pub struct Entry<'a> {
    turnstile: &'a Turnstile,
    metric: &'a dyn Trackable,
    filter: Option<&'a Filter>,
    adds: SmallVec<[(&'a str, FieldValue); 4]>,
}

impl<'a> Entry<'a> {
    /// Tag the increment with a dimensional filter.
    pub fn filter(mut self, filter: &'a Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Queue a value for one named field.
    pub fn add(mut self, field: &'a str, value: impl Into<FieldValue>) -> Self {
        self.adds.push((field, value.into()));
        self
    }

    /// Queue `delta` for the implicit [`DEFAULT_FIELD`] counter.
    pub fn count(self, delta: u64) -> Self {
        self.add(DEFAULT_FIELD, delta)
    }

    /// Validate and apply all queued adds. Fails without partial effect.
    pub fn record(self) -> Result<(), TrackError> {
        self.turnstile.apply(self.metric, self.filter, &self.adds)
    }
}

/// Tuning for a [`Turnstile`] engine. Obtained via [`Turnstile::builder`].
pub struct TurnstileBuilder {
    retry: RetryPolicy,
    queue_capacity: usize,
    shutdown_timeout: Duration,
    clock: Arc<dyn Clock>,
    background_rollover: bool,
}

impl Default for TurnstileBuilder {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            queue_capacity: 1024,
            shutdown_timeout: Duration::from_secs(30),
            clock: Arc::new(SystemClock),
            background_rollover: true,
        }
    }
}

impl TurnstileBuilder {
    /// Retry behavior for failing persistence attempts.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// How many closed windows may wait for the backend before further
    /// windows are dropped whole (and counted). Defaults to 1024.
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        assert!(queue_capacity > 0);
        self.queue_capacity = queue_capacity;
        self
    }

    /// How long shutdown will keep delivering queued windows before giving
    /// up and reporting the remainder. Defaults to 30 seconds.
    pub fn shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        assert!(shutdown_timeout > Duration::ZERO);
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Replace the wall clock windows are aligned against.
    ///
    /// Meant for tests (see [`ManualClock`](crate::clock::ManualClock));
    /// production engines keep the default [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether to spawn the background rollover scheduler. Defaults to true.
    ///
    /// Disable only when something else drives
    /// [`Turnstile::run_pending_rollovers`], e.g. deterministic tests with a
    /// manual clock.
    pub fn background_rollover(mut self, background_rollover: bool) -> Self {
        self.background_rollover = background_rollover;
        self
    }

    /// Spawn the engine's background threads and hand over the persister.
    ///
    /// Returns the cloneable engine plus the [`TurnstileHandle`] that drains
    /// and joins everything when dropped.
    pub fn build(self, persister: impl Persist) -> (Turnstile, TurnstileHandle) {
        let stats = Arc::new(FlushStats::default());
        let registry = Arc::new(MetricRegistry::new(self.clock));
        let (tx, worker) = flush::spawn(
            Arc::new(persister),
            self.retry,
            Arc::clone(&stats),
            self.queue_capacity,
            self.shutdown_timeout,
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let (scheduler, unparker) = if self.background_rollover {
            let (handle, unparker) = rollover::spawn(
                Arc::clone(&registry),
                tx.clone(),
                Arc::clone(&stats),
                Arc::clone(&shutdown),
            );
            registry.set_unparker(unparker.clone());
            (Some(handle), Some(unparker))
        } else {
            (None, None)
        };

        let turnstile = Turnstile {
            inner: Arc::new(Inner {
                registry: Arc::clone(&registry),
                tx: tx.clone(),
                stats: Arc::clone(&stats),
            }),
        };
        let handle = TurnstileHandle {
            registry,
            tx,
            stats,
            shutdown,
            unparker,
            scheduler,
            worker: Some(worker),
        };
        (turnstile, handle)
    }
}

/// Join guard for the engine's background threads.
///
/// Dropping it (or calling [`shut_down`](TurnstileHandle::shut_down)) stops
/// the rollover scheduler, closes the currently open windows so their counts
/// are not lost, and drains the flush pipeline within the configured
/// shutdown timeout, reporting anything left undelivered. Increments issued
/// after shutdown still succeed but accumulate into windows nothing will
/// ever flush.
pub struct TurnstileHandle {
    registry: Arc<MetricRegistry>,
    tx: SyncSender<Message>,
    stats: Arc<FlushStats>,
    shutdown: Arc<AtomicBool>,
    unparker: Option<Unparker>,
    scheduler: Option<thread::JoinHandle<()>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl TurnstileHandle {
    /// Alias for `drop(handle)`: drain the pipeline and join the background
    /// threads.
    pub fn shut_down(self) {}

    /// Let the background threads run for the lifetime of the process
    /// instead of joining them. Nothing will drain the pipeline at exit —
    /// only use this when losing the final partial windows is acceptable.
    pub fn forget(mut self) {
        self.scheduler = None;
        self.worker = None;
    }
}

impl Drop for TurnstileHandle {
    fn drop(&mut self) {
        if self.scheduler.is_none() && self.worker.is_none() {
            return; // forgotten
        }

        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(unparker) = &self.unparker {
            unparker.unpark();
        }
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.join().unwrap();
        }

        // the open windows still hold counts; close them out
        let now = self.registry.now();
        for window in self.registry.close_all(now) {
            flush::enqueue(&self.tx, window, &self.stats);
        }

        if let Some(worker) = self.worker.take() {
            tracing::info!("draining flush pipeline for shutdown");
            let _ = self.tx.send(Message::Shutdown);
            worker.join().unwrap();
        }
    }
}
