// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Flush pipeline behavior: bounded retry, surfaced drops, drain on
//! shutdown, and at-least-once delivery safety.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::executor::block_on;
use turnstile::test_util::TestPersister;
use turnstile::{
    CombinationKey, FieldValue, Filter, ManualClock, Persist, Resolution, RetryPolicy, TimeWindow,
    Trackable, TrackerDataSnapshot, Turnstile, TurnstileHandle,
};

struct Visits;

impl Trackable for Visits {
    fn name(&self) -> &'static str {
        "Visits"
    }
    fn description(&self) -> &'static str {
        "Counts customer visits"
    }
    fn min_resolution(&self) -> Resolution {
        Resolution::Minute
    }
}

fn at(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn engine(
    retry: RetryPolicy,
) -> (Turnstile, TurnstileHandle, Arc<ManualClock>, TestPersister) {
    let clock = Arc::new(ManualClock::starting_at(at(30)));
    let persister = TestPersister::new();
    let (turnstile, handle) = Turnstile::builder()
        .clock(clock.clone())
        .background_rollover(false)
        .retry_policy(retry)
        .build(persister.clone());
    (turnstile, handle, clock, persister)
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .max_attempts(max_attempts)
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(4))
}

#[test]
fn a_flaky_persister_receives_exactly_one_snapshot() {
    let (turnstile, handle, clock, persister) = engine(fast_retry(5));

    turnstile.increment_default(&Visits, None, 1).unwrap();
    clock.advance(Duration::from_secs(60));

    // fails the first two attempts, succeeds on the third
    persister.fail_times(2);
    turnstile.run_pending_rollovers();
    block_on(turnstile.flush_async());

    assert_eq!(persister.attempts(), 3);
    assert_eq!(persister.delivered().len(), 1);

    let stats = turnstile.flush_stats();
    assert_eq!(stats.snapshots_persisted, 1);
    assert_eq!(stats.snapshots_retried, 2);
    assert_eq!(stats.snapshots_dropped, 0);

    handle.shut_down();
}

#[test]
fn exhausted_retries_drop_the_snapshot_and_surface_it() {
    let (turnstile, handle, clock, persister) = engine(fast_retry(3));

    turnstile.increment_default(&Visits, None, 1).unwrap();
    clock.advance(Duration::from_secs(60));

    persister.fail_times(3);
    turnstile.run_pending_rollovers();
    block_on(turnstile.flush_async());

    assert_eq!(persister.attempts(), 3);
    assert!(persister.delivered().is_empty());
    assert_eq!(turnstile.flush_stats().snapshots_dropped, 1);

    // the pipeline is still healthy for the next window
    turnstile.increment_default(&Visits, None, 2).unwrap();
    clock.advance(Duration::from_secs(60));
    turnstile.run_pending_rollovers();
    block_on(turnstile.flush_async());

    assert_eq!(persister.delivered().len(), 1);
    assert_eq!(
        persister.delivered()[0].field("Count"),
        Some(FieldValue::Count(2))
    );

    handle.shut_down();
}

#[test]
fn one_failing_snapshot_does_not_block_its_siblings() {
    let (turnstile, handle, clock, persister) = engine(fast_retry(5));

    let filter = Filter::new().with("State", "CA");
    turnstile
        .increment_default(&Visits, Some(&filter), 1)
        .unwrap();
    clock.advance(Duration::from_secs(60));

    // two snapshots in the window; exactly one attempt fails
    persister.fail_times(1);
    turnstile.run_pending_rollovers();
    block_on(turnstile.flush_async());

    assert_eq!(persister.delivered().len(), 2);
    assert_eq!(persister.attempts(), 3);
    let stats = turnstile.flush_stats();
    assert_eq!(stats.snapshots_persisted, 2);
    assert_eq!(stats.snapshots_retried, 1);
    assert_eq!(stats.snapshots_dropped, 0);

    handle.shut_down();
}

#[test]
fn windows_of_one_key_are_delivered_oldest_first() {
    let (turnstile, handle, clock, persister) = engine(fast_retry(3));

    turnstile.increment_default(&Visits, None, 1).unwrap();
    clock.advance(Duration::from_secs(60));
    turnstile.run_pending_rollovers();

    turnstile.increment_default(&Visits, None, 1).unwrap();
    clock.advance(Duration::from_secs(60));
    turnstile.run_pending_rollovers();

    block_on(turnstile.flush_async());

    let delivered = persister.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(delivered[0].window().start() < delivered[1].window().start());

    handle.shut_down();
}

#[test]
fn shutdown_closes_open_windows_and_drains() {
    let (turnstile, handle, _clock, persister) = engine(fast_retry(3));

    turnstile.increment_default(&Visits, None, 7).unwrap();
    // no rollover: the window is still open when the handle drops
    handle.shut_down();

    let snapshot = persister
        .find("Visits", &CombinationKey::empty())
        .expect("open window was flushed on shutdown");
    assert_eq!(snapshot.field("Count"), Some(FieldValue::Count(7)));
    assert_eq!(turnstile.flush_stats().windows_flushed, 1);
}

#[test]
fn flush_resolves_even_after_shutdown() {
    let (turnstile, handle, _clock, _persister) = engine(fast_retry(3));
    handle.shut_down();
    // the worker is gone; the wait must resolve rather than hang
    block_on(turnstile.flush_async());
}

#[tokio::test]
async fn flush_can_be_awaited_from_async_code() {
    let (turnstile, handle, clock, persister) = engine(fast_retry(3));

    turnstile.increment_default(&Visits, None, 1).unwrap();
    clock.advance(Duration::from_secs(60));
    turnstile.run_pending_rollovers();

    turnstile.flush_async().await;
    assert_eq!(persister.delivered().len(), 1);

    handle.shut_down();
}

#[test]
fn duplicate_delivery_is_merge_safe_at_the_backend() {
    // simulates the ambiguous-failure case: the backend stored the snapshot
    // but the engine saw an error and retried
    let persister = TestPersister::new();
    let snapshot = TrackerDataSnapshot::new(
        "Visits",
        "Counts customer visits",
        TimeWindow::containing(Resolution::Minute, at(30)),
        CombinationKey::empty(),
        vec![("Count", FieldValue::Count(4))],
    );

    persister.persist(&snapshot).unwrap();
    persister.persist(&snapshot).unwrap();

    assert_eq!(persister.delivered().len(), 2);
    let merged = persister.merged();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].field("Count"), Some(FieldValue::Count(4)));
}
