// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The metric registry: one slot per metric type, holding its schema and the
//! reference to its current window.
//!
//! Registration happens lazily on the first increment of a metric type and is
//! idempotent per name. The slot's `current` reference is the engine's single
//! synchronization point between writers and rollover: writers pin the window
//! with a shared lock for the duration of one increment call, and the
//! scheduler swaps the reference under the exclusive lock, so every call
//! lands entirely in one window and a swapped-out map can never see another
//! write.

use std::sync::{Arc, OnceLock, RwLock};
use std::time::SystemTime;

use crossbeam_utils::sync::Unparker;
use turnstile_core::{
    CombinationKey, FieldDef, Resolution, TimeWindow, TrackError, Trackable, DEFAULT_FIELD,
};

use crate::clock::Clock;
use crate::flush::ClosedWindow;
use crate::index::WindowMap;

/// A registered metric type: immutable schema plus the live window slot.
pub(crate) struct RegisteredMetric {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) resolution: Resolution,
    /// Field 0 is always the implicit [`DEFAULT_FIELD`] counter.
    pub(crate) fields: Box<[FieldDef]>,
    current: RwLock<Arc<WindowMap>>,
}

impl RegisteredMetric {
    pub(crate) fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name() == name)
    }

    /// Apply one increment call to the current window.
    ///
    /// The shared lock is held across the whole application, which is what
    /// guarantees a concurrent rollover waits for the call to finish rather
    /// than splitting it across two windows.
    pub(crate) fn apply(&self, keys: &[CombinationKey], adds: &[(usize, u64)]) {
        let window = self.current.read().unwrap();
        window.apply(keys, adds);
    }

    pub(crate) fn current_window(&self) -> TimeWindow {
        self.current.read().unwrap().window()
    }

    /// Swap in a fresh window aligned at `now` and return the retired map.
    ///
    /// Taking the exclusive lock waits out in-flight writers; the swap itself
    /// is a single reference replacement. The returned map is unreachable
    /// from writers and therefore immutable.
    pub(crate) fn roll(&self, now: SystemTime) -> Arc<WindowMap> {
        let fresh = Arc::new(WindowMap::new(
            TimeWindow::containing(self.resolution, now),
            self.fields.len(),
        ));
        let mut current = self.current.write().unwrap();
        std::mem::replace(&mut *current, fresh)
    }
}

/// All registered metric types, keyed by name.
pub(crate) struct MetricRegistry {
    clock: Arc<dyn Clock>,
    metrics: RwLock<hashbrown::HashMap<&'static str, Arc<RegisteredMetric>>>,
    /// Wakes the rollover scheduler when a new metric (with a possibly nearer
    /// boundary) registers. Set once the scheduler thread exists.
    unparker: OnceLock<Unparker>,
}

impl MetricRegistry {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            metrics: RwLock::new(hashbrown::HashMap::new()),
            unparker: OnceLock::new(),
        }
    }

    pub(crate) fn now(&self) -> SystemTime {
        self.clock.now()
    }

    pub(crate) fn set_unparker(&self, unparker: Unparker) {
        let _ = self.unparker.set(unparker);
    }

    /// Look up a metric type, registering it on first use.
    pub(crate) fn resolve(
        &self,
        metric: &dyn Trackable,
    ) -> Result<Arc<RegisteredMetric>, TrackError> {
        let name = metric.name();
        if let Some(existing) = self.metrics.read().unwrap().get(name) {
            verify_unchanged(existing, metric)?;
            return Ok(Arc::clone(existing));
        }

        let fields = validated_schema(metric)?;
        let window = TimeWindow::containing(metric.min_resolution(), self.clock.now());
        let registered = Arc::new(RegisteredMetric {
            name,
            description: metric.description(),
            resolution: metric.min_resolution(),
            current: RwLock::new(Arc::new(WindowMap::new(window, fields.len()))),
            fields,
        });

        let registered = Arc::clone(
            self.metrics
                .write()
                .unwrap()
                .entry(name)
                .or_insert(registered),
        );
        // lost the race to another registration of the same name
        verify_unchanged(&registered, metric)?;

        tracing::debug!(metric = name, resolution = ?registered.resolution, "registered metric type");
        if let Some(unparker) = self.unparker.get() {
            unparker.unpark();
        }
        Ok(registered)
    }

    /// Close every window whose end has passed, returning the retired
    /// non-empty maps and the earliest upcoming boundary.
    ///
    /// A metric whose boundary passed more than once while nobody was looking
    /// (a stalled process) rolls straight to the window containing `now`;
    /// the intermediate empty windows are never fabricated.
    pub(crate) fn roll_due(
        &self,
        now: SystemTime,
    ) -> (Vec<ClosedWindow>, Option<SystemTime>) {
        let metrics: Vec<Arc<RegisteredMetric>> =
            self.metrics.read().unwrap().values().cloned().collect();

        let mut closed = Vec::new();
        let mut next_boundary: Option<SystemTime> = None;
        for metric in metrics {
            let mut end = metric.current_window().end();
            if end <= now {
                let retired = metric.roll(now);
                end = metric.current_window().end();
                if !retired.is_empty() {
                    closed.push(ClosedWindow {
                        metric: Arc::clone(&metric),
                        map: retired,
                    });
                }
            }
            next_boundary = Some(next_boundary.map_or(end, |boundary| boundary.min(end)));
        }
        (closed, next_boundary)
    }

    /// Close every current window regardless of its boundary (shutdown path),
    /// returning the non-empty maps.
    pub(crate) fn close_all(&self, now: SystemTime) -> Vec<ClosedWindow> {
        let metrics: Vec<Arc<RegisteredMetric>> =
            self.metrics.read().unwrap().values().cloned().collect();

        metrics
            .into_iter()
            .filter_map(|metric| {
                let retired = metric.roll(now);
                (!retired.is_empty()).then(|| ClosedWindow {
                    metric: Arc::clone(&metric),
                    map: retired,
                })
            })
            .collect()
    }
}

fn validated_schema(metric: &dyn Trackable) -> Result<Box<[FieldDef]>, TrackError> {
    let custom = metric.fields();
    let invalid = |reason: String| TrackError::InvalidSchema {
        metric: metric.name(),
        reason,
    };

    for (i, field) in custom.iter().enumerate() {
        if field.name().is_empty() {
            return Err(invalid("empty field name".into()));
        }
        if field.name() == DEFAULT_FIELD {
            return Err(invalid(format!(
                "`{DEFAULT_FIELD}` is reserved for the implicit counter"
            )));
        }
        if custom[..i].iter().any(|f| f.name() == field.name()) {
            return Err(invalid(format!("duplicate field `{}`", field.name())));
        }
    }

    let mut fields = Vec::with_capacity(custom.len() + 1);
    fields.push(FieldDef::counter(DEFAULT_FIELD));
    fields.extend_from_slice(custom);
    Ok(fields.into_boxed_slice())
}

fn verify_unchanged(
    registered: &RegisteredMetric,
    metric: &dyn Trackable,
) -> Result<(), TrackError> {
    if registered.resolution != metric.min_resolution()
        || registered.fields[1..] != *metric.fields()
    {
        return Err(TrackError::SchemaMismatch {
            metric: registered.name,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use crate::clock::ManualClock;

    use super::*;

    struct Visits;

    impl Trackable for Visits {
        fn name(&self) -> &'static str {
            "Visits"
        }
        fn description(&self) -> &'static str {
            "counts visits"
        }
        fn min_resolution(&self) -> Resolution {
            Resolution::Minute
        }
    }

    struct VisitsHourly;

    impl Trackable for VisitsHourly {
        fn name(&self) -> &'static str {
            "Visits"
        }
        fn description(&self) -> &'static str {
            "counts visits"
        }
        fn min_resolution(&self) -> Resolution {
            Resolution::Hour
        }
    }

    struct BrokenSchema;

    impl Trackable for BrokenSchema {
        fn name(&self) -> &'static str {
            "Broken"
        }
        fn description(&self) -> &'static str {
            ""
        }
        fn min_resolution(&self) -> Resolution {
            Resolution::Minute
        }
        fn fields(&self) -> &'static [FieldDef] {
            const FIELDS: &[FieldDef] = &[FieldDef::counter("A"), FieldDef::duration("A")];
            FIELDS
        }
    }

    fn registry() -> MetricRegistry {
        MetricRegistry::new(Arc::new(ManualClock::starting_at(
            UNIX_EPOCH + Duration::from_secs(90),
        )))
    }

    #[test]
    fn registration_is_lazy_and_idempotent() {
        let registry = registry();
        let first = registry.resolve(&Visits).unwrap();
        let second = registry.resolve(&Visits).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        // implicit count field plus no custom fields
        assert_eq!(first.fields.len(), 1);
        assert_eq!(first.field_index(DEFAULT_FIELD), Some(0));
    }

    #[test]
    fn first_window_is_aligned_to_the_resolution() {
        let registry = registry();
        let metric = registry.resolve(&Visits).unwrap();
        let window = metric.current_window();
        assert_eq!(window.start(), UNIX_EPOCH + Duration::from_secs(60));
        assert_eq!(window.end(), UNIX_EPOCH + Duration::from_secs(120));
    }

    #[test]
    fn conflicting_reregistration_is_rejected() {
        let registry = registry();
        registry.resolve(&Visits).unwrap();
        assert!(matches!(
            registry.resolve(&VisitsHourly),
            Err(TrackError::SchemaMismatch { metric: "Visits" })
        ));
    }

    #[test]
    fn malformed_schemas_are_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.resolve(&BrokenSchema),
            Err(TrackError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn roll_due_skips_missed_intervals() {
        let clock = Arc::new(ManualClock::starting_at(UNIX_EPOCH + Duration::from_secs(90)));
        let registry = MetricRegistry::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let metric = registry.resolve(&Visits).unwrap();
        metric.apply(&[CombinationKey::empty()], &[(0, 1)]);

        // stall across many boundaries
        clock.advance(Duration::from_secs(600));
        let now = clock.now();
        let (closed, next) = registry.roll_due(now);

        assert_eq!(closed.len(), 1);
        assert_eq!(
            closed[0].map.window().start(),
            UNIX_EPOCH + Duration::from_secs(60)
        );
        // resumed at the boundary containing `now`, no fabricated windows
        assert_eq!(
            metric.current_window().start(),
            UNIX_EPOCH + Duration::from_secs(660)
        );
        assert_eq!(next, Some(UNIX_EPOCH + Duration::from_secs(720)));
    }

    #[test]
    fn empty_windows_are_not_handed_off() {
        let clock = Arc::new(ManualClock::starting_at(UNIX_EPOCH));
        let registry = MetricRegistry::new(Arc::clone(&clock) as Arc<dyn Clock>);
        registry.resolve(&Visits).unwrap();
        clock.advance(Duration::from_secs(120));
        let (closed, _) = registry.roll_due(clock.now());
        assert!(closed.is_empty());
    }
}
