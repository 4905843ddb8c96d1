//! Change detection: compare a fresh capacity result against the last
//! persisted one and decide whether the transition deserves an alert.
//!
//! [`reconcile`] is the pure decision. [`Reconciler`] wraps it with the
//! read-modify-write against a [`HistoryStore`], serialized per event id.

use crate::store::HistoryStore;
use crate::types::{AlertReason, CapacityAlert, CapacityResult, EventRef, WatchError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Coarse capacity state of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityState {
    /// Registered count or limit is missing.
    Unknown,
    Normal,
    NearFull,
    Over,
}

/// Near-full sensitivity. Whichever threshold triggers first wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Remaining spots at or below which an event is near full.
    pub near_full_absolute: u32,
    /// Remaining spots as a percent of the limit, 0 to 100.
    pub near_full_percentage: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            near_full_absolute: 3,
            near_full_percentage: 10.0,
        }
    }
}

/// Classify a result against the thresholds.
pub fn classify(result: &CapacityResult, thresholds: &Thresholds) -> CapacityState {
    let (Some(limit), Some(remaining)) = (result.limit, result.remaining) else {
        return CapacityState::Unknown;
    };
    if remaining < 0 {
        return CapacityState::Over;
    }
    if remaining <= i64::from(thresholds.near_full_absolute) {
        return CapacityState::NearFull;
    }
    if limit > 0 && (remaining as f64) * 100.0 / f64::from(limit) <= thresholds.near_full_percentage {
        return CapacityState::NearFull;
    }
    CapacityState::Normal
}

/// Decide the alert, if any, for a transition from `prior` to `new`.
///
/// The first matching reason wins, so at most one alert is raised.
pub fn decide_alert(
    new: &CapacityResult,
    prior: Option<&CapacityResult>,
    thresholds: &Thresholds,
) -> Option<AlertReason> {
    let new_state = classify(new, thresholds);
    let prior_state = prior.map(|p| classify(p, thresholds));

    if prior.is_some_and(|p| p.registered.is_some() || p.limit.is_some()) && new.has_no_numbers() {
        return Some(AlertReason::LimitDisappeared);
    }
    if new_state == CapacityState::Over && prior_state != Some(CapacityState::Over) {
        return Some(AlertReason::NewlyOverCapacity);
    }
    if new.waitlist().is_active() && !prior.is_some_and(|p| p.waitlist().is_active()) {
        return Some(AlertReason::WaitlistStarted);
    }
    if new_state != CapacityState::Unknown
        && prior.is_some_and(|p| p.has_no_numbers() || p.header_empty)
    {
        return Some(AlertReason::LimitAppeared);
    }
    if new_state == CapacityState::NearFull
        && (prior_state != Some(CapacityState::NearFull)
            || prior.is_some_and(|p| !p.same_numbers(new)))
    {
        return Some(AlertReason::StillNearFull);
    }
    None
}

/// Pure reconciliation: the state to persist and the alert to emit.
///
/// The updated state is always `new_result`.
pub fn reconcile(
    event: &EventRef,
    new_result: CapacityResult,
    prior: Option<&CapacityResult>,
    thresholds: &Thresholds,
) -> (CapacityResult, Option<CapacityAlert>) {
    let alert = decide_alert(&new_result, prior, thresholds)
        .map(|reason| CapacityAlert::new(event, new_result.clone(), reason));
    (new_result, alert)
}

/// Outcome of a successful stateful reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub event_id: String,
    pub updated: CapacityResult,
    pub alert: Option<CapacityAlert>,
}

/// A store failure during reconciliation. The freshly extracted result is
/// kept so callers can still report it.
#[derive(thiserror::Error, Debug)]
#[error("reconcile {event_id}: {source}")]
pub struct ReconcileError {
    pub event_id: String,
    pub result: CapacityResult,
    #[source]
    pub source: WatchError,
}

/// Stateful reconciler over a history store.
pub struct Reconciler<S: HistoryStore> {
    store: S,
    thresholds: Thresholds,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: HistoryStore> Reconciler<S> {
    pub fn new(store: S, thresholds: Thresholds) -> Self {
        Self {
            store,
            thresholds,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Read the prior, decide the alert and persist `new_result`.
    ///
    /// Calls for the same event id are serialized; different events proceed
    /// in parallel. A lock entry lives only while some call holds it.
    pub fn reconcile(
        &self,
        event: &EventRef,
        new_result: CapacityResult,
    ) -> Result<Reconciliation, ReconcileError> {
        let lock = self
            .locks
            .entry(event.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let outcome = {
            // Poisoned only if another reconcile of this event panicked.
            let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
            self.reconcile_locked(event, new_result)
        };
        drop(lock);
        self.locks
            .remove_if(&event.id, |_, held| Arc::strong_count(held) == 1);
        outcome
    }

    fn reconcile_locked(
        &self,
        event: &EventRef,
        new_result: CapacityResult,
    ) -> Result<Reconciliation, ReconcileError> {
        let prior = match self.store.get_prior(&event.id) {
            Ok(prior) => prior,
            Err(source) => return Err(self.failed(event, new_result, source)),
        };

        let (updated, alert) = reconcile(event, new_result, prior.as_ref(), &self.thresholds);

        if let Err(source) = self.store.put(&event.id, &updated) {
            return Err(self.failed(event, updated, source));
        }

        if let Some(alert) = &alert {
            tracing::info!(
                event_id = %event.id,
                url = %event.url,
                reason = %alert.reason,
                registered = ?updated.registered,
                limit = ?updated.limit,
                "capacity alert"
            );
        } else {
            tracing::debug!(event_id = %event.id, "no capacity change worth alerting");
        }

        Ok(Reconciliation {
            event_id: event.id.clone(),
            updated,
            alert,
        })
    }

    fn failed(&self, event: &EventRef, result: CapacityResult, source: WatchError) -> ReconcileError {
        tracing::warn!(event_id = %event.id, error = %source, "history store unavailable");
        ReconcileError {
            event_id: event.id.clone(),
            result,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{WatchResult, WAITLIST_COUNT_UNKNOWN};
    use chrono::Utc;

    fn event() -> EventRef {
        EventRef::new("e1", "Spring Open", "https://example.org/e1")
    }

    fn numbers(registered: Option<u32>, limit: Option<u32>) -> CapacityResult {
        CapacityResult::new(registered, limit, None, "", false, Utc::now())
    }

    fn with_queue(registered: u32, limit: u32, queued: u32) -> CapacityResult {
        CapacityResult::new(Some(registered), Some(limit), Some(queued), "", false, Utc::now())
    }

    fn thresholds() -> Thresholds {
        Thresholds::default()
    }

    #[test]
    fn test_classify() {
        let t = thresholds();
        assert_eq!(classify(&numbers(None, Some(72)), &t), CapacityState::Unknown);
        assert_eq!(classify(&numbers(Some(10), None), &t), CapacityState::Unknown);
        assert_eq!(classify(&numbers(Some(40), Some(72)), &t), CapacityState::Normal);
        assert_eq!(classify(&numbers(Some(70), Some(72)), &t), CapacityState::NearFull);
        assert_eq!(classify(&numbers(Some(72), Some(72)), &t), CapacityState::NearFull);
        assert_eq!(classify(&numbers(Some(76), Some(72)), &t), CapacityState::Over);
    }

    #[test]
    fn test_classify_percentage_threshold() {
        let t = Thresholds {
            near_full_absolute: 0,
            near_full_percentage: 10.0,
        };
        // 10 of 200 left is 5 percent.
        assert_eq!(classify(&numbers(Some(190), Some(200)), &t), CapacityState::NearFull);
        assert_eq!(classify(&numbers(Some(150), Some(200)), &t), CapacityState::Normal);
    }

    #[test]
    fn test_classify_zero_limit_does_not_divide() {
        let t = Thresholds {
            near_full_absolute: 0,
            near_full_percentage: 50.0,
        };
        assert_eq!(classify(&numbers(Some(0), Some(0)), &t), CapacityState::NearFull);
    }

    #[test]
    fn test_updated_state_is_new_result() {
        let new = numbers(Some(40), Some(72));
        let (updated, alert) = reconcile(&event(), new.clone(), None, &thresholds());
        assert_eq!(updated, new);
        assert!(alert.is_none());
    }

    #[test]
    fn test_newly_over_capacity() {
        let prior = numbers(Some(70), Some(72));
        let new = numbers(Some(76), Some(72));
        let (updated, alert) = reconcile(&event(), new.clone(), Some(&prior), &thresholds());
        let alert = alert.unwrap();
        assert_eq!(alert.reason, AlertReason::NewlyOverCapacity);
        assert_eq!(alert.event_id, "e1");
        assert_eq!(alert.result, new);
        assert_eq!(updated.remaining, Some(-4));
    }

    #[test]
    fn test_over_without_prior_alerts() {
        assert_eq!(
            decide_alert(&numbers(Some(80), Some(72)), None, &thresholds()),
            Some(AlertReason::NewlyOverCapacity)
        );
    }

    #[test]
    fn test_over_to_over_is_quiet() {
        let prior = numbers(Some(76), Some(72));
        let new = numbers(Some(78), Some(72));
        assert_eq!(decide_alert(&new, Some(&prior), &thresholds()), None);
    }

    #[test]
    fn test_identical_results_never_realert() {
        let t = thresholds();
        for r in [
            numbers(Some(76), Some(72)),
            numbers(Some(70), Some(72)),
            numbers(Some(10), Some(72)),
            numbers(None, None),
            with_queue(72, 72, 4),
        ] {
            assert_eq!(decide_alert(&r, Some(&r), &t), None, "{r:?}");
        }
    }

    #[test]
    fn test_limit_disappeared() {
        let prior = numbers(Some(40), Some(72));
        let new = CapacityResult::new(None, None, None, "no limit element found", true, Utc::now());
        assert_eq!(
            decide_alert(&new, Some(&prior), &thresholds()),
            Some(AlertReason::LimitDisappeared)
        );
    }

    #[test]
    fn test_limit_disappeared_beats_waitlist() {
        let prior = numbers(Some(40), Some(72));
        let new = CapacityResult::new(None, None, Some(0), WAITLIST_COUNT_UNKNOWN, false, Utc::now());
        assert_eq!(
            decide_alert(&new, Some(&prior), &thresholds()),
            Some(AlertReason::LimitDisappeared)
        );
    }

    #[test]
    fn test_limit_appeared_after_header_empty() {
        let prior = CapacityResult::new(Some(12), None, None, "", true, Utc::now());
        let new = numbers(Some(12), Some(72));
        assert_eq!(
            decide_alert(&new, Some(&prior), &thresholds()),
            Some(AlertReason::LimitAppeared)
        );
    }

    #[test]
    fn test_limit_appeared_after_nothing() {
        let prior = numbers(None, None);
        let new = numbers(Some(12), Some(72));
        assert_eq!(
            decide_alert(&new, Some(&prior), &thresholds()),
            Some(AlertReason::LimitAppeared)
        );
    }

    #[test]
    fn test_first_sighting_normal_is_quiet() {
        assert_eq!(decide_alert(&numbers(Some(12), Some(72)), None, &thresholds()), None);
    }

    #[test]
    fn test_waitlist_started() {
        let prior = numbers(Some(72), Some(72));
        let new = with_queue(72, 72, 3);
        assert_eq!(
            decide_alert(&new, Some(&prior), &thresholds()),
            Some(AlertReason::WaitlistStarted)
        );
        // Count changes on an existing waitlist are not a new start.
        let later = with_queue(72, 72, 5);
        assert_eq!(decide_alert(&later, Some(&new), &thresholds()), Some(AlertReason::StillNearFull));
    }

    #[test]
    fn test_empty_waitlist_is_not_a_start() {
        let t = thresholds();
        let empty = with_queue(40, 72, 0);
        assert_eq!(decide_alert(&empty, None, &t), None);

        let started = with_queue(40, 72, 5);
        assert_eq!(decide_alert(&started, Some(&empty), &t), Some(AlertReason::WaitlistStarted));
        assert_eq!(decide_alert(&started, Some(&started), &t), None);
    }

    #[test]
    fn test_waitlist_count_unknown_starts_waitlist() {
        let prior = numbers(Some(40), Some(72));
        let new = CapacityResult::new(Some(40), Some(72), Some(0), WAITLIST_COUNT_UNKNOWN, false, Utc::now());
        assert_eq!(
            decide_alert(&new, Some(&prior), &thresholds()),
            Some(AlertReason::WaitlistStarted)
        );
    }

    #[test]
    fn test_near_full_alerts_on_entry_and_change() {
        let t = thresholds();
        let normal = numbers(Some(50), Some(72));
        let near = numbers(Some(70), Some(72));
        let nearer = numbers(Some(71), Some(72));
        assert_eq!(decide_alert(&near, Some(&normal), &t), Some(AlertReason::StillNearFull));
        assert_eq!(decide_alert(&nearer, Some(&near), &t), Some(AlertReason::StillNearFull));
        assert_eq!(decide_alert(&near, None, &t), Some(AlertReason::StillNearFull));
    }

    #[test]
    fn test_near_full_ignores_note_and_timestamp() {
        let a = CapacityResult::new(Some(70), Some(72), None, "header: one", false, Utc::now());
        let b = CapacityResult::new(Some(70), Some(72), None, "text: other", false, Utc::now());
        assert_eq!(decide_alert(&b, Some(&a), &thresholds()), None);
    }

    #[test]
    fn test_reconciler_is_idempotent() {
        let reconciler = Reconciler::new(MemoryStore::new(), thresholds());
        let new = numbers(Some(76), Some(72));

        let first = reconciler.reconcile(&event(), new.clone()).unwrap();
        assert_eq!(first.alert.unwrap().reason, AlertReason::NewlyOverCapacity);

        let second = reconciler.reconcile(&event(), new.clone()).unwrap();
        assert!(second.alert.is_none());
        assert_eq!(second.updated, new);
        assert_eq!(reconciler.store().get_prior("e1").unwrap(), Some(new));
    }

    #[test]
    fn test_lock_entries_released_after_reconcile() {
        let reconciler = Reconciler::new(MemoryStore::new(), thresholds());
        for i in 0..10 {
            let event = EventRef::new(format!("e{i}"), "Weekly", "https://example.org/w");
            reconciler.reconcile(&event, numbers(Some(1), Some(72))).unwrap();
        }
        assert!(reconciler.locks.is_empty());

        let broken = Reconciler::new(BrokenStore, thresholds());
        assert!(broken.reconcile(&event(), numbers(None, None)).is_err());
        assert!(broken.locks.is_empty());
    }

    #[test]
    fn test_reconciler_persists_every_result() {
        let reconciler = Reconciler::new(MemoryStore::new(), thresholds());
        reconciler.reconcile(&event(), numbers(Some(70), Some(72))).unwrap();
        let out = reconciler.reconcile(&event(), numbers(Some(76), Some(72))).unwrap();
        assert_eq!(out.alert.unwrap().reason, AlertReason::NewlyOverCapacity);
        assert_eq!(
            reconciler.store().get_prior("e1").unwrap().unwrap().registered,
            Some(76)
        );
    }

    struct BrokenStore;

    impl HistoryStore for BrokenStore {
        fn get_prior(&self, _: &str) -> WatchResult<Option<CapacityResult>> {
            Err(WatchError::PersistenceUnavailable("disk gone".into()))
        }

        fn put(&self, _: &str, _: &CapacityResult) -> WatchResult<()> {
            Err(WatchError::PersistenceUnavailable("disk gone".into()))
        }
    }

    #[test]
    fn test_store_failure_keeps_result() {
        let reconciler = Reconciler::new(BrokenStore, thresholds());
        let new = numbers(Some(51), Some(84));
        let err = reconciler.reconcile(&event(), new.clone()).unwrap_err();
        assert_eq!(err.event_id, "e1");
        assert_eq!(err.result, new);
        assert!(matches!(err.source, WatchError::PersistenceUnavailable(_)));
    }

    #[test]
    fn test_parallel_reconcile_same_event_alerts_once() {
        let reconciler = Arc::new(Reconciler::new(MemoryStore::new(), thresholds()));
        let new = numbers(Some(76), Some(72));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reconciler = Arc::clone(&reconciler);
                let new = new.clone();
                std::thread::spawn(move || reconciler.reconcile(&event(), new).unwrap())
            })
            .collect();

        let alerts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.alert.is_some())
            .count();
        assert_eq!(alerts, 1);
    }
}
