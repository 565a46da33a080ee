// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delta aggregation engine.
//!
//! The single write path into the aggregate store. Local edits and sync
//! imports both end up in [`DeltaEngine::apply_delta`]:
//!
//! ```text
//!   validate ─► lock(user, date) ─► load or create ─► applied copy
//!                                                        │
//!             broadcast ◄─ save ◄─ check invariants ◄────┘
//!                 │
//!          (unlock) ─► hooks
//! ```
//!
//! The new aggregate is built as a copy and only becomes visible once it has
//! been saved, so a failed persist or an invariant violation leaves the
//! stored aggregate at its last-known-good value.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, error, instrument, warn};

use super::hooks::DeltaHook;
use super::locks::KeyedLocks;
use crate::error::EngineError;
use crate::metrics;
use crate::model::{DailyLog, Delta, MetabolicBaseline};
use crate::storage::AggregateStore;

const EVENT_CAPACITY: usize = 256;

/// Snapshot published after every persisted change.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateChanged {
    pub user_id: String,
    pub date: NaiveDate,
    pub log: DailyLog,
}

pub struct DeltaEngine {
    store: Arc<dyn AggregateStore>,
    locks: KeyedLocks,
    events: broadcast::Sender<AggregateChanged>,
    hooks: RwLock<Vec<Arc<dyn DeltaHook>>>,
}

impl DeltaEngine {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            locks: KeyedLocks::new(),
            events,
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Register a hook run after every successful delta.
    pub fn add_hook(&self, hook: Arc<dyn DeltaHook>) {
        self.hooks.write().push(hook);
    }

    /// Receive a snapshot after every persisted change.
    pub fn subscribe(&self) -> broadcast::Receiver<AggregateChanged> {
        self.events.subscribe()
    }

    /// Apply one delta to the aggregate for `(user_id, date)`, creating the
    /// aggregate with `baseline` if this is the first write for that day.
    ///
    /// Returns the aggregate as persisted.
    #[instrument(skip(self, delta, baseline), fields(kind = %delta.kind(), category = delta.category()))]
    pub async fn apply_delta(
        &self,
        date: NaiveDate,
        user_id: &str,
        delta: &Delta,
        baseline: MetabolicBaseline,
    ) -> Result<DailyLog, EngineError> {
        let start = Instant::now();
        let kind = delta.kind();

        if let Err(e) = delta.validate().and_then(|()| baseline.validate()) {
            metrics::record_delta(kind.as_str(), delta.category(), "rejected");
            debug!(error = %e, "Delta rejected");
            return Err(e);
        }

        let result = self
            .mutate(user_id, date, baseline, "apply_delta", |log| log.applied(delta))
            .await;

        metrics::record_delta_latency(kind.as_str(), start.elapsed());
        match &result {
            Ok(_) => {
                metrics::record_delta(kind.as_str(), delta.category(), "success");
                self.run_hooks(user_id, date, delta).await;
            }
            Err(e) => {
                metrics::record_delta(kind.as_str(), delta.category(), e.kind());
            }
        }
        result
    }

    /// Replace bmr/tdee for a day and recompute its derived fields.
    #[instrument(skip(self))]
    pub async fn rebase(
        &self,
        date: NaiveDate,
        user_id: &str,
        baseline: MetabolicBaseline,
    ) -> Result<DailyLog, EngineError> {
        if let Err(e) = baseline.validate() {
            debug!(error = %e, "Rebase rejected");
            return Err(e);
        }
        self.mutate(user_id, date, baseline, "rebase", |log| log.rebased(baseline))
            .await
    }

    pub async fn get_aggregate(&self, date: NaiveDate, user_id: &str) -> Result<DailyLog, EngineError> {
        self.store
            .load_log(user_id, date)
            .await?
            .ok_or_else(|| EngineError::not_found("daily_log", format!("{}/{}", user_id, date)))
    }

    /// Stored aggregates in `from..=to`, ordered by date.
    pub async fn aggregates_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyLog>, EngineError> {
        if from > to {
            return Err(EngineError::Validation(format!("range start {} is after end {}", from, to)));
        }
        Ok(self.store.logs_between(user_id, from, to).await?)
    }

    async fn mutate<F>(
        &self,
        user_id: &str,
        date: NaiveDate,
        baseline: MetabolicBaseline,
        operation: &'static str,
        f: F,
    ) -> Result<DailyLog, EngineError>
    where
        F: FnOnce(&DailyLog) -> DailyLog,
    {
        let _guard = self.locks.lock(user_id, date).await;
        metrics::set_active_locks(self.locks.active());

        let current = match self.store.load_log(user_id, date).await? {
            Some(log) => log,
            None => DailyLog::new(user_id, date, baseline),
        };

        let next = f(&current);
        if let Err(detail) = next.check_invariants() {
            metrics::record_consistency_violation(operation);
            error!(user_id, %date, %detail, "Aggregate invariant violated, nothing persisted");
            return Err(EngineError::Consistency(detail));
        }

        self.store.save_log(&next).await?;

        // Published under the lock so subscribers see changes in apply order.
        let _ = self.events.send(AggregateChanged {
            user_id: user_id.to_string(),
            date,
            log: next.clone(),
        });

        Ok(next)
    }

    async fn run_hooks(&self, user_id: &str, date: NaiveDate, delta: &Delta) {
        let hooks: Vec<Arc<dyn DeltaHook>> = self.hooks.read().clone();
        for hook in hooks {
            if let Err(e) = hook.on_delta_applied(user_id, date, delta).await {
                warn!(user_id, %date, error = %e, "Delta hook failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contribution, Grams, MealCategory};
    use crate::storage::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn baseline() -> MetabolicBaseline {
        MetabolicBaseline { bmr: 1500, tdee: 2100 }
    }

    fn exercise(kcal: i64, minutes: i64) -> Contribution {
        Contribution::Exercise { calories_burned: kcal, duration_minutes: minutes }
    }

    fn setup() -> (Arc<InMemoryStore>, DeltaEngine) {
        let store = Arc::new(InMemoryStore::new());
        let engine = DeltaEngine::new(store.clone());
        (store, engine)
    }

    #[tokio::test]
    async fn test_get_or_create_then_apply() {
        let (_, engine) = setup();
        let log = engine
            .apply_delta(day(), "u1", &Delta::Add(exercise(400, 60)), baseline())
            .await
            .unwrap();

        assert_eq!(log.exercise_minutes(), 60);
        assert_eq!(log.total_calories_out(), 400);
        assert_eq!(log.exercise_count(), 1);
        assert_eq!(log.net_calories(), -2500);
        assert_eq!(engine.get_aggregate(day(), "u1").await.unwrap(), log);
    }

    #[tokio::test]
    async fn test_existing_baseline_kept() {
        let (_, engine) = setup();
        engine.apply_delta(day(), "u1", &Delta::Add(exercise(100, 10)), baseline()).await.unwrap();
        let log = engine
            .apply_delta(
                day(),
                "u1",
                &Delta::Add(exercise(100, 10)),
                MetabolicBaseline { bmr: 9, tdee: 9 },
            )
            .await
            .unwrap();
        assert_eq!(log.tdee(), 2100);
    }

    #[tokio::test]
    async fn test_missing_aggregate_is_not_found() {
        let (_, engine) = setup();
        assert!(matches!(
            engine.get_aggregate(day(), "nobody").await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_validation_happens_before_storage() {
        let (store, engine) = setup();
        let err = engine
            .apply_delta(day(), "u1", &Delta::Add(exercise(-1, 10)), baseline())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(store.log_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_last_good_value() {
        let (store, engine) = setup();
        let before = engine
            .apply_delta(day(), "u1", &Delta::Add(exercise(100, 10)), baseline())
            .await
            .unwrap();

        store.set_fail_writes(true);
        let err = engine
            .apply_delta(day(), "u1", &Delta::Add(exercise(300, 30)), baseline())
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        store.set_fail_writes(false);
        assert_eq!(engine.get_aggregate(day(), "u1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_events_published_in_apply_order() {
        let (_, engine) = setup();
        let mut rx = engine.subscribe();

        for minutes in [10, 20, 30] {
            engine
                .apply_delta(day(), "u1", &Delta::Add(exercise(50, minutes)), baseline())
                .await
                .unwrap();
        }

        let seen: Vec<i64> = (0..3)
            .map(|_| rx.try_recv().unwrap().log.exercise_minutes())
            .collect();
        assert_eq!(seen, vec![10, 30, 60]);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_deltas_all_land() {
        let (_, engine) = setup();
        let engine = Arc::new(engine);
        let mut handles = vec![];

        for _ in 0..50 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .apply_delta(day(), "u1", &Delta::Add(exercise(10, 1)), baseline())
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let log = engine.get_aggregate(day(), "u1").await.unwrap();
        assert_eq!(log.exercise_count(), 50);
        assert_eq!(log.total_calories_out(), 500);
    }

    #[tokio::test]
    async fn test_rebase_recomputes_net() {
        let (_, engine) = setup();
        engine.apply_delta(day(), "u1", &Delta::Add(exercise(400, 60)), baseline()).await.unwrap();
        let log = engine
            .rebase(day(), "u1", MetabolicBaseline { bmr: 1400, tdee: 1800 })
            .await
            .unwrap();
        assert_eq!(log.net_calories(), -2200);
    }

    #[tokio::test]
    async fn test_bad_baseline_rejected_before_storage() {
        let (store, engine) = setup();
        let err = engine
            .apply_delta(
                day(),
                "u1",
                &Delta::Add(exercise(100, 10)),
                MetabolicBaseline { bmr: -5, tdee: 2000 },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(store.log_count(), 0);

        engine.apply_delta(day(), "u1", &Delta::Add(exercise(100, 10)), baseline()).await.unwrap();
        let err = engine
            .rebase(day(), "u1", MetabolicBaseline { bmr: 1500, tdee: i64::MAX })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(engine.get_aggregate(day(), "u1").await.unwrap().tdee(), 2100);
    }

    #[tokio::test]
    async fn test_aggregates_between_rejects_inverted_range() {
        let (_, engine) = setup();
        let next = day().succ_opt().unwrap();
        assert!(matches!(
            engine.aggregates_between("u1", next, day()).await,
            Err(EngineError::Validation(_))
        ));
    }

    struct CountingHook {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl DeltaHook for CountingHook {
        async fn on_delta_applied(&self, _: &str, _: NaiveDate, _: &Delta) -> Result<(), EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(EngineError::TransientIo("hook down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_hook_failure_does_not_fail_delta() {
        let (_, engine) = setup();
        let hook = Arc::new(CountingHook { calls: AtomicUsize::new(0), fail: true });
        engine.add_hook(hook.clone());

        let food = Contribution::Food {
            meal: MealCategory::Breakfast,
            calories: 350,
            carbs: Grams::from_f64(40.0),
            protein: Grams::from_f64(20.0),
            fat: Grams::from_f64(10.0),
        };
        assert!(engine.apply_delta(day(), "u1", &Delta::Add(food), baseline()).await.is_ok());
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }
}
