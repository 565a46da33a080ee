// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tiered annotation lookup and invalidation.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use super::budget::RequestBudget;
use super::cache::{AnnotationCache, AnnotationCacheStats};
use super::generator::{AnnotationGenerator, AnnotationRequest, GoalContext};
use super::{Annotation, AnnotationKey, AnnotationLookup, AnnotationSource};
use crate::aggregation::{DeltaHook, KeyedLocks};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::metrics;
use crate::model::{Contribution, Delta, MealCategory};
use crate::storage::{AggregateStore, AnnotationStore};

pub struct AnnotationService {
    fast: AnnotationCache,
    durable: Arc<dyn AnnotationStore>,
    aggregates: Arc<dyn AggregateStore>,
    generator: Arc<dyn AnnotationGenerator>,
    budget: RequestBudget,
    /// One generation per (user, date) at a time
    generating: KeyedLocks,
    /// Days with a lookup in flight, counting invalidations seen meanwhile
    epochs: DashMap<DayKey, u64>,
}

type DayKey = (String, NaiveDate);

/// Marks a day as having a lookup in flight. Only one exists per day at a
/// time (it lives under the `generating` lock); its entry goes away on drop.
struct InFlight<'a> {
    epochs: &'a DashMap<DayKey, u64>,
    key: DayKey,
}

impl<'a> InFlight<'a> {
    fn start(epochs: &'a DashMap<DayKey, u64>, user_id: &str, date: NaiveDate) -> Self {
        let key = (user_id.to_string(), date);
        epochs.insert(key.clone(), 0);
        Self { epochs, key }
    }

    /// Whether the day was invalidated since the lookup started.
    fn invalidated(&self) -> bool {
        self.epochs.get(&self.key).map_or(true, |e| *e.value() != 0)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.epochs.remove(&self.key);
    }
}

impl AnnotationService {
    pub fn new(
        config: &EngineConfig,
        durable: Arc<dyn AnnotationStore>,
        aggregates: Arc<dyn AggregateStore>,
        generator: Arc<dyn AnnotationGenerator>,
    ) -> Self {
        Self {
            fast: AnnotationCache::new(config.annotation_cache_capacity, config.annotation_ttl()),
            durable,
            aggregates,
            generator,
            budget: RequestBudget::per_minute(config.generator_requests_per_minute),
            generating: KeyedLocks::new(),
            epochs: DashMap::new(),
        }
    }

    /// Look up an annotation: fast tier, then durable tier, then generate.
    ///
    /// While the generator is over budget, durable hits are still served; a
    /// full miss surfaces [`EngineError::RateLimited`] with the wait.
    #[instrument(skip(self), fields(key))]
    pub async fn get_annotation(
        &self,
        date: NaiveDate,
        user_id: &str,
        meal: Option<MealCategory>,
    ) -> Result<AnnotationLookup, EngineError> {
        let key = AnnotationKey::new(user_id, date, meal);
        tracing::Span::current().record("key", tracing::field::display(&key));

        if let Some(annotation) = self.fast.get(&key) {
            return Ok(self.found(annotation, AnnotationSource::Fast));
        }

        let _guard = self.generating.lock(user_id, date).await;

        // Someone else may have filled it while we waited.
        if let Some(annotation) = self.fast.get(&key) {
            return Ok(self.found(annotation, AnnotationSource::Fast));
        }

        let in_flight = InFlight::start(&self.epochs, user_id, date);

        if let Some(annotation) = self.durable.load_annotation(&key).await? {
            if !in_flight.invalidated() {
                self.fast.insert(key, annotation.clone());
            }
            return Ok(self.found(annotation, AnnotationSource::Durable));
        }

        metrics::record_annotation_lookup("durable", "miss");
        self.generate(key, &in_flight).await
    }

    /// Drop cached annotations after the underlying data changed.
    ///
    /// `Some(meal)` clears that meal and the whole-day annotation;
    /// `None` clears every annotation of the day. Both durable deletes are
    /// attempted even if the first fails; the first error is returned.
    pub async fn invalidate(
        &self,
        date: NaiveDate,
        user_id: &str,
        meal: Option<MealCategory>,
    ) -> Result<(), EngineError> {
        if let Some(mut epoch) = self.epochs.get_mut(&(user_id.to_string(), date)) {
            *epoch += 1;
        }

        match meal {
            Some(meal) => {
                let key = AnnotationKey::meal(user_id, date, meal);
                let day_key = key.day_key();
                self.fast.remove(&key);
                self.fast.remove(&day_key);
                let meal_deleted = self.durable.delete_annotation(&key).await;
                let day_deleted = self.durable.delete_annotation(&day_key).await;
                if let Err(e) = &meal_deleted {
                    warn!(key = %key, error = %e, "Failed to delete meal annotation");
                }
                meal_deleted.and(day_deleted)?;
            }
            None => {
                self.fast.remove_day(user_id, date);
                self.durable.delete_annotations_for_day(user_id, date).await?;
            }
        }
        debug!(user_id, %date, ?meal, "Annotations invalidated");
        Ok(())
    }

    pub fn stats(&self) -> AnnotationCacheStats {
        let stats = self.fast.stats();
        metrics::set_annotation_cache_stats(stats.entries, stats.hit_rate);
        stats
    }

    /// Generator calls left in the current minute.
    #[must_use]
    pub fn remaining_budget(&self) -> usize {
        self.budget.remaining()
    }

    async fn generate(
        &self,
        key: AnnotationKey,
        in_flight: &InFlight<'_>,
    ) -> Result<AnnotationLookup, EngineError> {
        if let Err(wait) = self.budget.try_acquire() {
            metrics::record_generator_call("budget_exhausted");
            info!(key = %key, retry_after = ?wait, "Generator budget exhausted");
            return Err(EngineError::RateLimited { retry_after: Some(wait) });
        }

        let goal = match self.aggregates.load_log(&key.user_id, key.date).await? {
            Some(log) => GoalContext::from_log(&log),
            None => GoalContext::empty(),
        };
        let request = AnnotationRequest {
            user_id: key.user_id.clone(),
            date: key.date,
            meal: key.meal,
            goal,
        };

        let annotation = match self.generator.generate(&request).await {
            Ok(annotation) => {
                metrics::record_generator_call("success");
                annotation
            }
            Err(e) => {
                metrics::record_generator_call(e.kind());
                warn!(key = %key, error = %e, "Annotation generation failed");
                return Err(e.into());
            }
        };

        if in_flight.invalidated() {
            // Data changed mid-generation: hand back the result but don't keep it.
            debug!(key = %key, "Invalidated during generation, not caching");
            return Ok(self.found(annotation, AnnotationSource::Generated));
        }

        // Durable first: the fast tier only ever holds what the durable tier has.
        self.durable.save_annotation(&key, &annotation).await?;
        if in_flight.invalidated() {
            // The invalidation's delete may have run before our save.
            self.durable.delete_annotation(&key).await?;
            return Ok(self.found(annotation, AnnotationSource::Generated));
        }
        self.fast.insert(key, annotation.clone());
        Ok(self.found(annotation, AnnotationSource::Generated))
    }

    fn found(&self, annotation: Annotation, source: AnnotationSource) -> AnnotationLookup {
        metrics::record_annotation_lookup(source.as_str(), "hit");
        AnnotationLookup { annotation, source }
    }
}

/// Food changes invalidate the affected meal and the whole-day annotation.
#[async_trait]
impl DeltaHook for AnnotationService {
    async fn on_delta_applied(&self, user_id: &str, date: NaiveDate, delta: &Delta) -> Result<(), EngineError> {
        let meals: BTreeSet<MealCategory> = delta
            .contributions()
            .into_iter()
            .filter_map(|c| match c {
                Contribution::Food { meal, .. } => Some(*meal),
                _ => None,
            })
            .collect();

        for meal in meals {
            self.invalidate(date, user_id, Some(meal)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::GeneratorError;
    use crate::model::{DailyLog, Grams, MetabolicBaseline};
    use crate::storage::{InMemoryStore, StorageError};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedGenerator {
        calls: AtomicUsize,
        fail_with: Mutex<Option<GeneratorError>>,
        last_request: Mutex<Option<AnnotationRequest>>,
    }

    impl ScriptedGenerator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_with: Mutex::new(None),
                last_request: Mutex::new(None),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnnotationGenerator for ScriptedGenerator {
        async fn generate(&self, request: &AnnotationRequest) -> Result<Annotation, GeneratorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_request.lock() = Some(request.clone());
            if let Some(err) = self.fail_with.lock().clone() {
                return Err(err);
            }
            Ok(Annotation { text: format!("note #{}", n), score: 60 })
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn setup(config: EngineConfig) -> (Arc<InMemoryStore>, Arc<ScriptedGenerator>, AnnotationService) {
        let store = Arc::new(InMemoryStore::new());
        let generator = Arc::new(ScriptedGenerator::new());
        let service = AnnotationService::new(&config, store.clone(), store.clone(), generator.clone());
        (store, generator, service)
    }

    /// Aggregate reads that take a while, leaving room for a concurrent edit.
    struct SlowAggregates(Arc<InMemoryStore>);

    #[async_trait]
    impl AggregateStore for SlowAggregates {
        async fn load_log(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyLog>, StorageError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.0.load_log(user_id, date).await
        }

        async fn save_log(&self, log: &DailyLog) -> Result<(), StorageError> {
            self.0.save_log(log).await
        }

        async fn logs_between(
            &self,
            user_id: &str,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<DailyLog>, StorageError> {
            self.0.logs_between(user_id, from, to).await
        }
    }

    /// Durable tier whose per-meal deletes fail.
    struct MealDeletesFail(Arc<InMemoryStore>);

    #[async_trait]
    impl AnnotationStore for MealDeletesFail {
        async fn load_annotation(&self, key: &AnnotationKey) -> Result<Option<Annotation>, StorageError> {
            self.0.load_annotation(key).await
        }

        async fn save_annotation(&self, key: &AnnotationKey, annotation: &Annotation) -> Result<(), StorageError> {
            self.0.save_annotation(key, annotation).await
        }

        async fn delete_annotation(&self, key: &AnnotationKey) -> Result<(), StorageError> {
            if key.meal.is_some() {
                return Err(StorageError::Backend("disk full".into()));
            }
            self.0.delete_annotation(key).await
        }

        async fn delete_annotations_for_day(&self, user_id: &str, date: NaiveDate) -> Result<(), StorageError> {
            self.0.delete_annotations_for_day(user_id, date).await
        }
    }

    #[tokio::test]
    async fn test_tier_order() {
        let (_, generator, service) = setup(EngineConfig::default());

        let first = service.get_annotation(day(), "u1", None).await.unwrap();
        assert_eq!(first.source, AnnotationSource::Generated);

        let second = service.get_annotation(day(), "u1", None).await.unwrap();
        assert_eq!(second.source, AnnotationSource::Fast);
        assert_eq!(second.annotation, first.annotation);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_durable_tier_serves_after_ttl() {
        let (_, generator, service) = setup(EngineConfig::default());
        service.get_annotation(day(), "u1", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(24 * 60 * 60 + 60)).await;
        let lookup = service.get_annotation(day(), "u1", None).await.unwrap();
        assert_eq!(lookup.source, AnnotationSource::Durable);
        assert_eq!(generator.calls(), 1);
        assert_eq!(service.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_failure_populates_neither_tier() {
        let (store, generator, service) = setup(EngineConfig::default());
        *generator.fail_with.lock() = Some(GeneratorError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        });

        let err = service.get_annotation(day(), "u1", None).await.unwrap_err();
        assert_eq!(err, EngineError::RateLimited { retry_after: Some(Duration::from_secs(30)) });
        assert_eq!(store.annotation_count(), 0);

        *generator.fail_with.lock() = None;
        let lookup = service.get_annotation(day(), "u1", None).await.unwrap();
        assert_eq!(lookup.source, AnnotationSource::Generated);
    }

    #[tokio::test]
    async fn test_failed_durable_write_skips_fast_tier() {
        let (store, _, service) = setup(EngineConfig::default());
        store.set_fail_writes(true);
        assert!(service.get_annotation(day(), "u1", None).await.is_err());
        assert_eq!(service.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_budget_exhausted_still_serves_durable() {
        let config = EngineConfig { generator_requests_per_minute: 1, ..Default::default() };
        let (store, generator, service) = setup(config);

        let cached = Annotation { text: "from disk".into(), score: 80 };
        store
            .save_annotation(&AnnotationKey::whole_day("u1", day()), &cached)
            .await
            .unwrap();

        service.get_annotation(day(), "u1", Some(MealCategory::Lunch)).await.unwrap();
        let err = service
            .get_annotation(day(), "u1", Some(MealCategory::Dinner))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RateLimited { retry_after: Some(_) }));

        let lookup = service.get_annotation(day(), "u1", None).await.unwrap();
        assert_eq!(lookup.source, AnnotationSource::Durable);
        assert_eq!(lookup.annotation, cached);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_meal_invalidation_clears_meal_and_day() {
        let (store, generator, service) = setup(EngineConfig::default());
        service.get_annotation(day(), "u1", None).await.unwrap();
        service.get_annotation(day(), "u1", Some(MealCategory::Lunch)).await.unwrap();
        service.get_annotation(day(), "u1", Some(MealCategory::Dinner)).await.unwrap();
        assert_eq!(store.annotation_count(), 3);

        service.invalidate(day(), "u1", Some(MealCategory::Lunch)).await.unwrap();
        assert_eq!(store.annotation_count(), 1, "dinner survives");

        let lookup = service.get_annotation(day(), "u1", Some(MealCategory::Dinner)).await.unwrap();
        assert_eq!(lookup.source, AnnotationSource::Fast);
        let lookup = service.get_annotation(day(), "u1", None).await.unwrap();
        assert_eq!(lookup.source, AnnotationSource::Generated);
        assert_eq!(generator.calls(), 4);
    }

    #[tokio::test]
    async fn test_whole_day_invalidation() {
        let (store, _, service) = setup(EngineConfig::default());
        service.get_annotation(day(), "u1", None).await.unwrap();
        service.get_annotation(day(), "u1", Some(MealCategory::Snack)).await.unwrap();

        service.invalidate(day(), "u1", None).await.unwrap();
        assert_eq!(store.annotation_count(), 0);
        assert_eq!(service.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_food_delta_hook_invalidates() {
        let (store, _, service) = setup(EngineConfig::default());
        service.get_annotation(day(), "u1", Some(MealCategory::Breakfast)).await.unwrap();

        let food = Contribution::Food {
            meal: MealCategory::Breakfast,
            calories: 300,
            carbs: Grams::ZERO,
            protein: Grams::ZERO,
            fat: Grams::ZERO,
        };
        service.on_delta_applied("u1", day(), &Delta::Add(food)).await.unwrap();
        assert_eq!(store.annotation_count(), 0);

        // Non-food deltas leave annotations alone
        service.get_annotation(day(), "u1", None).await.unwrap();
        let steps = Delta::Add(Contribution::Steps { count: 100 });
        service.on_delta_applied("u1", day(), &steps).await.unwrap();
        assert_eq!(store.annotation_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_during_aggregate_read_is_not_cached() {
        let store = Arc::new(InMemoryStore::new());
        let generator = Arc::new(ScriptedGenerator::new());
        let service = AnnotationService::new(
            &EngineConfig::default(),
            store.clone(),
            Arc::new(SlowAggregates(store.clone())),
            generator.clone(),
        );

        let (lookup, invalidated) = tokio::join!(service.get_annotation(day(), "u1", None), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            service.invalidate(day(), "u1", None).await
        });
        invalidated.unwrap();
        assert_eq!(lookup.unwrap().source, AnnotationSource::Generated);
        assert_eq!(store.annotation_count(), 0);
        assert_eq!(service.stats().entries, 0);

        let again = service.get_annotation(day(), "u1", None).await.unwrap();
        assert_eq!(again.source, AnnotationSource::Generated);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidation_bookkeeping_is_released() {
        let (_, generator, service) = setup(EngineConfig::default());

        service.invalidate(day(), "u1", None).await.unwrap();
        assert!(service.epochs.is_empty());

        service.get_annotation(day(), "u1", None).await.unwrap();
        service.invalidate(day(), "u1", Some(MealCategory::Lunch)).await.unwrap();
        assert!(service.epochs.is_empty());

        *generator.fail_with.lock() = Some(GeneratorError::Transient("down".into()));
        assert!(service.get_annotation(day(), "u2", None).await.is_err());
        assert!(service.epochs.is_empty());
    }

    #[tokio::test]
    async fn test_failed_meal_delete_still_clears_day() {
        let store = Arc::new(InMemoryStore::new());
        let generator = Arc::new(ScriptedGenerator::new());
        let service = AnnotationService::new(
            &EngineConfig::default(),
            Arc::new(MealDeletesFail(store.clone())),
            store.clone(),
            generator,
        );
        service.get_annotation(day(), "u1", None).await.unwrap();
        service.get_annotation(day(), "u1", Some(MealCategory::Lunch)).await.unwrap();

        let err = service.invalidate(day(), "u1", Some(MealCategory::Lunch)).await.unwrap_err();
        assert!(err.is_retryable());

        let whole = AnnotationKey::whole_day("u1", day());
        let lunch = AnnotationKey::meal("u1", day(), MealCategory::Lunch);
        assert_eq!(store.load_annotation(&whole).await.unwrap(), None);
        assert!(store.load_annotation(&lunch).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_goal_context_from_aggregate() {
        let (store, generator, service) = setup(EngineConfig::default());
        let log = DailyLog::new("u1", day(), MetabolicBaseline { bmr: 1500, tdee: 2100 });
        store.save_log(&log).await.unwrap();

        service.get_annotation(day(), "u1", None).await.unwrap();
        let request = generator.last_request.lock().clone().unwrap();
        assert_eq!(request.goal.tdee, 2100);
        assert_eq!(request.goal.net_calories, -2100);
    }
}
