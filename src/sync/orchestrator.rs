// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pull-side sync, one flight per user.
//!
//! # Flow
//!
//! ```text
//! sync(user) ──► in flight? ──yes──► join, await the same result
//!                    │ no
//!                    ▼
//!              spawn flight task
//!                    │
//!    available? ─no─► Failed (Authorization)
//!                    │
//!    for each pullable category:
//!        read samples (retried, cancellable)
//!        for each sample: import in its own task, await it fully
//!                    │
//!    watermark := start of this run ─► Succeeded
//! ```
//!
//! The flight runs in its own task, so a caller dropping its future does
//! not stop it. [`SyncOrchestrator::disable`] is the only way to cancel,
//! and cancellation is observed between samples: every delta is either
//! fully applied or not started, and the watermark does not move.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, NaiveDateTime};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::import::Importer;
use super::state::{CategoryReport, ImportOutcome, SyncReport, SyncState};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::health::{
    AuthorizationGate, ExternalSample, HealthCategory, HealthStore, HealthStoreError, SampleWindow,
};
use crate::metrics;
use crate::resilience::retry::{retry_if, RetryConfig};
use crate::storage::WatermarkStore;

type FlightResult = Option<Result<SyncReport, EngineError>>;

#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    health: Arc<dyn HealthStore>,
    gate: AuthorizationGate,
    importer: Importer,
    watermarks: Arc<dyn WatermarkStore>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    window_days: u32,
    flights: DashMap<String, watch::Receiver<FlightResult>>,
    cancels: DashMap<String, CancellationToken>,
    states: DashMap<String, watch::Sender<SyncState>>,
}

impl SyncOrchestrator {
    pub fn new(
        health: Arc<dyn HealthStore>,
        importer: Importer,
        watermarks: Arc<dyn WatermarkStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                gate: AuthorizationGate::new(health.clone()),
                health,
                importer,
                watermarks,
                clock,
                retry: config.sync_retry(),
                window_days: config.sync_window_days,
                flights: DashMap::new(),
                cancels: DashMap::new(),
                states: DashMap::new(),
            }),
        }
    }

    /// Pull the last `window_days` days.
    pub async fn sync(&self, user_id: &str, window_days: u32) -> Result<SyncReport, EngineError> {
        let start = self.inner.clock.now() - Duration::days(i64::from(window_days));
        self.run(user_id, start).await
    }

    /// Pull everything since `since`, or since the last successful sync when
    /// `None`. Without either, falls back to the configured window.
    pub async fn sync_since(
        &self,
        user_id: &str,
        since: Option<NaiveDateTime>,
    ) -> Result<SyncReport, EngineError> {
        let start = match since {
            Some(since) => since,
            None => match self.inner.watermarks.load_watermark(user_id).await? {
                Some(watermark) => watermark,
                None => self.inner.clock.now() - Duration::days(i64::from(self.inner.window_days)),
            },
        };
        if start > self.inner.clock.now() {
            return Err(EngineError::Validation(format!("sync start {} is in the future", start)));
        }
        self.run(user_id, start).await
    }

    pub async fn last_sync_date(&self, user_id: &str) -> Result<Option<NaiveDateTime>, EngineError> {
        Ok(self.inner.watermarks.load_watermark(user_id).await?)
    }

    pub async fn clear_last_sync_date(&self, user_id: &str) -> Result<(), EngineError> {
        self.inner.watermarks.clear_watermark(user_id).await?;
        info!(user_id, "Sync watermark cleared");
        Ok(())
    }

    /// Observe `user_id`'s sync state.
    pub fn sync_state(&self, user_id: &str) -> watch::Receiver<SyncState> {
        self.inner.state_receiver(user_id)
    }

    /// Cancel any in-flight sync and forget the watermark.
    ///
    /// Waits for a cancelled flight to wind down first, so it cannot save a
    /// watermark after this one was cleared.
    pub async fn disable(&self, user_id: &str) -> Result<(), EngineError> {
        let flight = self.inner.flights.get(user_id).map(|f| f.value().clone());
        let cancelled = match self.inner.cancels.get(user_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        if cancelled {
            info!(user_id, "Cancelling in-flight sync");
        }
        if let Some(rx) = flight {
            let ended = wait_for(rx).await;
            debug!(user_id, cancelled = matches!(ended, Err(EngineError::Cancelled)), "In-flight sync ended");
        }

        self.inner.watermarks.clear_watermark(user_id).await?;
        self.inner.set_state(user_id, SyncState::Idle);
        Ok(())
    }

    async fn run(&self, user_id: &str, start: NaiveDateTime) -> Result<SyncReport, EngineError> {
        let (rx, leader) = match self.inner.flights.entry(user_id.to_string()) {
            Entry::Occupied(flight) => (flight.get().clone(), None),
            Entry::Vacant(slot) => {
                // The token is registered before the flight is visible, so
                // whoever sees the flight can also cancel it.
                let token = CancellationToken::new();
                self.inner.cancels.insert(user_id.to_string(), token.clone());
                let (tx, rx) = watch::channel(None);
                slot.insert(rx.clone());
                (rx, Some((tx, token)))
            }
        };

        match leader {
            Some((tx, token)) => self.launch(user_id, start, tx, token),
            None => {
                debug!(user_id, "Joining in-flight sync");
                metrics::record_sync_joined();
            }
        }
        wait_for(rx).await
    }

    fn launch(
        &self,
        user_id: &str,
        start: NaiveDateTime,
        tx: watch::Sender<FlightResult>,
        token: CancellationToken,
    ) {
        let inner = self.inner.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            let result = {
                let _flight = FlightGuard { inner: &inner, user_id: &user_id };
                inner.execute(&user_id, start, &token).await
            };
            let _ = tx.send(Some(result));
        });
    }
}

/// Removes the flight entry even if the flight task panics.
struct FlightGuard<'a> {
    inner: &'a Inner,
    user_id: &'a str,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // Token first: once the flight is gone a new one may insert its own.
        self.inner.cancels.remove(self.user_id);
        self.inner.flights.remove(self.user_id);
    }
}

async fn wait_for(mut rx: watch::Receiver<FlightResult>) -> Result<SyncReport, EngineError> {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(result) = current {
            return result;
        }
        if rx.changed().await.is_err() {
            // Sender gone: take a final value if one was sent, otherwise the flight died.
            let last = rx.borrow().clone();
            return last.unwrap_or(Err(EngineError::Cancelled));
        }
    }
}

impl Inner {
    #[instrument(skip(self, token), fields(window_start = %start))]
    async fn execute(
        &self,
        user_id: &str,
        start: NaiveDateTime,
        token: &CancellationToken,
    ) -> Result<SyncReport, EngineError> {
        self.set_state(user_id, SyncState::Syncing);
        let timer = Instant::now();

        let result = self.pull(user_id, start, token).await;

        let (state, status) = match &result {
            Ok(_) => (SyncState::Succeeded, "success"),
            Err(EngineError::Cancelled) => (SyncState::Failed, "cancelled"),
            Err(_) => (SyncState::Failed, "failure"),
        };
        metrics::record_sync_run(status, timer.elapsed());
        // A disabled user stays Idle.
        if !token.is_cancelled() {
            self.set_state(user_id, state);
        }

        match &result {
            Ok(report) => info!(
                pulled = report.pulled(),
                changed = report.changed(),
                authorization = %report.authorization,
                "Sync succeeded"
            ),
            Err(e) => warn!(error = %e, "Sync failed"),
        }
        result
    }

    async fn pull(
        &self,
        user_id: &str,
        start: NaiveDateTime,
        token: &CancellationToken,
    ) -> Result<SyncReport, EngineError> {
        let started_at = self.clock.now();

        if !self.gate.check_availability().await {
            return Err(EngineError::Authorization("health store unavailable on this device".into()));
        }

        let summary = self.gate.summarize().await;
        let window = SampleWindow { start, end: started_at };
        let mut report = SyncReport::new(user_id, started_at, window, summary.level());

        // All-denied pulls nothing and still counts as a successful sync.
        for category in summary.pullable() {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let samples = tokio::select! {
                _ = token.cancelled() => return Err(EngineError::Cancelled),
                samples = self.read(category, window) => samples?,
            };

            let mut category_report = CategoryReport { pulled: samples.len(), ..Default::default() };
            for sample in samples {
                if token.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                match self.import(user_id, sample).await {
                    Ok(outcome) => category_report.count(outcome),
                    Err(EngineError::Validation(reason)) => {
                        warn!(%category, %reason, "Skipping malformed sample");
                        category_report.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            record_category(category, &category_report);
            report.categories.push((category, category_report));
        }

        // A cancel that landed during the last import must not move the watermark.
        if token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // Watermark is our own clock at the start of the run, never a remote timestamp.
        self.watermarks.save_watermark(user_id, started_at).await?;
        Ok(report)
    }

    /// Read with backoff. Denied reads are soft: nothing to import.
    async fn read(
        &self,
        category: HealthCategory,
        window: SampleWindow,
    ) -> Result<Vec<ExternalSample>, EngineError> {
        let result = retry_if(
            "read_samples",
            &self.retry,
            || async { self.health.read_samples(category, window).await },
            |e| matches!(e, HealthStoreError::Transient(_)),
        )
        .await;

        match result {
            Ok(mut samples) => {
                samples.sort_by(|a, b| a.start.cmp(&b.start));
                Ok(samples)
            }
            Err(HealthStoreError::AuthorizationDenied(_)) => {
                debug!(%category, "Read denied, treating as empty");
                Ok(Vec::new())
            }
            Err(e) => {
                metrics::record_health_store_error("read_samples", e.kind());
                Err(e.into())
            }
        }
    }

    /// Import one sample in its own task so it completes even if the flight
    /// is torn down mid-way.
    async fn import(&self, user_id: &str, sample: ExternalSample) -> Result<ImportOutcome, EngineError> {
        let importer = self.importer.clone();
        let retry = self.retry.clone();
        let user_id = user_id.to_string();

        let handle = tokio::spawn(async move {
            retry_if(
                "import_sample",
                &retry,
                || importer.import(&user_id, &sample),
                EngineError::is_retryable,
            )
            .await
        });

        handle
            .await
            .map_err(|e| EngineError::Consistency(format!("import task failed: {}", e)))?
    }

    fn state_receiver(&self, user_id: &str) -> watch::Receiver<SyncState> {
        self.states
            .entry(user_id.to_string())
            .or_insert_with(|| watch::channel(SyncState::Idle).0)
            .subscribe()
    }

    fn set_state(&self, user_id: &str, state: SyncState) {
        self.states
            .entry(user_id.to_string())
            .or_insert_with(|| watch::channel(SyncState::Idle).0)
            .send_replace(state);
    }
}

fn record_category(category: HealthCategory, report: &CategoryReport) {
    let name = category.as_str();
    for (outcome, count) in [
        ("created", report.created),
        ("updated", report.updated),
        ("unchanged", report.unchanged),
        ("skipped", report.skipped),
    ] {
        if count > 0 {
            metrics::record_import(name, outcome, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{BaselineProvider, DeltaEngine, FixedBaseline};
    use crate::clock::ManualClock;
    use crate::health::{InMemoryHealthStore, SampleValue};
    use crate::model::{BodyRecord, ExerciseRecord, MetabolicBaseline, SleepRecord, StepsRecord};
    use crate::repository::{InMemoryRecordRepository, TrackedRepository};
    use crate::storage::InMemoryStore;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn at(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    struct Fixture {
        health: Arc<InMemoryHealthStore>,
        store: Arc<InMemoryStore>,
        engine: Arc<DeltaEngine>,
        clock: Arc<ManualClock>,
        sync: SyncOrchestrator,
    }

    fn fixture(health: InMemoryHealthStore) -> Fixture {
        fixture_with(health, Arc::new(FixedBaseline(MetabolicBaseline { bmr: 1500, tdee: 2000 })))
    }

    fn fixture_with(health: InMemoryHealthStore, baselines: Arc<dyn BaselineProvider>) -> Fixture {
        let health = Arc::new(health);
        let store = Arc::new(InMemoryStore::new());
        let engine = Arc::new(DeltaEngine::new(store.clone()));
        let clock = Arc::new(ManualClock::new(at(10, 12)));

        let importer = Importer::new(
            TrackedRepository::new(
                Arc::new(InMemoryRecordRepository::<ExerciseRecord>::new()),
                engine.clone(),
                baselines.clone(),
            ),
            TrackedRepository::new(
                Arc::new(InMemoryRecordRepository::<SleepRecord>::new()),
                engine.clone(),
                baselines.clone(),
            ),
            TrackedRepository::new(
                Arc::new(InMemoryRecordRepository::<BodyRecord>::new()),
                engine.clone(),
                baselines.clone(),
            ),
            TrackedRepository::new(
                Arc::new(InMemoryRecordRepository::<StepsRecord>::new()),
                engine.clone(),
                baselines,
            ),
            store.clone(),
            "daylog-engine",
        );
        let config = EngineConfig {
            sync_initial_backoff_ms: 1,
            sync_max_backoff_ms: 5,
            ..Default::default()
        };
        let sync = SyncOrchestrator::new(health.clone(), importer, store.clone(), clock.clone(), &config);
        Fixture { health, store, engine, clock, sync }
    }

    fn steps(id: &str, at: NaiveDateTime, count: i64) -> ExternalSample {
        ExternalSample {
            external_id: id.into(),
            start: at,
            end: at,
            value: SampleValue::Steps { count },
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_sync_imports_and_sets_watermark() {
        let fx = fixture(InMemoryHealthStore::fully_authorized());
        fx.health.insert_sample(steps("hk-1", at(9, 8), 3000));
        fx.health.insert_sample(steps("hk-2", at(1, 8), 9999)); // outside the window

        let report = fx.sync.sync("u1", 7).await.unwrap();
        assert_eq!(report.category(HealthCategory::Steps).unwrap().created, 1);
        assert_eq!(fx.sync.last_sync_date("u1").await.unwrap(), Some(at(10, 12)));
        assert_eq!(*fx.sync.sync_state("u1").borrow(), SyncState::Succeeded);

        let log = fx.engine.get_aggregate(at(9, 0).date(), "u1").await.unwrap();
        assert_eq!(log.steps(), 3000);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_without_watermark() {
        let fx = fixture(InMemoryHealthStore::fully_authorized());
        fx.health.set_available(false);

        let err = fx.sync.sync("u1", 7).await.unwrap_err();
        assert!(matches!(err, EngineError::Authorization(_)));
        assert_eq!(fx.sync.last_sync_date("u1").await.unwrap(), None);
        assert_eq!(*fx.sync.sync_state("u1").borrow(), SyncState::Failed);
    }

    #[tokio::test]
    async fn test_fully_denied_is_successful_noop() {
        let fx = fixture(InMemoryHealthStore::new());
        fx.health.insert_sample(steps("hk-1", at(9, 8), 3000));

        let report = fx.sync.sync("u1", 7).await.unwrap();
        assert_eq!(report.pulled(), 0);
        assert_eq!(fx.health.read_calls(), 0);
        assert_eq!(fx.store.log_count(), 0);
        assert!(fx.sync.last_sync_date("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_transient_reads_are_retried() {
        let fx = fixture(InMemoryHealthStore::fully_authorized());
        fx.health.insert_sample(steps("hk-1", at(9, 8), 3000));
        fx.health.fail_next_reads(2);

        let report = fx.sync.sync("u1", 7).await.unwrap();
        assert_eq!(report.category(HealthCategory::Steps).unwrap().created, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_sync() {
        let fx = fixture(InMemoryHealthStore::fully_authorized());
        fx.health.fail_next_reads(100);

        let err = fx.sync.sync("u1", 7).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(fx.sync.last_sync_date("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sync_since_uses_watermark() {
        let fx = fixture(InMemoryHealthStore::fully_authorized());
        fx.sync.sync("u1", 7).await.unwrap();

        fx.clock.advance(Duration::hours(6));
        fx.health.insert_sample(steps("hk-old", at(10, 9), 100));
        fx.health.insert_sample(steps("hk-new", at(10, 15), 200));

        let report = fx.sync.sync_since("u1", None).await.unwrap();
        assert_eq!(report.window.start, at(10, 12));
        assert_eq!(report.category(HealthCategory::Steps).unwrap().created, 1);
        assert_eq!(fx.sync.last_sync_date("u1").await.unwrap(), Some(at(10, 18)));
    }

    #[tokio::test]
    async fn test_sync_since_future_rejected() {
        let fx = fixture(InMemoryHealthStore::fully_authorized());
        let err = fx.sync.sync_since("u1", Some(at(11, 0))).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_syncs_share_one_flight() {
        let fx = fixture(InMemoryHealthStore::fully_authorized());
        fx.health.insert_sample(steps("hk-1", at(9, 8), 3000));
        fx.health.set_read_delay(std::time::Duration::from_millis(50));

        let (a, b) = tokio::join!(fx.sync.sync("u1", 7), fx.sync.sync("u1", 7));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(fx.health.read_calls(), HealthCategory::PULLED.len());

        let log = fx.engine.get_aggregate(at(9, 0).date(), "u1").await.unwrap();
        assert_eq!(log.steps(), 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_cancels_in_flight_sync() {
        let fx = fixture(InMemoryHealthStore::fully_authorized());
        fx.health.insert_sample(steps("hk-1", at(9, 8), 3000));
        fx.health.set_read_delay(std::time::Duration::from_secs(5));

        let sync = fx.sync.clone();
        let flight = tokio::spawn(async move { sync.sync("u1", 7).await });
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        fx.sync.disable("u1").await.unwrap();
        let err = flight.await.unwrap().unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
        assert_eq!(fx.sync.last_sync_date("u1").await.unwrap(), None);
        assert_eq!(*fx.sync.sync_state("u1").borrow(), SyncState::Idle);

        // A fresh sync starts a new flight
        fx.health.set_read_delay(std::time::Duration::ZERO);
        assert!(fx.sync.sync("u1", 7).await.is_ok());
    }

    /// Takes a while to answer, holding an import mid-flight.
    struct SlowBaseline;

    #[async_trait::async_trait]
    impl BaselineProvider for SlowBaseline {
        async fn baseline(&self, _user_id: &str, _date: NaiveDate) -> MetabolicBaseline {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            MetabolicBaseline { bmr: 1500, tdee: 2000 }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_during_last_import_keeps_watermark_cleared() {
        let fx = fixture_with(InMemoryHealthStore::fully_authorized(), Arc::new(SlowBaseline));
        fx.health.insert_sample(ExternalSample {
            external_id: "run-1".into(),
            start: at(9, 18),
            end: at(9, 19),
            value: SampleValue::Workout { activity: "run".into(), kcal: 500 },
            metadata: BTreeMap::new(),
        });

        let sync = fx.sync.clone();
        let flight = tokio::spawn(async move { sync.sync("u1", 7).await });
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        fx.sync.disable("u1").await.unwrap();
        assert_eq!(flight.await.unwrap().unwrap_err(), EngineError::Cancelled);
        assert_eq!(fx.sync.last_sync_date("u1").await.unwrap(), None);
        assert_eq!(*fx.sync.sync_state("u1").borrow(), SyncState::Idle);

        // The import that was under way still landed whole.
        let log = fx.engine.get_aggregate(at(9, 0).date(), "u1").await.unwrap();
        assert_eq!(log.exercise_count(), 1);
        assert_eq!(log.total_calories_out(), 500);
    }
}
