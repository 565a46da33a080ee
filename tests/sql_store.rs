//! SQLite-backed storage tests.
//!
//! Each test opens a fresh database file in a temp dir, so they can run in
//! parallel without sharing state.
//!
//! Run with: `cargo test --test sql_store`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tempfile::TempDir;

use daylog_engine::annotation::{
    Annotation, AnnotationGenerator, AnnotationKey, AnnotationRequest, AnnotationSource, GeneratorError,
};
use daylog_engine::health::{HealthCategory, InMemoryHealthStore};
use daylog_engine::model::{Contribution, DailyLog, Delta, ExerciseRecord, MealCategory, MetabolicBaseline};
use daylog_engine::storage::{AggregateStore, AnnotationStore, SyncLedger, WatermarkStore};
use daylog_engine::{EngineConfig, EngineParts, HealthEngine, SqlStore};

fn sqlite_url(dir: &TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("daylog.db").display())
}

async fn open(dir: &TempDir) -> SqlStore {
    SqlStore::new(&sqlite_url(dir)).await.expect("Failed to open SQLite store")
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
}

fn at(d: u32, h: u32) -> NaiveDateTime {
    day(d).and_hms_opt(h, 0, 0).unwrap()
}

fn baseline() -> MetabolicBaseline {
    MetabolicBaseline { bmr: 1500, tdee: 2000 }
}

// =============================================================================
// Store contracts
// =============================================================================

#[tokio::test]
async fn test_daily_log_roundtrip_and_range() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;

    for d in [3, 1, 2] {
        let log = DailyLog::new("u1", day(d), baseline())
            .applied(&Delta::Add(Contribution::Steps { count: 1000 * i64::from(d) }));
        store.save_log(&log).await.unwrap();
    }
    store.save_log(&DailyLog::new("u2", day(2), baseline())).await.unwrap();

    let loaded = store.load_log("u1", day(2)).await.unwrap().unwrap();
    assert_eq!(loaded.steps(), 2000);
    assert_eq!(loaded.net_calories(), -2000);
    assert!(store.load_log("u1", day(9)).await.unwrap().is_none());

    let range = store.logs_between("u1", day(1), day(2)).await.unwrap();
    let dates: Vec<NaiveDate> = range.iter().map(DailyLog::date).collect();
    assert_eq!(dates, vec![day(1), day(2)]);

    // Upsert replaces
    let bigger = loaded.applied(&Delta::Add(Contribution::Steps { count: 500 }));
    store.save_log(&bigger).await.unwrap();
    assert_eq!(store.load_log("u1", day(2)).await.unwrap().unwrap().steps(), 2500);
}

#[tokio::test]
async fn test_watermark_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;

    assert_eq!(store.load_watermark("u1").await.unwrap(), None);
    store.save_watermark("u1", at(1, 8)).await.unwrap();
    store.save_watermark("u1", at(2, 9)).await.unwrap();
    assert_eq!(store.load_watermark("u1").await.unwrap(), Some(at(2, 9)));

    store.clear_watermark("u1").await.unwrap();
    assert_eq!(store.load_watermark("u1").await.unwrap(), None);
}

#[tokio::test]
async fn test_annotations_delete_by_key_and_day() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;
    let note = Annotation { text: "Solid protein".into(), score: 80 };

    let whole = AnnotationKey::whole_day("u1", day(1));
    let lunch = AnnotationKey::meal("u1", day(1), MealCategory::Lunch);
    let other_day = AnnotationKey::whole_day("u1", day(2));
    for key in [&whole, &lunch, &other_day] {
        store.save_annotation(key, &note).await.unwrap();
    }
    assert_eq!(store.load_annotation(&lunch).await.unwrap(), Some(note.clone()));

    store.delete_annotation(&lunch).await.unwrap();
    assert_eq!(store.load_annotation(&lunch).await.unwrap(), None);
    assert!(store.load_annotation(&whole).await.unwrap().is_some());

    store.delete_annotations_for_day("u1", day(1)).await.unwrap();
    assert_eq!(store.load_annotation(&whole).await.unwrap(), None);
    assert_eq!(store.load_annotation(&other_day).await.unwrap(), Some(note));
}

#[tokio::test]
async fn test_sync_ledger_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir).await;

    store.record_import("u1", HealthCategory::Steps, "hk-1", "local-1").await.unwrap();
    assert_eq!(
        store.imported("u1", HealthCategory::Steps, "hk-1").await.unwrap(),
        Some("local-1".to_string())
    );
    assert_eq!(store.imported("u2", HealthCategory::Steps, "hk-1").await.unwrap(), None);
    store.forget_import("u1", HealthCategory::Steps, "hk-1").await.unwrap();
    assert_eq!(store.imported("u1", HealthCategory::Steps, "hk-1").await.unwrap(), None);

    store.record_export("u1", "run-1", HealthCategory::Workouts, "ext-1").await.unwrap();
    store.record_export("u1", "run-1", HealthCategory::ActiveEnergy, "ext-2").await.unwrap();
    let mut exports = store.exports_for_local("u1", "run-1").await.unwrap();
    exports.sort();
    assert_eq!(
        exports,
        vec![
            (HealthCategory::ActiveEnergy, "ext-2".to_string()),
            (HealthCategory::Workouts, "ext-1".to_string()),
        ]
    );
    assert!(store.is_exported("u1", "ext-1").await.unwrap());
    assert!(!store.is_exported("u2", "ext-1").await.unwrap());

    store.forget_export("u1", "run-1").await.unwrap();
    assert!(store.exports_for_local("u1", "run-1").await.unwrap().is_empty());
    assert!(!store.is_exported("u1", "ext-1").await.unwrap());
}

// =============================================================================
// Engine restart
// =============================================================================

#[derive(Default)]
struct CountingGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl AnnotationGenerator for CountingGenerator {
    async fn generate(&self, _request: &AnnotationRequest) -> Result<Annotation, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Annotation { text: "Good pacing".into(), score: 75 })
    }
}

async fn engine(config: &EngineConfig, generator: Arc<CountingGenerator>) -> HealthEngine {
    let parts = EngineParts::from_config(config, Arc::new(InMemoryHealthStore::new()), generator)
        .await
        .expect("Failed to build engine parts");
    HealthEngine::new(config.clone(), parts)
}

#[tokio::test]
async fn test_aggregates_and_annotations_survive_restart() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig {
        sql_url: Some(sqlite_url(&dir)),
        ..Default::default()
    };
    let generator = Arc::new(CountingGenerator::default());

    {
        let first = engine(&config, generator.clone()).await;
        first
            .exercise()
            .create(ExerciseRecord::new("u1", "swim", at(1, 7), 40, 300))
            .await
            .unwrap();
        let note = first.get_annotation(day(1), "u1", None).await.unwrap();
        assert_eq!(note.source, AnnotationSource::Generated);
    }

    let second = engine(&config, generator.clone()).await;
    let log = second.get_aggregate(day(1), "u1").await.unwrap();
    assert_eq!(log.exercise_count(), 1);
    assert_eq!(log.total_calories_out(), 300);

    let note = second.get_annotation(day(1), "u1", None).await.unwrap();
    assert_eq!(note.source, AnnotationSource::Durable);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}
