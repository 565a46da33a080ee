// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine facade.
//!
//! The [`HealthEngine`] wires every component together:
//! - Delta engine over the aggregate store, with per-day serialization
//! - Tracked repositories for each record type
//! - Sync orchestrator and exporter against the external health store
//! - Two-tier annotation service, invalidated by food deltas
//!
//! # Wiring
//!
//! ```text
//!   TrackedRepository<R> ──delta──► DeltaEngine ──► AggregateStore
//!          ▲                            │
//!          │ import                     ├──broadcast──► subscribers
//!   SyncOrchestrator ◄── HealthStore    └──hook──► AnnotationService
//!                            ▲
//!   Exporter ────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use daylog_engine::{EngineConfig, EngineParts, HealthEngine};
//! use daylog_engine::health::InMemoryHealthStore;
//! use daylog_engine::model::ExerciseRecord;
//! # use daylog_engine::annotation::{Annotation, AnnotationGenerator, AnnotationRequest, GeneratorError};
//! # struct Fixed;
//! # #[async_trait::async_trait]
//! # impl AnnotationGenerator for Fixed {
//! #     async fn generate(&self, _: &AnnotationRequest) -> Result<Annotation, GeneratorError> {
//! #         Ok(Annotation { text: "ok".into(), score: 50 })
//! #     }
//! # }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = EngineConfig::default();
//! let parts = EngineParts::in_memory(&config, Arc::new(InMemoryHealthStore::new()), Arc::new(Fixed));
//! let engine = HealthEngine::new(config, parts);
//!
//! let at = chrono::NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(7, 0, 0).unwrap();
//! let log = engine.exercise().create(ExerciseRecord::new("u1", "run", at, 60, 400)).await.unwrap();
//! assert_eq!(log.exercise_minutes(), 60);
//! # }
//! ```

mod aggregate_api;
mod annotation_api;
mod sync_api;

use std::sync::Arc;

use tracing::info;

use crate::aggregation::{BaselineProvider, DeltaEngine, FixedBaseline};
use crate::annotation::{AnnotationGenerator, AnnotationService};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::health::HealthStore;
use crate::model::{BodyRecord, ExerciseRecord, FoodRecord, SleepRecord, StepsRecord};
use crate::repository::{InMemoryRecordRepository, RecordRepository, TrackedRepository};
use crate::storage::{AggregateStore, AnnotationStore, InMemoryStore, SqlStore, SyncLedger, WatermarkStore};
use crate::sync::{Exporter, Importer, SyncOrchestrator};

/// Collaborators the engine runs against.
///
/// Swap any field for a real implementation; [`EngineParts::in_memory`]
/// and [`EngineParts::with_store`] fill in the rest.
pub struct EngineParts {
    pub aggregates: Arc<dyn AggregateStore>,
    pub watermarks: Arc<dyn WatermarkStore>,
    pub annotations: Arc<dyn AnnotationStore>,
    pub ledger: Arc<dyn SyncLedger>,
    pub exercise: Arc<dyn RecordRepository<ExerciseRecord>>,
    pub food: Arc<dyn RecordRepository<FoodRecord>>,
    pub sleep: Arc<dyn RecordRepository<SleepRecord>>,
    pub body: Arc<dyn RecordRepository<BodyRecord>>,
    pub steps: Arc<dyn RecordRepository<StepsRecord>>,
    pub health: Arc<dyn HealthStore>,
    pub generator: Arc<dyn AnnotationGenerator>,
    pub baselines: Arc<dyn BaselineProvider>,
    pub clock: Arc<dyn Clock>,
}

impl EngineParts {
    /// One backend for aggregates, watermarks, annotations and ledgers;
    /// in-memory record repositories.
    pub fn with_store<S>(
        config: &EngineConfig,
        store: Arc<S>,
        health: Arc<dyn HealthStore>,
        generator: Arc<dyn AnnotationGenerator>,
    ) -> Self
    where
        S: AggregateStore + WatermarkStore + AnnotationStore + SyncLedger + 'static,
    {
        Self {
            aggregates: store.clone(),
            watermarks: store.clone(),
            annotations: store.clone(),
            ledger: store,
            exercise: Arc::new(InMemoryRecordRepository::<ExerciseRecord>::new()),
            food: Arc::new(InMemoryRecordRepository::<FoodRecord>::new()),
            sleep: Arc::new(InMemoryRecordRepository::<SleepRecord>::new()),
            body: Arc::new(InMemoryRecordRepository::<BodyRecord>::new()),
            steps: Arc::new(InMemoryRecordRepository::<StepsRecord>::new()),
            health,
            generator,
            baselines: Arc::new(FixedBaseline(config.default_baseline())),
            clock: Arc::new(SystemClock),
        }
    }

    /// Everything in memory.
    pub fn in_memory(
        config: &EngineConfig,
        health: Arc<dyn HealthStore>,
        generator: Arc<dyn AnnotationGenerator>,
    ) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()), health, generator)
    }

    /// SQL-backed when `config.sql_url` is set, in memory otherwise.
    pub async fn from_config(
        config: &EngineConfig,
        health: Arc<dyn HealthStore>,
        generator: Arc<dyn AnnotationGenerator>,
    ) -> Result<Self, EngineError> {
        match &config.sql_url {
            Some(url) => {
                let store = Arc::new(SqlStore::new(url).await?);
                Ok(Self::with_store(config, store, health, generator))
            }
            None => Ok(Self::in_memory(config, health, generator)),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_baselines(mut self, baselines: Arc<dyn BaselineProvider>) -> Self {
        self.baselines = baselines;
        self
    }
}

/// Daily aggregation and health-store sync for many users.
///
/// `Send + Sync`; share it behind an `Arc`.
pub struct HealthEngine {
    pub(super) config: EngineConfig,
    pub(super) deltas: Arc<DeltaEngine>,
    pub(super) baselines: Arc<dyn BaselineProvider>,
    pub(super) exercise: TrackedRepository<ExerciseRecord>,
    pub(super) food: TrackedRepository<FoodRecord>,
    pub(super) sleep: TrackedRepository<SleepRecord>,
    pub(super) body: TrackedRepository<BodyRecord>,
    pub(super) steps: TrackedRepository<StepsRecord>,
    pub(super) sync: SyncOrchestrator,
    pub(super) exporter: Exporter,
    pub(super) health: Arc<dyn HealthStore>,
    pub(super) annotations: Arc<AnnotationService>,
}

impl HealthEngine {
    pub fn new(config: EngineConfig, parts: EngineParts) -> Self {
        let deltas = Arc::new(DeltaEngine::new(parts.aggregates.clone()));

        let annotations = Arc::new(AnnotationService::new(
            &config,
            parts.annotations,
            parts.aggregates,
            parts.generator,
        ));
        deltas.add_hook(annotations.clone());

        let baselines = parts.baselines;
        let exercise = TrackedRepository::new(parts.exercise, deltas.clone(), baselines.clone());
        let food = TrackedRepository::new(parts.food, deltas.clone(), baselines.clone());
        let sleep = TrackedRepository::new(parts.sleep, deltas.clone(), baselines.clone());
        let body = TrackedRepository::new(parts.body, deltas.clone(), baselines.clone());
        let steps = TrackedRepository::new(parts.steps, deltas.clone(), baselines.clone());

        let importer = Importer::new(
            exercise.clone(),
            sleep.clone(),
            body.clone(),
            steps.clone(),
            parts.ledger.clone(),
            config.origin_tag.clone(),
        );
        let sync = SyncOrchestrator::new(
            parts.health.clone(),
            importer,
            parts.watermarks,
            parts.clock,
            &config,
        );
        let exporter = Exporter::new(
            parts.health.clone(),
            parts.ledger,
            config.origin_tag.clone(),
            config.sync_retry(),
        );

        info!(
            origin_tag = %config.origin_tag,
            annotation_capacity = config.annotation_cache_capacity,
            "Health engine created"
        );

        Self {
            config,
            deltas,
            baselines,
            exercise,
            food,
            sleep,
            body,
            steps,
            sync,
            exporter,
            health: parts.health,
            annotations,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
