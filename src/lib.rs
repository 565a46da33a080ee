// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Daylog Engine
//!
//! Per-user daily health aggregates, kept current by deltas and synced both
//! ways with a platform health store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Tracked Repositories                     │
//! │  • exercise / food / sleep / body / steps CRUD             │
//! │  • every write emits Add / Update / Remove deltas          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Delta Engine                          │
//! │  • serialized per (user, logical date)                     │
//! │  • recompute, check invariants, persist, broadcast         │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                      │
//!          ▼                                      ▼
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │     Aggregate Store      │      │   Annotation Service     │
//! │  • memory or SQLite/MySQL│      │  • fast tier (LRU, TTL)  │
//! └──────────────────────────┘      │  • durable tier          │
//!                                   │  • rate-limited generator│
//!                                   └──────────────────────────┘
//!          ▲
//!          │ import (ledger-deduplicated)
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Sync Orchestrator / Exporter                │
//! │  • authorization gate before every pull and push           │
//! │  • one flight per user, watermark on success               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use daylog_engine::{EngineConfig, EngineParts, HealthEngine};
//! use daylog_engine::health::InMemoryHealthStore;
//! use daylog_engine::model::{FoodRecord, MealCategory};
//! # use daylog_engine::annotation::{Annotation, AnnotationGenerator, AnnotationRequest, GeneratorError};
//! # struct Generator;
//! # #[async_trait::async_trait]
//! # impl AnnotationGenerator for Generator {
//! #     async fn generate(&self, _: &AnnotationRequest) -> Result<Annotation, GeneratorError> {
//! #         Ok(Annotation { text: "Balanced day".into(), score: 70 })
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = EngineConfig {
//!         sql_url: Some("sqlite:daylog.db?mode=rwc".into()),
//!         ..Default::default()
//!     };
//!     let health = Arc::new(InMemoryHealthStore::fully_authorized());
//!     let parts = EngineParts::from_config(&config, health, Arc::new(Generator))
//!         .await
//!         .expect("Failed to open store");
//!     let engine = HealthEngine::new(config, parts);
//!
//!     let day = chrono::NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
//!     let lunch = FoodRecord::new("u1", day, MealCategory::Lunch, "Salad", 450)
//!         .with_macros(30.0, 20.0, 15.0);
//!     let log = engine.food().create(lunch).await.unwrap();
//!     println!("net: {}", log.net_calories());
//!
//!     engine.sync("u1", 7).await.unwrap();
//!     let note = engine.get_annotation(day, "u1", None).await.unwrap();
//!     println!("{}", note.annotation.text);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`HealthEngine`] facade
//! - [`aggregation`]: Delta engine, per-key locks, hooks
//! - [`model`]: `DailyLog`, deltas, records
//! - [`repository`]: Record CRUD that keeps aggregates in step
//! - [`sync`]: Pull orchestrator, importer, exporter
//! - [`health`]: Health store contract and authorization gate
//! - [`annotation`]: Two-tier annotation cache and generator budget
//! - [`storage`]: Memory and SQL backends
//! - [`resilience`]: Retry with backoff

pub mod aggregation;
pub mod annotation;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod logical_date;
pub mod metrics;
pub mod model;
pub mod repository;
pub mod resilience;
pub mod storage;
pub mod sync;

pub use aggregation::{AggregateChanged, BaselineProvider, DeltaEngine, FixedBaseline};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use coordinator::{EngineParts, HealthEngine};
pub use error::EngineError;
pub use resilience::retry::RetryConfig;
pub use storage::{InMemoryStore, SqlStore, StorageError};
pub use sync::{SyncReport, SyncState};
