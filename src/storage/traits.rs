// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage collaborator contracts.
//!
//! Each concern gets its own trait with distinct method names so a single
//! backend ([`InMemoryStore`](super::InMemoryStore),
//! [`SqlStore`](super::SqlStore)) can implement all of them without call
//! sites becoming ambiguous.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::annotation::{Annotation, AnnotationKey};
use crate::health::HealthCategory;
use crate::model::DailyLog;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Data corruption detected for '{id}': {detail}")]
    Corruption { id: String, detail: String },
}

/// Current `DailyLog` per (user, logical date).
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn load_log(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyLog>, StorageError>;

    /// Insert or replace the log for `(log.user_id(), log.date())`.
    async fn save_log(&self, log: &DailyLog) -> Result<(), StorageError>;

    /// Logs in `from..=to`, ordered by date. Missing days are simply absent.
    async fn logs_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyLog>, StorageError>;
}

/// Per-user "last successful sync" instant.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn load_watermark(&self, user_id: &str) -> Result<Option<NaiveDateTime>, StorageError>;
    async fn save_watermark(&self, user_id: &str, at: NaiveDateTime) -> Result<(), StorageError>;
    async fn clear_watermark(&self, user_id: &str) -> Result<(), StorageError>;
}

/// Durable annotation tier. Unbounded, no expiry.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    async fn load_annotation(&self, key: &AnnotationKey) -> Result<Option<Annotation>, StorageError>;
    async fn save_annotation(&self, key: &AnnotationKey, annotation: &Annotation) -> Result<(), StorageError>;
    async fn delete_annotation(&self, key: &AnnotationKey) -> Result<(), StorageError>;

    /// Remove every key (whole-day and per-meal) for one user and date.
    async fn delete_annotations_for_day(&self, user_id: &str, date: NaiveDate) -> Result<(), StorageError>;
}

/// Links between local records and external samples.
///
/// The import side maps `(user, category, external id)` to the local record
/// created from it. The export side maps a local record to the external
/// samples written for it; one exercise can produce a workout and an
/// active-energy sample.
#[async_trait]
pub trait SyncLedger: Send + Sync {
    async fn imported(
        &self,
        user_id: &str,
        category: HealthCategory,
        external_id: &str,
    ) -> Result<Option<String>, StorageError>;

    async fn record_import(
        &self,
        user_id: &str,
        category: HealthCategory,
        external_id: &str,
        local_id: &str,
    ) -> Result<(), StorageError>;

    async fn forget_import(
        &self,
        user_id: &str,
        category: HealthCategory,
        external_id: &str,
    ) -> Result<(), StorageError>;

    async fn record_export(
        &self,
        user_id: &str,
        local_id: &str,
        category: HealthCategory,
        external_id: &str,
    ) -> Result<(), StorageError>;

    async fn exports_for_local(
        &self,
        user_id: &str,
        local_id: &str,
    ) -> Result<Vec<(HealthCategory, String)>, StorageError>;

    /// Whether `external_id` was written by this engine for `user_id`.
    async fn is_exported(&self, user_id: &str, external_id: &str) -> Result<bool, StorageError>;

    async fn forget_export(&self, user_id: &str, local_id: &str) -> Result<(), StorageError>;
}
