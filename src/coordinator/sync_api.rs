// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync, export and authorization.

use chrono::NaiveDateTime;
use tokio::sync::watch;
use tracing::warn;

use super::HealthEngine;
use crate::error::EngineError;
use crate::health::{AuthorizationGate, AuthorizationSummary};
use crate::sync::{ExportReport, Exportable, SyncReport, SyncState};

impl HealthEngine {
    /// Pull the last `window_days` days from the health store.
    pub async fn sync(&self, user_id: &str, window_days: u32) -> Result<SyncReport, EngineError> {
        self.sync.sync(user_id, window_days).await
    }

    /// Pull since `since`, or since the last successful sync.
    pub async fn sync_since(&self, user_id: &str, since: Option<NaiveDateTime>) -> Result<SyncReport, EngineError> {
        self.sync.sync_since(user_id, since).await
    }

    pub async fn last_sync_date(&self, user_id: &str) -> Result<Option<NaiveDateTime>, EngineError> {
        self.sync.last_sync_date(user_id).await
    }

    pub async fn clear_last_sync_date(&self, user_id: &str) -> Result<(), EngineError> {
        self.sync.clear_last_sync_date(user_id).await
    }

    pub fn sync_state(&self, user_id: &str) -> watch::Receiver<SyncState> {
        self.sync.sync_state(user_id)
    }

    /// Stop syncing for a user: cancels any in-flight run and clears the
    /// watermark. Local records and aggregates are kept.
    pub async fn disable_sync(&self, user_id: &str) -> Result<(), EngineError> {
        self.sync.disable(user_id).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Authorization
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn check_availability(&self) -> bool {
        self.gate().check_availability().await
    }

    /// Fresh permission snapshot; never cached.
    pub async fn authorization_summary(&self) -> AuthorizationSummary {
        self.gate().summarize().await
    }

    pub async fn request_authorization(&self) -> Result<AuthorizationSummary, EngineError> {
        self.gate().request_authorization().await
    }

    fn gate(&self) -> AuthorizationGate {
        AuthorizationGate::new(self.health.clone())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Export
    // ═══════════════════════════════════════════════════════════════════════════

    /// Push a local record to the health store.
    ///
    /// Denied categories are skipped and listed in the report.
    pub async fn export<R: Exportable>(&self, record: &R) -> Result<ExportReport, EngineError> {
        let report = self.exporter.export(record).await?;
        if !report.unauthorized.is_empty() {
            warn!(categories = ?report.unauthorized, "Export partially skipped for lack of write access");
        }
        Ok(report)
    }

    /// Remove what was exported for a local record, typically after it was deleted.
    pub async fn retract_export(&self, user_id: &str, local_id: &str) -> Result<usize, EngineError> {
        self.exporter.retract(user_id, local_id).await
    }
}
