// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local records → external samples.
//!
//! Every written sample carries the engine's origin tag and the local record
//! id in its metadata, and is recorded in the export ledger, so a later pull
//! recognizes it as our own. Write authorization is checked right before
//! each write; a denied category is skipped with a warning, never retried.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::health::{
    AuthorizationGate, HealthCategory, HealthStore, HealthStoreError, NewSample, SampleValue,
    LOCAL_ID_METADATA_KEY, ORIGIN_METADATA_KEY,
};
use crate::metrics;
use crate::model::{BodyMetric, BodyRecord, ExerciseRecord, SleepRecord, StepsRecord, TrackedRecord};
use crate::resilience::retry::{retry_if, RetryConfig};
use crate::storage::SyncLedger;

/// A record type with an external representation.
pub trait Exportable: TrackedRecord {
    /// `(start, end, value)` for each sample this record becomes.
    fn to_samples(&self) -> Vec<(NaiveDateTime, NaiveDateTime, SampleValue)>;
}

impl Exportable for ExerciseRecord {
    /// A workout, plus its calories as active energy.
    fn to_samples(&self) -> Vec<(NaiveDateTime, NaiveDateTime, SampleValue)> {
        let end = self.performed_at + Duration::minutes(self.duration_minutes);
        let mut out = vec![(
            self.performed_at,
            end,
            SampleValue::Workout { activity: self.activity.clone(), kcal: self.calories_burned },
        )];
        if self.calories_burned > 0 {
            out.push((self.performed_at, end, SampleValue::ActiveEnergy { kcal: self.calories_burned }));
        }
        out
    }
}

impl Exportable for BodyRecord {
    fn to_samples(&self) -> Vec<(NaiveDateTime, NaiveDateTime, SampleValue)> {
        let value = match self.metric {
            BodyMetric::Weight { kg } => SampleValue::Weight { kg },
            BodyMetric::BodyFat { percent } => SampleValue::BodyFat { percent },
        };
        vec![(self.measured_at, self.measured_at, value)]
    }
}

impl Exportable for SleepRecord {
    fn to_samples(&self) -> Vec<(NaiveDateTime, NaiveDateTime, SampleValue)> {
        vec![(self.bedtime, self.wake_time.max(self.bedtime), SampleValue::Sleep)]
    }
}

impl Exportable for StepsRecord {
    fn to_samples(&self) -> Vec<(NaiveDateTime, NaiveDateTime, SampleValue)> {
        let start = self.date.and_time(chrono::NaiveTime::MIN);
        vec![(start, start, SampleValue::Steps { count: self.count })]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Samples written, with their external ids.
    pub written: Vec<(HealthCategory, String)>,
    /// Categories skipped for lack of write access.
    pub unauthorized: Vec<HealthCategory>,
    /// The record was itself imported and was not pushed back.
    pub skipped_imported: bool,
}

impl ExportReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unauthorized.is_empty() && !self.skipped_imported
    }
}

#[derive(Clone)]
pub struct Exporter {
    store: Arc<dyn HealthStore>,
    gate: AuthorizationGate,
    ledger: Arc<dyn SyncLedger>,
    origin_tag: String,
    retry: RetryConfig,
}

impl Exporter {
    pub fn new(
        store: Arc<dyn HealthStore>,
        ledger: Arc<dyn SyncLedger>,
        origin_tag: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            gate: AuthorizationGate::new(store.clone()),
            store,
            ledger,
            origin_tag: origin_tag.into(),
            retry,
        }
    }

    /// Push a local record to the external store.
    ///
    /// A record exported before is retracted first, so the external store
    /// holds one copy of its current value.
    #[instrument(skip(self, record), fields(kind = R::KIND, id = record.id(), user_id = record.user_id()))]
    pub async fn export<R: Exportable>(&self, record: &R) -> Result<ExportReport, EngineError> {
        let mut report = ExportReport::default();
        if record.origin().is_imported() {
            debug!("Imported record, not exporting");
            report.skipped_imported = true;
            return Ok(report);
        }

        self.retract(record.user_id(), record.id()).await?;

        for (start, end, value) in record.to_samples() {
            let category = value.category();
            if let Err(e) = self.gate.ensure_can_write(category).await {
                if !matches!(e, EngineError::Authorization(_)) {
                    return Err(e);
                }
                warn!(%category, error = %e, "Export skipped");
                metrics::record_export(category.as_str(), "unauthorized");
                report.unauthorized.push(category);
                continue;
            }

            let sample = NewSample {
                start,
                end,
                value,
                metadata: self.metadata(record.id()),
            };
            let external_id = match self.write(&sample).await {
                Ok(id) => id,
                Err(HealthStoreError::AuthorizationDenied(_) | HealthStoreError::Unavailable) => {
                    // Revoked between the check and the write.
                    warn!(%category, "Write access lost mid-export");
                    metrics::record_export(category.as_str(), "unauthorized");
                    report.unauthorized.push(category);
                    continue;
                }
                Err(e) => {
                    metrics::record_export(category.as_str(), "error");
                    metrics::record_health_store_error("write_sample", e.kind());
                    return Err(e.into());
                }
            };

            self.ledger
                .record_export(record.user_id(), record.id(), category, &external_id)
                .await?;
            metrics::record_export(category.as_str(), "success");
            report.written.push((category, external_id));
        }

        info!(written = report.written.len(), unauthorized = report.unauthorized.len(), "Export finished");
        Ok(report)
    }

    /// Delete every sample exported for a local record.
    ///
    /// Returns how many samples were deleted. If any deletion is refused the
    /// ledger entries are kept, so those samples are still recognized as
    /// our own on the next pull.
    #[instrument(skip(self))]
    pub async fn retract(&self, user_id: &str, local_id: &str) -> Result<usize, EngineError> {
        let exported = self.ledger.exports_for_local(user_id, local_id).await?;
        if exported.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0;
        let mut refused = false;
        for (category, external_id) in &exported {
            let result = retry_if(
                "delete_sample",
                &self.retry,
                || async { self.store.delete_sample(*category, external_id).await },
                |e| matches!(e, HealthStoreError::Transient(_)),
            )
            .await;

            match result {
                Ok(()) => deleted += 1,
                Err(HealthStoreError::AuthorizationDenied(_) | HealthStoreError::Unavailable) => {
                    warn!(%category, %external_id, "Not allowed to delete exported sample");
                    refused = true;
                }
                Err(e) => {
                    metrics::record_health_store_error("delete_sample", e.kind());
                    return Err(e.into());
                }
            }
        }

        if !refused {
            self.ledger.forget_export(user_id, local_id).await?;
        }
        debug!(deleted, refused, "Export retracted");
        Ok(deleted)
    }

    async fn write(&self, sample: &NewSample) -> Result<String, HealthStoreError> {
        retry_if(
            "write_sample",
            &self.retry,
            || async { self.store.write_sample(sample).await },
            |e| matches!(e, HealthStoreError::Transient(_)),
        )
        .await
    }

    fn metadata(&self, local_id: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ORIGIN_METADATA_KEY.to_string(), self.origin_tag.clone()),
            (LOCAL_ID_METADATA_KEY.to_string(), local_id.to_string()),
        ])
    }
}
