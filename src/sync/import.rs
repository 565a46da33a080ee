// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pulled samples → local records.
//!
//! Imports go through the same [`TrackedRepository`] as user edits, so the
//! aggregate has one recomputation path and imported records show up in
//! record lists. The import ledger makes repeated pulls idempotent:
//!
//! | ledger entry | local record | action                         |
//! |--------------|--------------|--------------------------------|
//! | none         | -            | create, then record the link   |
//! | present      | exists       | update only if the value moved |
//! | present      | deleted      | skip                           |

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::state::ImportOutcome;
use crate::error::EngineError;
use crate::health::{ExternalSample, SampleValue};
use crate::model::{
    BodyMetric, BodyRecord, ExerciseRecord, RecordOrigin, SleepRecord, StepsRecord, TrackedRecord,
};
use crate::repository::TrackedRepository;
use crate::storage::SyncLedger;

/// A record type that can be built from a pulled sample.
pub trait Importable: TrackedRecord {
    /// Local shape of `sample`, or `None` if the sample doesn't map.
    fn from_sample(user_id: &str, sample: &ExternalSample) -> Option<Self>;

    /// Re-key onto the local id an earlier import created.
    fn set_id(&mut self, id: String);
}

fn imported(sample: &ExternalSample) -> RecordOrigin {
    RecordOrigin::Imported { external_id: sample.external_id.clone() }
}

impl Importable for BodyRecord {
    fn from_sample(user_id: &str, sample: &ExternalSample) -> Option<Self> {
        let metric = match sample.value {
            SampleValue::Weight { kg } => BodyMetric::Weight { kg },
            SampleValue::BodyFat { percent } => BodyMetric::BodyFat { percent },
            _ => return None,
        };
        let mut record = BodyRecord::new(user_id, metric, sample.start);
        record.origin = imported(sample);
        Some(record)
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Importable for StepsRecord {
    fn from_sample(user_id: &str, sample: &ExternalSample) -> Option<Self> {
        let SampleValue::Steps { count } = sample.value else {
            return None;
        };
        let mut record = StepsRecord::new(user_id, sample.start.date(), count);
        record.origin = imported(sample);
        Some(record)
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Importable for SleepRecord {
    fn from_sample(user_id: &str, sample: &ExternalSample) -> Option<Self> {
        if !matches!(sample.value, SampleValue::Sleep) {
            return None;
        }
        let mut record = SleepRecord::new(user_id, sample.start, sample.end);
        record.origin = imported(sample);
        Some(record)
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

impl Importable for ExerciseRecord {
    fn from_sample(user_id: &str, sample: &ExternalSample) -> Option<Self> {
        let SampleValue::Workout { activity, kcal } = &sample.value else {
            return None;
        };
        let minutes = (sample.end - sample.start).num_minutes().max(0);
        let mut record = ExerciseRecord::new(user_id, activity.clone(), sample.start, minutes, *kcal);
        record.origin = imported(sample);
        Some(record)
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// Applies pulled samples to local records.
#[derive(Clone)]
pub struct Importer {
    exercise: TrackedRepository<ExerciseRecord>,
    sleep: TrackedRepository<SleepRecord>,
    body: TrackedRepository<BodyRecord>,
    steps: TrackedRepository<StepsRecord>,
    ledger: Arc<dyn SyncLedger>,
    origin_tag: String,
}

impl Importer {
    pub fn new(
        exercise: TrackedRepository<ExerciseRecord>,
        sleep: TrackedRepository<SleepRecord>,
        body: TrackedRepository<BodyRecord>,
        steps: TrackedRepository<StepsRecord>,
        ledger: Arc<dyn SyncLedger>,
        origin_tag: impl Into<String>,
    ) -> Self {
        Self {
            exercise,
            sleep,
            body,
            steps,
            ledger,
            origin_tag: origin_tag.into(),
        }
    }

    /// Apply one sample. Either the record and its ledger link both land,
    /// or neither does.
    pub async fn import(&self, user_id: &str, sample: &ExternalSample) -> Result<ImportOutcome, EngineError> {
        if self.is_own_echo(user_id, sample).await? {
            debug!(external_id = %sample.external_id, "Skipping sample written by this engine");
            return Ok(ImportOutcome::OwnEcho);
        }

        match sample.value {
            SampleValue::Weight { .. } | SampleValue::BodyFat { .. } => {
                self.import_into(&self.body, user_id, sample).await
            }
            SampleValue::Steps { .. } => self.import_into(&self.steps, user_id, sample).await,
            SampleValue::Sleep => self.import_into(&self.sleep, user_id, sample).await,
            SampleValue::Workout { .. } => self.import_into(&self.exercise, user_id, sample).await,
            // Push-only: pulling it back would double-count workouts.
            SampleValue::ActiveEnergy { .. } => Ok(ImportOutcome::Unmapped),
        }
    }

    /// Origin tag survives the round trip on most platforms; the export
    /// ledger covers the ones that strip custom metadata.
    async fn is_own_echo(&self, user_id: &str, sample: &ExternalSample) -> Result<bool, EngineError> {
        if sample.origin() == Some(self.origin_tag.as_str()) {
            return Ok(true);
        }
        Ok(self.ledger.is_exported(user_id, &sample.external_id).await?)
    }

    async fn import_into<R: Importable>(
        &self,
        repo: &TrackedRepository<R>,
        user_id: &str,
        sample: &ExternalSample,
    ) -> Result<ImportOutcome, EngineError> {
        let Some(mut record) = R::from_sample(user_id, sample) else {
            return Ok(ImportOutcome::Unmapped);
        };
        let category = sample.category();
        let external_id = &sample.external_id;

        if let Some(local_id) = self.ledger.imported(user_id, category, external_id).await? {
            let existing = match repo.get(user_id, &local_id).await {
                Ok(existing) => existing,
                Err(EngineError::NotFound { .. }) => return Ok(ImportOutcome::DeletedLocally),
                Err(e) => return Err(e),
            };
            record.set_id(local_id);
            if existing.date() == record.date() && existing.contribution() == record.contribution() {
                return Ok(ImportOutcome::Unchanged);
            }
            repo.update(record).await?;
            return Ok(ImportOutcome::Updated);
        }

        let local_id = record.id().to_string();
        repo.create(record).await?;

        if let Err(e) = self.ledger.record_import(user_id, category, external_id, &local_id).await {
            // Without the link the next pull would create it again.
            warn!(external_id = %external_id, error = %e, "Import link not recorded, undoing record");
            if let Err(undo) = repo.delete(user_id, &local_id).await {
                error!(local_id = %local_id, error = %undo, "Could not undo imported record");
            }
            return Err(e.into());
        }
        Ok(ImportOutcome::Created)
    }
}
