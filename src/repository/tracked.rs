// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! CRUD that keeps the daily aggregate in step.
//!
//! | CRUD     | Delta                                                  |
//! |----------|--------------------------------------------------------|
//! | create   | `Add(new)` on the record's date                        |
//! | update   | `Update { old, new }`, or `Remove` + `Add` across days |
//! | delete   | `Remove(last-known)` on the record's date              |
//!
//! The record write happens first. If the delta then fails, the record
//! write is undone so the aggregate keeps matching the records on disk.
//!
//! Read-old, write, delta runs under a per-(user, record id) lock, so two
//! edits of one record never both diff against the same old value.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, error, instrument};

use super::RecordRepository;
use crate::aggregation::{BaselineProvider, DeltaEngine, KeyGuard, KeyedLocks};
use crate::error::EngineError;
use crate::model::{DailyLog, Delta, TrackedRecord};

type RecordKey = (String, String);

pub struct TrackedRepository<R: TrackedRecord> {
    inner: Arc<dyn RecordRepository<R>>,
    engine: Arc<DeltaEngine>,
    baselines: Arc<dyn BaselineProvider>,
    records: KeyedLocks<RecordKey>,
}

impl<R: TrackedRecord> Clone for TrackedRepository<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            engine: self.engine.clone(),
            baselines: self.baselines.clone(),
            records: self.records.clone(),
        }
    }
}

impl<R: TrackedRecord> TrackedRepository<R> {
    pub fn new(
        inner: Arc<dyn RecordRepository<R>>,
        engine: Arc<DeltaEngine>,
        baselines: Arc<dyn BaselineProvider>,
    ) -> Self {
        Self {
            inner,
            engine,
            baselines,
            records: KeyedLocks::new(),
        }
    }

    /// Store a new record and add its contribution to its day.
    #[instrument(skip(self, record), fields(kind = R::KIND, id = record.id(), user_id = record.user_id()))]
    pub async fn create(&self, record: R) -> Result<DailyLog, EngineError> {
        check_owner(&record)?;
        let delta = Delta::Add(record.contribution());
        delta.validate()?;

        let _record = self.lock_record(record.user_id(), record.id()).await;
        self.inner.create(&record).await?;

        match self.apply(record.date(), record.user_id(), &delta).await {
            Ok(log) => Ok(log),
            Err(e) => {
                if let Err(undo) = self.inner.delete(record.user_id(), record.id()).await {
                    error!(error = %undo, "Could not roll back record after failed delta");
                }
                Err(e)
            }
        }
    }

    pub async fn get(&self, user_id: &str, id: &str) -> Result<R, EngineError> {
        self.inner
            .get(user_id, id)
            .await?
            .ok_or_else(|| EngineError::not_found(R::KIND, id))
    }

    /// Replace a record and move the aggregate by the difference.
    ///
    /// Returns the aggregate of the record's (new) date.
    #[instrument(skip(self, record), fields(kind = R::KIND, id = record.id(), user_id = record.user_id()))]
    pub async fn update(&self, record: R) -> Result<DailyLog, EngineError> {
        check_owner(&record)?;
        let _record = self.lock_record(record.user_id(), record.id()).await;
        let old = self.get(record.user_id(), record.id()).await?;
        let user_id = record.user_id();

        let same_day = old.date() == record.date();
        let update = Delta::Update { old: old.contribution(), new: record.contribution() };
        update.validate()?;

        self.inner.update(&record).await?;

        let result = if same_day {
            self.apply(record.date(), user_id, &update).await
        } else {
            debug!(from = %old.date(), to = %record.date(), "Record moved to another day");
            self.move_between_days(&old, &record).await
        };

        if result.is_err() {
            if let Err(undo) = self.inner.update(&old).await {
                error!(error = %undo, "Could not restore record after failed delta");
            }
        }
        result
    }

    /// Delete a record and remove its last-known contribution.
    ///
    /// Returns the deleted record and the aggregate of its date.
    #[instrument(skip(self), fields(kind = R::KIND))]
    pub async fn delete(&self, user_id: &str, id: &str) -> Result<(R, DailyLog), EngineError> {
        let _record = self.lock_record(user_id, id).await;
        let old = self.get(user_id, id).await?;
        self.inner.delete(user_id, id).await?;

        match self.apply(old.date(), user_id, &Delta::Remove(old.contribution())).await {
            Ok(log) => Ok((old, log)),
            Err(e) => {
                if let Err(undo) = self.inner.create(&old).await {
                    error!(error = %undo, "Could not restore record after failed delta");
                }
                Err(e)
            }
        }
    }

    pub async fn fetch_by_date(&self, user_id: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<R>, EngineError> {
        if from > to {
            return Err(EngineError::Validation(format!("range start {} is after end {}", from, to)));
        }
        Ok(self.inner.fetch_by_date(user_id, from, to).await?)
    }

    async fn move_between_days(&self, old: &R, new: &R) -> Result<DailyLog, EngineError> {
        let user_id = new.user_id();
        self.apply(old.date(), user_id, &Delta::Remove(old.contribution())).await?;

        match self.apply(new.date(), user_id, &Delta::Add(new.contribution())).await {
            Ok(log) => Ok(log),
            Err(e) => {
                // Put the old contribution back where it was.
                if let Err(undo) = self.apply(old.date(), user_id, &Delta::Add(old.contribution())).await {
                    error!(error = %undo, date = %old.date(), "Could not restore contribution after failed move");
                }
                Err(e)
            }
        }
    }

    async fn lock_record(&self, user_id: &str, id: &str) -> KeyGuard<RecordKey> {
        self.records.acquire((user_id.to_string(), id.to_string())).await
    }

    async fn apply(&self, date: NaiveDate, user_id: &str, delta: &Delta) -> Result<DailyLog, EngineError> {
        let baseline = self.baselines.baseline(user_id, date).await;
        self.engine.apply_delta(date, user_id, delta, baseline).await
    }
}

fn check_owner<R: TrackedRecord>(record: &R) -> Result<(), EngineError> {
    if record.user_id().is_empty() {
        return Err(EngineError::Validation(format!("{} record has no owner", R::KIND)));
    }
    if record.id().is_empty() {
        return Err(EngineError::Validation(format!("{} record has no id", R::KIND)));
    }
    Ok(())
}
