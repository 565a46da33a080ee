// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Aggregate reads, direct deltas and record access.

use chrono::NaiveDate;
use tokio::sync::broadcast;

use super::HealthEngine;
use crate::aggregation::AggregateChanged;
use crate::error::EngineError;
use crate::model::{
    BodyRecord, DailyLog, Delta, ExerciseRecord, FoodRecord, MetabolicBaseline, SleepRecord, StepsRecord,
};
use crate::repository::TrackedRepository;

impl HealthEngine {
    /// The stored aggregate for one day. `NotFound` if nothing was logged.
    pub async fn get_aggregate(&self, date: NaiveDate, user_id: &str) -> Result<DailyLog, EngineError> {
        self.deltas.get_aggregate(date, user_id).await
    }

    pub async fn aggregates_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyLog>, EngineError> {
        self.deltas.aggregates_between(user_id, from, to).await
    }

    /// Apply a delta that isn't backed by a tracked record.
    ///
    /// Prefer the record accessors: they keep records and aggregate in step.
    pub async fn apply_delta(&self, date: NaiveDate, user_id: &str, delta: &Delta) -> Result<DailyLog, EngineError> {
        let baseline = self.baselines.baseline(user_id, date).await;
        self.deltas.apply_delta(date, user_id, delta, baseline).await
    }

    pub async fn rebase(
        &self,
        date: NaiveDate,
        user_id: &str,
        baseline: MetabolicBaseline,
    ) -> Result<DailyLog, EngineError> {
        self.deltas.rebase(date, user_id, baseline).await
    }

    /// Snapshot of every aggregate after it is persisted.
    pub fn subscribe(&self) -> broadcast::Receiver<AggregateChanged> {
        self.deltas.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Tracked records
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn exercise(&self) -> &TrackedRepository<ExerciseRecord> {
        &self.exercise
    }

    pub fn food(&self) -> &TrackedRepository<FoodRecord> {
        &self.food
    }

    pub fn sleep(&self) -> &TrackedRepository<SleepRecord> {
        &self.sleep
    }

    pub fn body(&self) -> &TrackedRepository<BodyRecord> {
        &self.body
    }

    pub fn steps(&self) -> &TrackedRepository<StepsRecord> {
        &self.steps
    }
}
