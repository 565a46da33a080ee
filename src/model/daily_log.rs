// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The per-user, per-logical-day aggregate.
//!
//! Fields are private: every change goes through [`DailyLog::applied`] or
//! [`DailyLog::rebased`], both of which recompute the derived fields, so
//! `net_calories` can never drift from its inputs.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use daylog_engine::model::{Contribution, DailyLog, Delta, MetabolicBaseline};
//!
//! let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
//! let log = DailyLog::new("u1", day, MetabolicBaseline { bmr: 1500, tdee: 2100 });
//! let log = log.applied(&Delta::Add(Contribution::Exercise {
//!     calories_burned: 400,
//!     duration_minutes: 60,
//! }));
//!
//! assert_eq!(log.exercise_minutes(), 60);
//! assert_eq!(log.net_calories(), -2500);
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::body::{BodyMetric, Measurement};
use super::delta::{Contribution, Delta};
use super::nutrition::{Grams, MacroRatios};
use super::sleep::SleepSummary;
use crate::error::EngineError;

/// Upper bound for `bmr` and `tdee`. Anything above is a malformed baseline.
pub const MAX_BASELINE_CALORIES: i64 = 20_000;

/// Metabolic inputs supplied by the caller; not computed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetabolicBaseline {
    pub bmr: i64,
    pub tdee: i64,
}

impl MetabolicBaseline {
    /// Reject negative or absurd values before they reach a stored log.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (field, value) in [("bmr", self.bmr), ("tdee", self.tdee)] {
            if !(0..=MAX_BASELINE_CALORIES).contains(&value) {
                return Err(EngineError::Validation(format!(
                    "{} out of range: {} (expected 0..={})",
                    field, value, MAX_BASELINE_CALORIES
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLog {
    user_id: String,
    date: NaiveDate,

    total_calories_in: i64,
    total_carbs: Grams,
    total_protein: Grams,
    total_fat: Grams,
    macro_ratios: Option<MacroRatios>,

    bmr: i64,
    tdee: i64,
    total_calories_out: i64,
    exercise_minutes: i64,
    exercise_count: i64,

    net_calories: i64,

    steps: i64,
    weight: Option<Measurement>,
    body_fat: Option<Measurement>,
    sleep: Option<SleepSummary>,
}

impl DailyLog {
    /// Empty aggregate for a day nobody has written to yet.
    #[must_use]
    pub fn new(user_id: impl Into<String>, date: NaiveDate, baseline: MetabolicBaseline) -> Self {
        let mut log = Self {
            user_id: user_id.into(),
            date,
            total_calories_in: 0,
            total_carbs: Grams::ZERO,
            total_protein: Grams::ZERO,
            total_fat: Grams::ZERO,
            macro_ratios: None,
            bmr: baseline.bmr,
            tdee: baseline.tdee,
            total_calories_out: 0,
            exercise_minutes: 0,
            exercise_count: 0,
            net_calories: 0,
            steps: 0,
            weight: None,
            body_fat: None,
            sleep: None,
        };
        log.recompute();
        log
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    #[must_use]
    pub fn total_calories_in(&self) -> i64 {
        self.total_calories_in
    }

    #[must_use]
    pub fn total_carbs(&self) -> Grams {
        self.total_carbs
    }

    #[must_use]
    pub fn total_protein(&self) -> Grams {
        self.total_protein
    }

    #[must_use]
    pub fn total_fat(&self) -> Grams {
        self.total_fat
    }

    #[must_use]
    pub fn macro_ratios(&self) -> Option<MacroRatios> {
        self.macro_ratios
    }

    #[must_use]
    pub fn bmr(&self) -> i64 {
        self.bmr
    }

    #[must_use]
    pub fn tdee(&self) -> i64 {
        self.tdee
    }

    #[must_use]
    pub fn baseline(&self) -> MetabolicBaseline {
        MetabolicBaseline { bmr: self.bmr, tdee: self.tdee }
    }

    #[must_use]
    pub fn total_calories_out(&self) -> i64 {
        self.total_calories_out
    }

    #[must_use]
    pub fn exercise_minutes(&self) -> i64 {
        self.exercise_minutes
    }

    #[must_use]
    pub fn exercise_count(&self) -> i64 {
        self.exercise_count
    }

    /// `total_calories_in - (tdee + total_calories_out)`
    #[must_use]
    pub fn net_calories(&self) -> i64 {
        self.net_calories
    }

    #[must_use]
    pub fn steps(&self) -> i64 {
        self.steps
    }

    #[must_use]
    pub fn weight(&self) -> Option<Measurement> {
        self.weight
    }

    #[must_use]
    pub fn body_fat(&self) -> Option<Measurement> {
        self.body_fat
    }

    #[must_use]
    pub fn sleep(&self) -> Option<&SleepSummary> {
        self.sleep.as_ref()
    }

    /// Return a copy with `delta` applied and derived fields recomputed.
    ///
    /// The receiver is never modified; callers persist the copy and only
    /// then make it visible.
    #[must_use]
    pub fn applied(&self, delta: &Delta) -> Self {
        let mut next = self.clone();
        match delta {
            Delta::Add(c) => next.add(c, 1),
            Delta::Remove(c) => next.remove(c),
            Delta::Update { old, new } => next.update(old, new),
        }
        next.recompute();
        next
    }

    /// Return a copy with new metabolic inputs.
    #[must_use]
    pub fn rebased(&self, baseline: MetabolicBaseline) -> Self {
        let mut next = self.clone();
        next.bmr = baseline.bmr;
        next.tdee = baseline.tdee;
        next.recompute();
        next
    }

    /// Verify every invariant. Returns a description of the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        let totals = [
            ("total_calories_in", self.total_calories_in),
            ("total_carbs", self.total_carbs.decigrams()),
            ("total_protein", self.total_protein.decigrams()),
            ("total_fat", self.total_fat.decigrams()),
            ("bmr", self.bmr),
            ("tdee", self.tdee),
            ("total_calories_out", self.total_calories_out),
            ("exercise_minutes", self.exercise_minutes),
            ("exercise_count", self.exercise_count),
            ("steps", self.steps),
        ];
        if let Some((field, value)) = totals.iter().find(|(_, v)| *v < 0) {
            return Err(format!("{} is negative: {}", field, value));
        }

        let expected_net = net(self.total_calories_in, self.tdee, self.total_calories_out);
        if self.net_calories != expected_net {
            return Err(format!(
                "net_calories {} does not match formula ({})",
                self.net_calories, expected_net
            ));
        }

        if self.macro_ratios.is_some() != (self.total_calories_in > 0) {
            return Err("macro ratios present without intake (or missing with intake)".into());
        }

        if let Some(sleep) = &self.sleep {
            if sleep.duration_minutes < 0 {
                return Err(format!("sleep duration is negative: {}", sleep.duration_minutes));
            }
        }
        Ok(())
    }

    // count_step is 0 when an update re-adds an existing record.
    fn add(&mut self, c: &Contribution, count_step: i64) {
        match c {
            Contribution::Exercise { calories_burned, duration_minutes } => {
                self.total_calories_out = offset(self.total_calories_out, *calories_burned);
                self.exercise_minutes = offset(self.exercise_minutes, *duration_minutes);
                self.exercise_count = offset(self.exercise_count, count_step);
            }
            Contribution::Food { calories, carbs, protein, fat, .. } => {
                self.total_calories_in = offset(self.total_calories_in, *calories);
                self.total_carbs = self.total_carbs.offset_clamped(carbs.decigrams());
                self.total_protein = self.total_protein.offset_clamped(protein.decigrams());
                self.total_fat = self.total_fat.offset_clamped(fat.decigrams());
            }
            Contribution::Sleep { record_id, duration_minutes } => {
                self.sleep = Some(SleepSummary::new(record_id.clone(), *duration_minutes));
            }
            Contribution::Body { metric, measured_at } => {
                let slot = self.body_slot(metric);
                let newer = slot.map_or(true, |m| *measured_at >= m.measured_at);
                if newer {
                    *self.body_slot_mut(metric) = Some(Measurement {
                        value: metric.value(),
                        measured_at: *measured_at,
                    });
                }
            }
            Contribution::Steps { count } => {
                self.steps = offset(self.steps, *count);
            }
        }
    }

    fn remove(&mut self, c: &Contribution) {
        match c {
            Contribution::Exercise { calories_burned, duration_minutes } => {
                self.total_calories_out = offset(self.total_calories_out, -calories_burned);
                self.exercise_minutes = offset(self.exercise_minutes, -duration_minutes);
                self.exercise_count = offset(self.exercise_count, -1);
            }
            Contribution::Food { calories, carbs, protein, fat, .. } => {
                self.total_calories_in = offset(self.total_calories_in, -calories);
                self.total_carbs = self.total_carbs.offset_clamped(-carbs.decigrams());
                self.total_protein = self.total_protein.offset_clamped(-protein.decigrams());
                self.total_fat = self.total_fat.offset_clamped(-fat.decigrams());
            }
            Contribution::Sleep { record_id, .. } => {
                // Only the authoritative record clears the day's sleep.
                if self.sleep.as_ref().is_some_and(|s| &s.record_id == record_id) {
                    self.sleep = None;
                }
            }
            Contribution::Body { metric, measured_at } => {
                let shown = self.body_slot(metric).is_some_and(|m| {
                    m.measured_at == *measured_at && m.value == metric.value()
                });
                if shown {
                    *self.body_slot_mut(metric) = None;
                }
            }
            Contribution::Steps { count } => {
                self.steps = offset(self.steps, -count);
            }
        }
    }

    fn update(&mut self, old: &Contribution, new: &Contribution) {
        match (old, new) {
            (
                Contribution::Exercise { calories_burned: old_kcal, duration_minutes: old_min },
                Contribution::Exercise { calories_burned: new_kcal, duration_minutes: new_min },
            ) => {
                self.total_calories_out = offset(self.total_calories_out, new_kcal - old_kcal);
                self.exercise_minutes = offset(self.exercise_minutes, new_min - old_min);
            }
            (
                Contribution::Food { calories: oc, carbs: ocb, protein: op, fat: of, .. },
                Contribution::Food { calories: nc, carbs: ncb, protein: np, fat: nf, .. },
            ) => {
                self.total_calories_in = offset(self.total_calories_in, nc - oc);
                self.total_carbs = self.total_carbs.offset_clamped(ncb.decigrams() - ocb.decigrams());
                self.total_protein = self.total_protein.offset_clamped(np.decigrams() - op.decigrams());
                self.total_fat = self.total_fat.offset_clamped(nf.decigrams() - of.decigrams());
            }
            (Contribution::Steps { count: old_count }, Contribution::Steps { count: new_count }) => {
                self.steps = offset(self.steps, new_count - old_count);
            }
            (
                Contribution::Body { metric: old_metric, measured_at: old_at },
                Contribution::Body { metric: new_metric, measured_at: new_at },
            ) => {
                let shown = self.body_slot(old_metric).is_some_and(|m| {
                    m.measured_at == *old_at && m.value == old_metric.value()
                });
                if shown {
                    // The edited reading is the one on display; its new value replaces it.
                    *self.body_slot_mut(new_metric) = Some(Measurement {
                        value: new_metric.value(),
                        measured_at: *new_at,
                    });
                } else {
                    self.add(new, 0);
                }
            }
            // Sleep is replace-not-sum; the edited record becomes authoritative.
            (_, new) => self.add(new, 0),
        }
    }

    fn body_slot(&self, metric: &BodyMetric) -> Option<Measurement> {
        match metric {
            BodyMetric::Weight { .. } => self.weight,
            BodyMetric::BodyFat { .. } => self.body_fat,
        }
    }

    fn body_slot_mut(&mut self, metric: &BodyMetric) -> &mut Option<Measurement> {
        match metric {
            BodyMetric::Weight { .. } => &mut self.weight,
            BodyMetric::BodyFat { .. } => &mut self.body_fat,
        }
    }

    fn recompute(&mut self) {
        self.net_calories = net(self.total_calories_in, self.tdee, self.total_calories_out);
        self.macro_ratios = MacroRatios::compute(
            self.total_calories_in,
            self.total_carbs,
            self.total_protein,
            self.total_fat,
        );
    }
}

fn offset(total: i64, delta: i64) -> i64 {
    total.saturating_add(delta).max(0)
}

fn net(calories_in: i64, tdee: i64, calories_out: i64) -> i64 {
    calories_in.saturating_sub(tdee.saturating_add(calories_out))
}
