// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Individual tracked records.
//!
//! Each record knows its owner, its logical date, and what it contributes to
//! that date's [`DailyLog`](super::DailyLog). The aggregate is always the sum
//! of the contributions of the records that currently exist.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::body::BodyMetric;
use super::delta::Contribution;
use super::nutrition::{Grams, MealCategory};
use crate::logical_date;

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum RecordOrigin {
    Local,
    Imported { external_id: String },
}

impl RecordOrigin {
    #[must_use]
    pub fn is_imported(&self) -> bool {
        matches!(self, Self::Imported { .. })
    }

    #[must_use]
    pub fn external_id(&self) -> Option<&str> {
        match self {
            Self::Local => None,
            Self::Imported { external_id } => Some(external_id),
        }
    }
}

/// Common view over every record type.
pub trait TrackedRecord: Clone + Send + Sync + 'static {
    /// Short name used in logs and metrics.
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn user_id(&self) -> &str;
    fn date(&self) -> NaiveDate;
    fn contribution(&self) -> Contribution;
    fn origin(&self) -> &RecordOrigin;
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseRecord {
    pub id: String,
    pub user_id: String,
    pub activity: String,
    pub performed_at: NaiveDateTime,
    pub duration_minutes: i64,
    pub calories_burned: i64,
    pub origin: RecordOrigin,
}

impl ExerciseRecord {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        activity: impl Into<String>,
        performed_at: NaiveDateTime,
        duration_minutes: i64,
        calories_burned: i64,
    ) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            activity: activity.into(),
            performed_at,
            duration_minutes,
            calories_burned,
            origin: RecordOrigin::Local,
        }
    }
}

impl TrackedRecord for ExerciseRecord {
    const KIND: &'static str = "exercise";

    fn id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn date(&self) -> NaiveDate {
        self.performed_at.date()
    }

    fn contribution(&self) -> Contribution {
        Contribution::Exercise {
            calories_burned: self.calories_burned,
            duration_minutes: self.duration_minutes,
        }
    }

    fn origin(&self) -> &RecordOrigin {
        &self.origin
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodRecord {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub meal: MealCategory,
    pub name: String,
    pub calories: i64,
    pub carbs: Grams,
    pub protein: Grams,
    pub fat: Grams,
    pub origin: RecordOrigin,
}

impl FoodRecord {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        date: NaiveDate,
        meal: MealCategory,
        name: impl Into<String>,
        calories: i64,
    ) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            date,
            meal,
            name: name.into(),
            calories,
            carbs: Grams::ZERO,
            protein: Grams::ZERO,
            fat: Grams::ZERO,
            origin: RecordOrigin::Local,
        }
    }

    /// Set macros in grams.
    #[must_use]
    pub fn with_macros(mut self, carbs: f64, protein: f64, fat: f64) -> Self {
        self.carbs = Grams::from_f64(carbs);
        self.protein = Grams::from_f64(protein);
        self.fat = Grams::from_f64(fat);
        self
    }
}

impl TrackedRecord for FoodRecord {
    const KIND: &'static str = "food";

    fn id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn contribution(&self) -> Contribution {
        Contribution::Food {
            meal: self.meal,
            calories: self.calories,
            carbs: self.carbs,
            protein: self.protein,
            fat: self.fat,
        }
    }

    fn origin(&self) -> &RecordOrigin {
        &self.origin
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
    pub id: String,
    pub user_id: String,
    pub bedtime: NaiveDateTime,
    pub wake_time: NaiveDateTime,
    pub origin: RecordOrigin,
}

impl SleepRecord {
    #[must_use]
    pub fn new(user_id: impl Into<String>, bedtime: NaiveDateTime, wake_time: NaiveDateTime) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            bedtime,
            wake_time,
            origin: RecordOrigin::Local,
        }
    }

    /// Minutes asleep. A wake time before bedtime counts as zero.
    #[must_use]
    pub fn duration_minutes(&self) -> i64 {
        (self.wake_time - self.bedtime).num_minutes().max(0)
    }
}

impl TrackedRecord for SleepRecord {
    const KIND: &'static str = "sleep";

    fn id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    /// A night belongs to the logical date of its bedtime.
    fn date(&self) -> NaiveDate {
        logical_date::resolve(self.bedtime)
    }

    fn contribution(&self) -> Contribution {
        Contribution::Sleep {
            record_id: self.id.clone(),
            duration_minutes: self.duration_minutes(),
        }
    }

    fn origin(&self) -> &RecordOrigin {
        &self.origin
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyRecord {
    pub id: String,
    pub user_id: String,
    pub metric: BodyMetric,
    pub measured_at: NaiveDateTime,
    pub origin: RecordOrigin,
}

impl BodyRecord {
    #[must_use]
    pub fn new(user_id: impl Into<String>, metric: BodyMetric, measured_at: NaiveDateTime) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            metric,
            measured_at,
            origin: RecordOrigin::Local,
        }
    }
}

impl TrackedRecord for BodyRecord {
    const KIND: &'static str = "body";

    fn id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn date(&self) -> NaiveDate {
        self.measured_at.date()
    }

    fn contribution(&self) -> Contribution {
        Contribution::Body {
            metric: self.metric,
            measured_at: self.measured_at,
        }
    }

    fn origin(&self) -> &RecordOrigin {
        &self.origin
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepsRecord {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub count: i64,
    pub origin: RecordOrigin,
}

impl StepsRecord {
    #[must_use]
    pub fn new(user_id: impl Into<String>, date: NaiveDate, count: i64) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            date,
            count,
            origin: RecordOrigin::Local,
        }
    }
}

impl TrackedRecord for StepsRecord {
    const KIND: &'static str = "steps";

    fn id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn contribution(&self) -> Contribution {
        Contribution::Steps { count: self.count }
    }

    fn origin(&self) -> &RecordOrigin {
        &self.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_sleep_after_midnight_belongs_to_previous_day() {
        let rec = SleepRecord::new("u1", ts(2, 1, 15), ts(2, 8, 0));
        assert_eq!(rec.date(), NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(rec.duration_minutes(), 405);
    }

    #[test]
    fn test_sleep_contribution_carries_record_id() {
        let rec = SleepRecord::new("u1", ts(1, 23, 0), ts(2, 7, 0));
        match rec.contribution() {
            Contribution::Sleep { record_id, duration_minutes } => {
                assert_eq!(record_id, rec.id);
                assert_eq!(duration_minutes, 480);
            }
            other => panic!("unexpected contribution {:?}", other),
        }
    }

    #[test]
    fn test_inverted_sleep_is_zero_length() {
        let rec = SleepRecord::new("u1", ts(2, 7, 0), ts(2, 6, 0));
        assert_eq!(rec.duration_minutes(), 0);
    }

    #[test]
    fn test_exercise_uses_calendar_date() {
        let rec = ExerciseRecord::new("u1", "run", ts(2, 0, 30), 30, 300);
        assert_eq!(rec.date(), NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        assert!(!rec.origin().is_imported());
    }

    #[test]
    fn test_food_macros_round_to_tenths() {
        let rec = FoodRecord::new("u1", ts(1, 0, 0).date(), MealCategory::Dinner, "pasta", 600)
            .with_macros(80.04, 20.0, 15.55);
        assert_eq!(rec.carbs.decigrams(), 800);
        assert_eq!(rec.fat.decigrams(), 156);
    }
}
