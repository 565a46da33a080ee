// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Domain types: the daily aggregate, deltas, and the records behind them.

mod body;
mod daily_log;
mod delta;
mod nutrition;
mod records;
mod sleep;

pub use body::{BodyMetric, Measurement};
pub use daily_log::{DailyLog, MetabolicBaseline, MAX_BASELINE_CALORIES};
pub use delta::{
    Contribution, Delta, DeltaKind, MAX_CALORIES_PER_RECORD, MAX_GRAMS_PER_RECORD,
    MAX_MINUTES_PER_RECORD, MAX_STEPS_PER_RECORD,
};
pub use nutrition::{Grams, MacroRatios, MealCategory, KCAL_PER_GRAM_CARB_PROTEIN, KCAL_PER_GRAM_FAT};
pub use records::{
    BodyRecord, ExerciseRecord, FoodRecord, RecordOrigin, SleepRecord, StepsRecord, TrackedRecord,
};
pub use sleep::{SleepStatus, SleepSummary};
