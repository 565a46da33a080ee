// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deltas: signed changes applied to a [`DailyLog`](super::DailyLog).
//!
//! A [`Contribution`] is what one record adds to its day. A [`Delta`] pairs
//! a contribution with the CRUD event that produced it:
//!
//! ```text
//! create  → Delta::Add(c)
//! delete  → Delta::Remove(last-known c)
//! edit    → Delta::Update { old, new }
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::body::BodyMetric;
use super::nutrition::{Grams, MealCategory};
use crate::error::EngineError;

/// Per-record sanity bounds. Anything above is a malformed payload.
pub const MAX_CALORIES_PER_RECORD: i64 = 20_000;
pub const MAX_MINUTES_PER_RECORD: i64 = 24 * 60;
pub const MAX_GRAMS_PER_RECORD: Grams = Grams::from_decigrams(5_000 * 10);
pub const MAX_STEPS_PER_RECORD: i64 = 500_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Contribution {
    Exercise {
        calories_burned: i64,
        duration_minutes: i64,
    },
    Food {
        meal: MealCategory,
        calories: i64,
        carbs: Grams,
        protein: Grams,
        fat: Grams,
    },
    Sleep {
        record_id: String,
        duration_minutes: i64,
    },
    Body {
        metric: BodyMetric,
        measured_at: NaiveDateTime,
    },
    Steps {
        count: i64,
    },
}

impl Contribution {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Exercise { .. } => "exercise",
            Self::Food { .. } => "food",
            Self::Sleep { .. } => "sleep",
            Self::Body { metric, .. } => metric.name(),
            Self::Steps { .. } => "steps",
        }
    }

    fn same_shape(&self, other: &Contribution) -> bool {
        match (self, other) {
            (Self::Body { metric: a, .. }, Self::Body { metric: b, .. }) => {
                std::mem::discriminant(a) == std::mem::discriminant(b)
            }
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        match self {
            Self::Exercise { calories_burned, duration_minutes } => {
                check_range("calories_burned", *calories_burned, MAX_CALORIES_PER_RECORD)?;
                check_range("duration_minutes", *duration_minutes, MAX_MINUTES_PER_RECORD)
            }
            Self::Food { calories, carbs, protein, fat, .. } => {
                check_range("calories", *calories, MAX_CALORIES_PER_RECORD)?;
                for (field, grams) in [("carbs", carbs), ("protein", protein), ("fat", fat)] {
                    check_range(field, grams.decigrams(), MAX_GRAMS_PER_RECORD.decigrams())?;
                }
                Ok(())
            }
            Self::Sleep { record_id, duration_minutes } => {
                if record_id.is_empty() {
                    return Err(EngineError::Validation("sleep record id is empty".into()));
                }
                check_range("sleep duration_minutes", *duration_minutes, MAX_MINUTES_PER_RECORD)
            }
            Self::Body { metric, .. } => {
                let value = metric.value();
                let ok = match metric {
                    BodyMetric::Weight { kg } => kg.is_finite() && *kg > 0.0 && *kg < 700.0,
                    BodyMetric::BodyFat { percent } => {
                        percent.is_finite() && *percent >= 0.0 && *percent <= 100.0
                    }
                };
                if ok {
                    Ok(())
                } else {
                    Err(EngineError::Validation(format!("{} out of range: {}", metric.name(), value)))
                }
            }
            Self::Steps { count } => check_range("steps", *count, MAX_STEPS_PER_RECORD),
        }
    }
}

fn check_range(field: &str, value: i64, max: i64) -> Result<(), EngineError> {
    if value < 0 {
        return Err(EngineError::Validation(format!("{} is negative: {}", field, value)));
    }
    if value > max {
        return Err(EngineError::Validation(format!("{} exceeds {}: {}", field, max, value)));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    Add,
    Remove,
    Update,
}

impl DeltaKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Update => "update",
        }
    }
}

impl std::fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delta {
    Add(Contribution),
    Remove(Contribution),
    Update { old: Contribution, new: Contribution },
}

impl Delta {
    #[must_use]
    pub fn kind(&self) -> DeltaKind {
        match self {
            Self::Add(_) => DeltaKind::Add,
            Self::Remove(_) => DeltaKind::Remove,
            Self::Update { .. } => DeltaKind::Update,
        }
    }

    /// Category of the contribution being changed.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Add(c) | Self::Remove(c) => c.category(),
            Self::Update { new, .. } => new.category(),
        }
    }

    /// Contributions touched by this delta (old first for updates).
    #[must_use]
    pub fn contributions(&self) -> Vec<&Contribution> {
        match self {
            Self::Add(c) | Self::Remove(c) => vec![c],
            Self::Update { old, new } => vec![old, new],
        }
    }

    /// Reject malformed payloads before anything is read or written.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            Self::Add(c) | Self::Remove(c) => c.validate(),
            Self::Update { old, new } => {
                if !old.same_shape(new) {
                    return Err(EngineError::Validation(format!(
                        "update changes contribution type from {} to {}",
                        old.category(),
                        new.category()
                    )));
                }
                old.validate()?;
                new.validate()
            }
        }
    }
}
