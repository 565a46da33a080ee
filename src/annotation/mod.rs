// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Generated per-day and per-meal annotations.
//!
//! The generator is slow, rate-limited and not idempotent, so results are
//! kept in two tiers:
//!
//! ```text
//! lookup ─► fast tier (bounded, 24h TTL, LRU) ─hit─► return
//!               │ miss
//!               ▼
//!           durable tier (unbounded, no TTL) ─hit─► promote, return
//!               │ miss
//!               ▼
//!           budget ─► generator ─► durable ─► fast ─► return
//! ```

mod budget;
mod cache;
mod generator;
mod service;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::MealCategory;

pub use budget::RequestBudget;
pub use cache::{AnnotationCache, AnnotationCacheStats};
pub use generator::{AnnotationGenerator, AnnotationRequest, GeneratorError, GoalContext};
pub use service::AnnotationService;

/// Identifies one annotation. `meal: None` is the whole-day annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationKey {
    pub user_id: String,
    pub date: NaiveDate,
    pub meal: Option<MealCategory>,
}

impl AnnotationKey {
    #[must_use]
    pub fn new(user_id: impl Into<String>, date: NaiveDate, meal: Option<MealCategory>) -> Self {
        Self { user_id: user_id.into(), date, meal }
    }

    #[must_use]
    pub fn whole_day(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self::new(user_id, date, None)
    }

    #[must_use]
    pub fn meal(user_id: impl Into<String>, date: NaiveDate, meal: MealCategory) -> Self {
        Self::new(user_id, date, Some(meal))
    }

    #[must_use]
    pub fn is_whole_day(&self) -> bool {
        self.meal.is_none()
    }

    /// The whole-day key for the same user and date.
    #[must_use]
    pub fn day_key(&self) -> Self {
        Self::whole_day(self.user_id.clone(), self.date)
    }
}

impl std::fmt::Display for AnnotationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.meal {
            Some(meal) => write!(f, "{}/{}/{}", self.user_id, self.date, meal),
            None => write!(f, "{}/{}/day", self.user_id, self.date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub text: String,
    pub score: i32,
}

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationSource {
    Fast,
    Durable,
    Generated,
}

impl AnnotationSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Durable => "durable",
            Self::Generated => "generated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationLookup {
    pub annotation: Annotation,
    pub source: AnnotationSource,
}
