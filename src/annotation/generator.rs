// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use super::Annotation;
use crate::model::{DailyLog, MacroRatios, MealCategory};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("generator rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("generator temporarily unavailable: {0}")]
    Transient(String),
    #[error("generation failed: {0}")]
    Failed(String),
}

impl GeneratorError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Failed(_) => "failed",
        }
    }
}

/// What the day looks like, as input to the generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalContext {
    pub total_calories_in: i64,
    pub total_calories_out: i64,
    pub tdee: i64,
    pub net_calories: i64,
    pub exercise_minutes: i64,
    pub macro_ratios: Option<MacroRatios>,
}

impl GoalContext {
    #[must_use]
    pub fn from_log(log: &DailyLog) -> Self {
        Self {
            total_calories_in: log.total_calories_in(),
            total_calories_out: log.total_calories_out(),
            tdee: log.tdee(),
            net_calories: log.net_calories(),
            exercise_minutes: log.exercise_minutes(),
            macro_ratios: log.macro_ratios(),
        }
    }

    /// Context for a day with nothing logged yet.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            total_calories_in: 0,
            total_calories_out: 0,
            tdee: 0,
            net_calories: 0,
            exercise_minutes: 0,
            macro_ratios: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationRequest {
    pub user_id: String,
    pub date: NaiveDate,
    pub meal: Option<MealCategory>,
    pub goal: GoalContext,
}

/// The remote text-generation call.
#[async_trait]
pub trait AnnotationGenerator: Send + Sync {
    async fn generate(&self, request: &AnnotationRequest) -> Result<Annotation, GeneratorError>;
}
