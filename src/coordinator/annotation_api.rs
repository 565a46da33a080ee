// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use chrono::NaiveDate;

use super::HealthEngine;
use crate::annotation::{AnnotationCacheStats, AnnotationLookup};
use crate::error::EngineError;
use crate::model::MealCategory;

impl HealthEngine {
    /// Annotation for a day (`meal: None`) or one meal.
    ///
    /// `RateLimited` means nothing was cached and the generator is over
    /// budget; offer a retry after `retry_after`.
    pub async fn get_annotation(
        &self,
        date: NaiveDate,
        user_id: &str,
        meal: Option<MealCategory>,
    ) -> Result<AnnotationLookup, EngineError> {
        self.annotations.get_annotation(date, user_id, meal).await
    }

    pub async fn invalidate_annotation(
        &self,
        date: NaiveDate,
        user_id: &str,
        meal: Option<MealCategory>,
    ) -> Result<(), EngineError> {
        self.annotations.invalidate(date, user_id, meal).await
    }

    pub fn annotation_stats(&self) -> AnnotationCacheStats {
        self.annotations.stats()
    }
}
