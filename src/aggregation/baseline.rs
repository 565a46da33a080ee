// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::MetabolicBaseline;

/// Source of bmr/tdee for days that don't have an aggregate yet.
///
/// The metabolic calculation itself lives outside this crate.
#[async_trait]
pub trait BaselineProvider: Send + Sync {
    async fn baseline(&self, user_id: &str, date: NaiveDate) -> MetabolicBaseline;
}

/// Same baseline for everyone, every day.
#[derive(Debug, Clone, Copy)]
pub struct FixedBaseline(pub MetabolicBaseline);

#[async_trait]
impl BaselineProvider for FixedBaseline {
    async fn baseline(&self, _user_id: &str, _date: NaiveDate) -> MetabolicBaseline {
        self.0
    }
}
