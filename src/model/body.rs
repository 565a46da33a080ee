// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A single body-composition reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum BodyMetric {
    Weight { kg: f64 },
    BodyFat { percent: f64 },
}

impl BodyMetric {
    #[must_use]
    pub fn value(&self) -> f64 {
        match self {
            Self::Weight { kg } => *kg,
            Self::BodyFat { percent } => *percent,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Weight { .. } => "weight",
            Self::BodyFat { .. } => "body_fat",
        }
    }
}

/// Latest value of a body metric on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub measured_at: NaiveDateTime,
}
