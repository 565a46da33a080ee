// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sleep quality classification.
//!
//! ```
//! use daylog_engine::model::SleepStatus;
//!
//! assert_eq!(SleepStatus::from_minutes(329), SleepStatus::Bad);
//! assert_eq!(SleepStatus::from_minutes(330), SleepStatus::SoSo);
//! assert_eq!(SleepStatus::from_minutes(540), SleepStatus::Oversleep);
//! ```

use serde::{Deserialize, Serialize};

/// Upper bounds (exclusive, minutes) of each band below oversleep.
const BAD_BELOW: i64 = 330; // 5.5h
const SO_SO_BELOW: i64 = 390; // 6.5h
const GOOD_BELOW: i64 = 450; // 7.5h
const EXCELLENT_BELOW: i64 = 540; // 9h

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStatus {
    Bad,
    SoSo,
    Good,
    Excellent,
    Oversleep,
}

impl SleepStatus {
    #[must_use]
    pub fn from_minutes(minutes: i64) -> Self {
        match minutes {
            m if m < BAD_BELOW => Self::Bad,
            m if m < SO_SO_BELOW => Self::SoSo,
            m if m < GOOD_BELOW => Self::Good,
            m if m < EXCELLENT_BELOW => Self::Excellent,
            _ => Self::Oversleep,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bad => "bad",
            Self::SoSo => "so_so",
            Self::Good => "good",
            Self::Excellent => "excellent",
            Self::Oversleep => "oversleep",
        }
    }
}

impl std::fmt::Display for SleepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative sleep record for a logical date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepSummary {
    pub record_id: String,
    pub duration_minutes: i64,
    pub status: SleepStatus,
}

impl SleepSummary {
    #[must_use]
    pub fn new(record_id: impl Into<String>, duration_minutes: i64) -> Self {
        Self {
            record_id: record_id.into(),
            duration_minutes,
            status: SleepStatus::from_minutes(duration_minutes),
        }
    }
}
