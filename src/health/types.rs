// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata key carrying the origin marker on exported samples.
pub const ORIGIN_METADATA_KEY: &str = "origin";

/// Metadata key linking an exported sample back to its local record.
pub const LOCAL_ID_METADATA_KEY: &str = "local_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCategory {
    Weight,
    BodyFat,
    ActiveEnergy,
    Steps,
    Sleep,
    Workouts,
}

impl HealthCategory {
    pub const ALL: [HealthCategory; 6] = [
        Self::Weight,
        Self::BodyFat,
        Self::ActiveEnergy,
        Self::Steps,
        Self::Sleep,
        Self::Workouts,
    ];

    /// Categories read during sync. Active energy is push-only: pulling it
    /// back would double-count the workouts it was derived from.
    pub const PULLED: [HealthCategory; 5] = [
        Self::Weight,
        Self::BodyFat,
        Self::Steps,
        Self::Sleep,
        Self::Workouts,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weight => "weight",
            Self::BodyFat => "body_fat",
            Self::ActiveEnergy => "active_energy",
            Self::Steps => "steps",
            Self::Sleep => "sleep",
            Self::Workouts => "workouts",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    #[must_use]
    pub fn is_pulled(&self) -> bool {
        Self::PULLED.contains(self)
    }
}

impl std::fmt::Display for HealthCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessDirection {
    Read,
    Write,
}

/// Tri-state permission as reported by the platform.
///
/// Platforms hide read denial to protect privacy, so a read status of
/// `NotDetermined` may mean "denied" just as well as "never asked".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Authorized,
    Denied,
    NotDetermined,
}

/// Inclusive time range for sample queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SampleWindow {
    #[must_use]
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        at >= self.start && at <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SampleValue {
    Weight { kg: f64 },
    BodyFat { percent: f64 },
    ActiveEnergy { kcal: i64 },
    Steps { count: i64 },
    /// Duration is the sample's start..end span.
    Sleep,
    Workout { activity: String, kcal: i64 },
}

impl SampleValue {
    #[must_use]
    pub fn category(&self) -> HealthCategory {
        match self {
            Self::Weight { .. } => HealthCategory::Weight,
            Self::BodyFat { .. } => HealthCategory::BodyFat,
            Self::ActiveEnergy { .. } => HealthCategory::ActiveEnergy,
            Self::Steps { .. } => HealthCategory::Steps,
            Self::Sleep => HealthCategory::Sleep,
            Self::Workout { .. } => HealthCategory::Workouts,
        }
    }
}

/// A sample as stored in the external health store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSample {
    pub external_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub value: SampleValue,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ExternalSample {
    #[must_use]
    pub fn category(&self) -> HealthCategory {
        self.value.category()
    }

    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.metadata.get(ORIGIN_METADATA_KEY).map(String::as_str)
    }
}

/// A sample to be written to the external store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub value: SampleValue,
    pub metadata: BTreeMap<String, String>,
}

impl NewSample {
    #[must_use]
    pub fn category(&self) -> HealthCategory {
        self.value.category()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HealthStoreError {
    #[error("health store is not available on this device")]
    Unavailable,
    #[error("access to {0} was denied")]
    AuthorizationDenied(HealthCategory),
    #[error("transient health store failure: {0}")]
    Transient(String),
    #[error("health store rejected the request: {0}")]
    Rejected(String),
}

impl HealthStoreError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::AuthorizationDenied(_) => "denied",
            Self::Transient(_) => "transient",
            Self::Rejected(_) => "rejected",
        }
    }
}
