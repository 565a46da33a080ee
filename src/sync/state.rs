// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::health::{AuthorizationLevel, HealthCategory, SampleWindow};

/// Per-user sync lifecycle.
///
/// ```text
/// Idle ──► Syncing ──► Succeeded
///             │
///             └──────► Failed
/// ```
///
/// A finished state stays put until the next sync starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    Succeeded,
    Failed,
}

impl SyncState {
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Syncing)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Syncing => write!(f, "Syncing"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// What happened to one pulled sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportOutcome {
    /// New local record created.
    Created,
    /// Linked local record updated to the remote value.
    Updated,
    /// Already imported and nothing changed.
    Unchanged,
    /// Written by this engine; importing it would double-count.
    OwnEcho,
    /// Imported before, then deleted locally.
    DeletedLocally,
    /// Category that is never pulled.
    Unmapped,
}

impl ImportOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::OwnEcho => "own_echo",
            Self::DeletedLocally => "deleted_locally",
            Self::Unmapped => "unmapped",
        }
    }

    /// Whether the aggregate moved.
    #[must_use]
    pub fn changed(&self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub pulled: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl CategoryReport {
    pub(crate) fn count(&mut self, outcome: ImportOutcome) {
        match outcome {
            ImportOutcome::Created => self.created += 1,
            ImportOutcome::Updated => self.updated += 1,
            ImportOutcome::Unchanged => self.unchanged += 1,
            ImportOutcome::OwnEcho | ImportOutcome::DeletedLocally | ImportOutcome::Unmapped => {
                self.skipped += 1
            }
        }
    }
}

/// Result of one successful sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub user_id: String,
    /// Also the new watermark.
    pub started_at: NaiveDateTime,
    #[serde(skip)]
    pub window: SampleWindow,
    pub authorization: AuthorizationLevel,
    pub categories: Vec<(HealthCategory, CategoryReport)>,
}

impl SyncReport {
    pub(crate) fn new(
        user_id: impl Into<String>,
        started_at: NaiveDateTime,
        window: SampleWindow,
        authorization: AuthorizationLevel,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            started_at,
            window,
            authorization,
            categories: Vec::new(),
        }
    }

    #[must_use]
    pub fn category(&self, category: HealthCategory) -> Option<&CategoryReport> {
        self.categories
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, r)| r)
    }

    /// Samples that created or updated a local record.
    #[must_use]
    pub fn changed(&self) -> usize {
        self.categories.iter().map(|(_, r)| r.created + r.updated).sum()
    }

    #[must_use]
    pub fn pulled(&self) -> usize {
        self.categories.iter().map(|(_, r)| r.pulled).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_report_counts() {
        let mut report = CategoryReport::default();
        for outcome in [
            ImportOutcome::Created,
            ImportOutcome::Created,
            ImportOutcome::Unchanged,
            ImportOutcome::OwnEcho,
            ImportOutcome::DeletedLocally,
        ] {
            report.count(outcome);
        }
        assert_eq!(report.created, 2);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SyncState::Syncing.to_string(), "Syncing");
        assert!(SyncState::Syncing.is_running());
        assert!(!SyncState::Failed.is_running());
    }
}
