// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Authorization gate.
//!
//! Answers "may we read / write this category right now?" without ever
//! blocking local aggregation. Summaries are recomputed on every call:
//! permissions are revocable from outside the app at any moment.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::types::{AccessDirection, AuthorizationStatus, HealthCategory, HealthStoreError};
use super::HealthStore;
use crate::error::EngineError;
use crate::metrics;

/// Read permission as far as the app can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadAccess {
    Granted,
    Denied,
    /// The platform hides read denial; treat as "assume granted, expect empty".
    Unknown,
}

impl From<AuthorizationStatus> for ReadAccess {
    fn from(status: AuthorizationStatus) -> Self {
        match status {
            AuthorizationStatus::Authorized => Self::Granted,
            AuthorizationStatus::Denied => Self::Denied,
            AuthorizationStatus::NotDetermined => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryAccess {
    pub category: HealthCategory,
    pub read: ReadAccess,
    pub write: AuthorizationStatus,
}

impl CategoryAccess {
    /// Whether sync should pull this category.
    ///
    /// Write status is the only one platforms report reliably, so an
    /// unknown read with granted write is taken as readable.
    #[must_use]
    pub fn is_pullable(&self) -> bool {
        self.category.is_pulled()
            && match self.read {
                ReadAccess::Granted => true,
                ReadAccess::Denied => false,
                ReadAccess::Unknown => self.write == AuthorizationStatus::Authorized,
            }
    }

    #[must_use]
    pub fn can_write(&self) -> bool {
        self.write == AuthorizationStatus::Authorized
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationLevel {
    Full,
    Partial,
    Denied,
}

impl std::fmt::Display for AuthorizationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Point-in-time permission snapshot. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationSummary {
    available: bool,
    categories: Vec<CategoryAccess>,
    level: AuthorizationLevel,
}

impl AuthorizationSummary {
    fn new(available: bool, categories: Vec<CategoryAccess>) -> Self {
        let granted = categories.iter().filter(|c| c.can_write()).count();
        let level = if !available || granted == 0 {
            AuthorizationLevel::Denied
        } else if granted == categories.len() {
            AuthorizationLevel::Full
        } else {
            AuthorizationLevel::Partial
        };
        Self { available, categories, level }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available
    }

    #[must_use]
    pub fn level(&self) -> AuthorizationLevel {
        self.level
    }

    #[must_use]
    pub fn is_fully_authorized(&self) -> bool {
        self.level == AuthorizationLevel::Full
    }

    #[must_use]
    pub fn is_partially_authorized(&self) -> bool {
        self.level == AuthorizationLevel::Partial
    }

    #[must_use]
    pub fn is_fully_denied(&self) -> bool {
        self.level == AuthorizationLevel::Denied
    }

    #[must_use]
    pub fn categories(&self) -> &[CategoryAccess] {
        &self.categories
    }

    #[must_use]
    pub fn access(&self, category: HealthCategory) -> Option<&CategoryAccess> {
        self.categories.iter().find(|c| c.category == category)
    }

    /// Categories sync should read, in pull order.
    #[must_use]
    pub fn pullable(&self) -> Vec<HealthCategory> {
        self.categories
            .iter()
            .filter(|c| c.is_pullable())
            .map(|c| c.category)
            .collect()
    }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    store: Arc<dyn HealthStore>,
}

impl AuthorizationGate {
    pub fn new(store: Arc<dyn HealthStore>) -> Self {
        Self { store }
    }

    pub async fn check_availability(&self) -> bool {
        self.store.is_available().await
    }

    /// Query every category in both directions.
    ///
    /// Status lookups that fail are logged and reported as not determined;
    /// the summary itself never fails.
    pub async fn summarize(&self) -> AuthorizationSummary {
        if !self.store.is_available().await {
            let categories = HealthCategory::ALL
                .into_iter()
                .map(|category| CategoryAccess {
                    category,
                    read: ReadAccess::Unknown,
                    write: AuthorizationStatus::NotDetermined,
                })
                .collect();
            return AuthorizationSummary::new(false, categories);
        }

        let mut categories = Vec::with_capacity(HealthCategory::ALL.len());
        for category in HealthCategory::ALL {
            let read = self.status(category, AccessDirection::Read).await;
            let write = self.status(category, AccessDirection::Write).await;
            categories.push(CategoryAccess { category, read: read.into(), write });
        }

        let summary = AuthorizationSummary::new(true, categories);
        debug!(level = %summary.level(), pullable = ?summary.pullable(), "Authorization summarized");
        summary
    }

    /// Authoritative write check, done immediately before each write.
    pub async fn ensure_can_write(&self, category: HealthCategory) -> Result<(), EngineError> {
        match self.store.authorization_status(category, AccessDirection::Write).await {
            Ok(AuthorizationStatus::Authorized) => Ok(()),
            Ok(_) => Err(EngineError::Authorization(format!("write access to {} not granted", category))),
            Err(e) => {
                metrics::record_health_store_error("authorization_status", e.kind());
                Err(e.into())
            }
        }
    }

    /// Prompt for every category, then return a fresh summary.
    pub async fn request_authorization(&self) -> Result<AuthorizationSummary, EngineError> {
        self.store
            .request_authorization(&HealthCategory::PULLED, &HealthCategory::ALL)
            .await
            .map_err(|e| {
                metrics::record_health_store_error("request_authorization", e.kind());
                EngineError::from(e)
            })?;
        Ok(self.summarize().await)
    }

    async fn status(&self, category: HealthCategory, direction: AccessDirection) -> AuthorizationStatus {
        match self.store.authorization_status(category, direction).await {
            Ok(status) => status,
            Err(e) => {
                log_status_error(category, direction, &e);
                AuthorizationStatus::NotDetermined
            }
        }
    }
}

fn log_status_error(category: HealthCategory, direction: AccessDirection, e: &HealthStoreError) {
    metrics::record_health_store_error("authorization_status", e.kind());
    warn!(%category, ?direction, error = %e, "Authorization status lookup failed");
}
