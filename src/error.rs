// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine-level error taxonomy.
//!
//! Collaborator errors ([`StorageError`], [`HealthStoreError`],
//! [`GeneratorError`]) are folded into [`EngineError`] at the component
//! boundary so callers only match on one enum:
//!
//! | Variant        | Caller action                                   |
//! |----------------|-------------------------------------------------|
//! | `Validation`   | Show to user, do not retry                      |
//! | `NotFound`     | Show to user, do not retry                      |
//! | `Authorization`| Non-fatal, the push/pull was skipped            |
//! | `TransientIo`  | Retry the whole delta / sync step               |
//! | `RateLimited`  | Offer a retry affordance after `retry_after`    |
//! | `Consistency`  | Fatal, operation aborted, aggregate untouched   |
//! | `Cancelled`    | Sync was cancelled, nothing half-applied        |

use std::time::Duration;

use thiserror::Error;

use crate::annotation::GeneratorError;
use crate::health::HealthStoreError;
use crate::storage::StorageError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Malformed delta payload, rejected before the store is touched.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The external store refused the operation (write denied, unavailable).
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Network or storage hiccup. Safe to retry the whole unit of work.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// The annotation generator is over budget.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// A recompute produced an invariant violation or storage is corrupt.
    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// Whether the orchestrator may retry the failed step with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    /// Fatal errors abort the in-flight operation and must never be swallowed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Consistency(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Authorization(_) => "authorization",
            Self::TransientIo(_) => "transient_io",
            Self::RateLimited { .. } => "rate_limited",
            Self::Consistency(_) => "consistency",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => Self::not_found("row", "unknown"),
            StorageError::Backend(msg) => Self::TransientIo(msg),
            StorageError::Corruption { id, detail } => {
                Self::Consistency(format!("corrupt row '{}': {}", id, detail))
            }
        }
    }
}

impl From<HealthStoreError> for EngineError {
    fn from(err: HealthStoreError) -> Self {
        match err {
            HealthStoreError::Unavailable => {
                Self::Authorization("health store unavailable on this device".into())
            }
            HealthStoreError::AuthorizationDenied(category) => {
                Self::Authorization(format!("{} access denied", category))
            }
            HealthStoreError::Transient(msg) => Self::TransientIo(msg),
            HealthStoreError::Rejected(msg) => Self::Validation(msg),
        }
    }
}

impl From<GeneratorError> for EngineError {
    fn from(err: GeneratorError) -> Self {
        match err {
            GeneratorError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            GeneratorError::Transient(msg) | GeneratorError::Failed(msg) => Self::TransientIo(msg),
        }
    }
}
