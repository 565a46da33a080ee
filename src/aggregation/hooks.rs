// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::EngineError;
use crate::model::Delta;

/// Called after a delta has been persisted, outside the per-key lock.
///
/// Hook failures are logged by the engine and never undo the delta.
#[async_trait]
pub trait DeltaHook: Send + Sync {
    async fn on_delta_applied(&self, user_id: &str, date: NaiveDate, delta: &Delta) -> Result<(), EngineError>;
}
