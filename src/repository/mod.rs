// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record repositories.
//!
//! [`RecordRepository`] is the plain CRUD contract the host app's storage
//! provides. [`TrackedRepository`] wraps one and keeps the daily aggregate in
//! step with every create, edit and delete.

mod memory;
mod tracked;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::TrackedRecord;
use crate::storage::StorageError;

pub use memory::InMemoryRecordRepository;
pub use tracked::TrackedRepository;

#[async_trait]
pub trait RecordRepository<R: TrackedRecord>: Send + Sync {
    async fn create(&self, record: &R) -> Result<(), StorageError>;

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<R>, StorageError>;

    /// Replace an existing record. `StorageError::NotFound` if it doesn't exist.
    async fn update(&self, record: &R) -> Result<(), StorageError>;

    async fn delete(&self, user_id: &str, id: &str) -> Result<(), StorageError>;

    /// Records whose logical date lies in `from..=to`.
    async fn fetch_by_date(&self, user_id: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<R>, StorageError>;
}
