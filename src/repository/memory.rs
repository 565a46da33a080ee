use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use super::RecordRepository;
use crate::model::TrackedRecord;
use crate::storage::StorageError;

/// DashMap-backed record repository keyed by (user, record id).
pub struct InMemoryRecordRepository<R> {
    records: DashMap<(String, String), R>,
}

impl<R> Default for InMemoryRecordRepository<R> {
    fn default() -> Self {
        Self { records: DashMap::new() }
    }
}

impl<R> InMemoryRecordRepository<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn key<R: TrackedRecord>(record: &R) -> (String, String) {
    (record.user_id().to_string(), record.id().to_string())
}

#[async_trait]
impl<R: TrackedRecord> RecordRepository<R> for InMemoryRecordRepository<R> {
    async fn create(&self, record: &R) -> Result<(), StorageError> {
        self.records.insert(key(record), record.clone());
        Ok(())
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<R>, StorageError> {
        Ok(self
            .records
            .get(&(user_id.to_string(), id.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn update(&self, record: &R) -> Result<(), StorageError> {
        match self.records.get_mut(&key(record)) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound),
        }
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<(), StorageError> {
        self.records.remove(&(user_id.to_string(), id.to_string()));
        Ok(())
    }

    async fn fetch_by_date(&self, user_id: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<R>, StorageError> {
        let mut out: Vec<R> = self
            .records
            .iter()
            .filter(|r| r.key().0 == user_id && r.value().date() >= from && r.value().date() <= to)
            .map(|r| r.value().clone())
            .collect();
        out.sort_by(|a, b| a.date().cmp(&b.date()).then_with(|| a.id().cmp(b.id())));
        Ok(out)
    }
}
