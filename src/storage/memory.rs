use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use dashmap::DashMap;

use super::traits::{AggregateStore, AnnotationStore, StorageError, SyncLedger, WatermarkStore};
use crate::annotation::{Annotation, AnnotationKey};
use crate::health::HealthCategory;
use crate::model::DailyLog;

type ImportKey = (String, HealthCategory, String);

/// In-process implementation of every store trait.
///
/// Used for tests, demos, and sessions that don't need to survive a restart.
/// Writes can be made to fail on demand to exercise rollback paths.
#[derive(Default)]
pub struct InMemoryStore {
    logs: DashMap<(String, NaiveDate), DailyLog>,
    watermarks: DashMap<String, NaiveDateTime>,
    annotations: DashMap<AnnotationKey, Annotation>,
    imports: DashMap<ImportKey, String>,
    exports: DashMap<(String, String), Vec<(HealthCategory, String)>>,
    exported_ids: DashMap<(String, String), String>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored aggregates
    #[must_use]
    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    /// Number of durable annotations
    #[must_use]
    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }

    /// Make every subsequent write fail with a backend error (or stop failing).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Backend("injected write failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AggregateStore for InMemoryStore {
    async fn load_log(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyLog>, StorageError> {
        Ok(self.logs.get(&(user_id.to_string(), date)).map(|r| r.value().clone()))
    }

    async fn save_log(&self, log: &DailyLog) -> Result<(), StorageError> {
        self.check_writable()?;
        self.logs.insert((log.user_id().to_string(), log.date()), log.clone());
        Ok(())
    }

    async fn logs_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyLog>, StorageError> {
        let mut logs: Vec<DailyLog> = self
            .logs
            .iter()
            .filter(|r| r.key().0 == user_id && r.key().1 >= from && r.key().1 <= to)
            .map(|r| r.value().clone())
            .collect();
        logs.sort_by_key(|l| l.date());
        Ok(logs)
    }
}

#[async_trait]
impl WatermarkStore for InMemoryStore {
    async fn load_watermark(&self, user_id: &str) -> Result<Option<NaiveDateTime>, StorageError> {
        Ok(self.watermarks.get(user_id).map(|r| *r.value()))
    }

    async fn save_watermark(&self, user_id: &str, at: NaiveDateTime) -> Result<(), StorageError> {
        self.check_writable()?;
        self.watermarks.insert(user_id.to_string(), at);
        Ok(())
    }

    async fn clear_watermark(&self, user_id: &str) -> Result<(), StorageError> {
        self.watermarks.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl AnnotationStore for InMemoryStore {
    async fn load_annotation(&self, key: &AnnotationKey) -> Result<Option<Annotation>, StorageError> {
        Ok(self.annotations.get(key).map(|r| r.value().clone()))
    }

    async fn save_annotation(&self, key: &AnnotationKey, annotation: &Annotation) -> Result<(), StorageError> {
        self.check_writable()?;
        self.annotations.insert(key.clone(), annotation.clone());
        Ok(())
    }

    async fn delete_annotation(&self, key: &AnnotationKey) -> Result<(), StorageError> {
        self.annotations.remove(key);
        Ok(())
    }

    async fn delete_annotations_for_day(&self, user_id: &str, date: NaiveDate) -> Result<(), StorageError> {
        self.annotations.retain(|k, _| !(k.user_id == user_id && k.date == date));
        Ok(())
    }
}

#[async_trait]
impl SyncLedger for InMemoryStore {
    async fn imported(
        &self,
        user_id: &str,
        category: HealthCategory,
        external_id: &str,
    ) -> Result<Option<String>, StorageError> {
        let key = (user_id.to_string(), category, external_id.to_string());
        Ok(self.imports.get(&key).map(|r| r.value().clone()))
    }

    async fn record_import(
        &self,
        user_id: &str,
        category: HealthCategory,
        external_id: &str,
        local_id: &str,
    ) -> Result<(), StorageError> {
        self.check_writable()?;
        let key = (user_id.to_string(), category, external_id.to_string());
        self.imports.insert(key, local_id.to_string());
        Ok(())
    }

    async fn forget_import(
        &self,
        user_id: &str,
        category: HealthCategory,
        external_id: &str,
    ) -> Result<(), StorageError> {
        let key = (user_id.to_string(), category, external_id.to_string());
        self.imports.remove(&key);
        Ok(())
    }

    async fn record_export(
        &self,
        user_id: &str,
        local_id: &str,
        category: HealthCategory,
        external_id: &str,
    ) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut entry = self
            .exports
            .entry((user_id.to_string(), local_id.to_string()))
            .or_default();
        entry.retain(|(c, _)| *c != category);
        entry.push((category, external_id.to_string()));
        drop(entry);
        self.exported_ids
            .insert((user_id.to_string(), external_id.to_string()), local_id.to_string());
        Ok(())
    }

    async fn exports_for_local(
        &self,
        user_id: &str,
        local_id: &str,
    ) -> Result<Vec<(HealthCategory, String)>, StorageError> {
        Ok(self
            .exports
            .get(&(user_id.to_string(), local_id.to_string()))
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn is_exported(&self, user_id: &str, external_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .exported_ids
            .contains_key(&(user_id.to_string(), external_id.to_string())))
    }

    async fn forget_export(&self, user_id: &str, local_id: &str) -> Result<(), StorageError> {
        if let Some((_, samples)) = self.exports.remove(&(user_id.to_string(), local_id.to_string())) {
            for (_, external_id) in samples {
                self.exported_ids.remove(&(user_id.to_string(), external_id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MealCategory, MetabolicBaseline};
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn log(user: &str, d: u32) -> DailyLog {
        DailyLog::new(user, day(d), MetabolicBaseline { bmr: 1500, tdee: 2000 })
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryStore::new();
        assert_eq!(store.log_count(), 0);
        assert!(store.load_log("u1", day(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = InMemoryStore::new();
        store.save_log(&log("u1", 1)).await.unwrap();
        let rebased = log("u1", 1).rebased(MetabolicBaseline { bmr: 1600, tdee: 2200 });
        store.save_log(&rebased).await.unwrap();

        assert_eq!(store.log_count(), 1);
        assert_eq!(store.load_log("u1", day(1)).await.unwrap().unwrap().tdee(), 2200);
    }

    #[tokio::test]
    async fn test_logs_between_is_ordered_and_scoped() {
        let store = InMemoryStore::new();
        for d in [5, 1, 3, 9] {
            store.save_log(&log("u1", d)).await.unwrap();
        }
        store.save_log(&log("u2", 2)).await.unwrap();

        let logs = store.logs_between("u1", day(1), day(5)).await.unwrap();
        let dates: Vec<_> = logs.iter().map(|l| l.date()).collect();
        assert_eq!(dates, vec![day(1), day(3), day(5)]);
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = InMemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(store.save_log(&log("u1", 1)).await, Err(StorageError::Backend(_))));
        assert_eq!(store.log_count(), 0);

        store.set_fail_writes(false);
        assert!(store.save_log(&log("u1", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_watermark_roundtrip_and_clear() {
        let store = InMemoryStore::new();
        let at = day(1).and_hms_opt(10, 0, 0).unwrap();
        store.save_watermark("u1", at).await.unwrap();
        assert_eq!(store.load_watermark("u1").await.unwrap(), Some(at));

        store.clear_watermark("u1").await.unwrap();
        assert_eq!(store.load_watermark("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_annotations_for_day() {
        let store = InMemoryStore::new();
        let note = Annotation { text: "ok".into(), score: 70 };
        store.save_annotation(&AnnotationKey::whole_day("u1", day(1)), &note).await.unwrap();
        store
            .save_annotation(&AnnotationKey::meal("u1", day(1), MealCategory::Lunch), &note)
            .await
            .unwrap();
        store.save_annotation(&AnnotationKey::whole_day("u1", day(2)), &note).await.unwrap();

        store.delete_annotations_for_day("u1", day(1)).await.unwrap();
        assert_eq!(store.annotation_count(), 1);
    }

    #[tokio::test]
    async fn test_export_ledger_tracks_every_sample() {
        let store = InMemoryStore::new();
        store.record_export("u1", "rec-1", HealthCategory::Workouts, "ext-w").await.unwrap();
        store.record_export("u1", "rec-1", HealthCategory::ActiveEnergy, "ext-e").await.unwrap();

        assert!(store.is_exported("u1", "ext-w").await.unwrap());
        assert!(!store.is_exported("u2", "ext-w").await.unwrap());
        assert_eq!(store.exports_for_local("u1", "rec-1").await.unwrap().len(), 2);

        store.forget_export("u1", "rec-1").await.unwrap();
        assert!(!store.is_exported("u1", "ext-e").await.unwrap());
        assert!(store.exports_for_local("u1", "rec-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_ledger() {
        let store = InMemoryStore::new();
        store.record_import("u1", HealthCategory::Weight, "ext-1", "rec-1").await.unwrap();
        assert_eq!(
            store.imported("u1", HealthCategory::Weight, "ext-1").await.unwrap().as_deref(),
            Some("rec-1")
        );
        assert!(store.imported("u1", HealthCategory::Steps, "ext-1").await.unwrap().is_none());

        store.forget_import("u1", HealthCategory::Weight, "ext-1").await.unwrap();
        assert!(store.imported("u1", HealthCategory::Weight, "ext-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let store = Arc::new(InMemoryStore::new());
        let mut handles = vec![];

        for user in 0..10 {
            let store_clone = store.clone();
            handles.push(tokio::spawn(async move {
                for d in 1..=10 {
                    store_clone.save_log(&log(&format!("user-{}", user), d)).await.unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.log_count(), 100);
    }
}
