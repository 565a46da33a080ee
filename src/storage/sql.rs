// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend (SQLite or MySQL).
//!
//! Aggregates and annotations are stored as JSON payload text, keyed by
//! user and ISO date:
//!
//! ```sql
//! CREATE TABLE daily_logs (
//!   user_id VARCHAR(128),
//!   log_date VARCHAR(10),      -- YYYY-MM-DD, sorts lexicographically
//!   payload LONGTEXT,          -- serialized DailyLog
//!   updated_at BIGINT,         -- unix millis, for operators only
//!   PRIMARY KEY (user_id, log_date)
//! )
//! ```
//!
//! Watermarks, annotation keys and the import/export ledgers get their own
//! small tables. A loaded aggregate is re-validated; a payload that no
//! longer satisfies the aggregate invariants surfaces as
//! [`StorageError::Corruption`] instead of being served.
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver hands MySQL LONGTEXT/TEXT back as BLOB, so text columns
//! are read as `String` first and then as `Vec<u8>`.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::{debug, warn};

use super::traits::{AggregateStore, AnnotationStore, StorageError, SyncLedger, WatermarkStore};
use crate::annotation::{Annotation, AnnotationKey};
use crate::health::HealthCategory;
use crate::metrics;
use crate::model::{DailyLog, MealCategory};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Stored in the `meal` column for whole-day annotations.
const WHOLE_DAY: &str = "";

pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
}

impl SqlStore {
    /// Create a new SQL store with startup-mode retry (fails fast if config is wrong).
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(if is_sqlite { 5 } else { 20 })
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool, is_sqlite };

        // Enable WAL mode for SQLite (readers don't block the writer)
        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    /// Get a clone of the connection pool for sharing with other stores.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        // NORMAL is safe under WAL and avoids an fsync per commit
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements: &[&str] = if self.is_sqlite {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS daily_logs (
                    user_id TEXT NOT NULL,
                    log_date TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (user_id, log_date)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_watermarks (
                    user_id TEXT PRIMARY KEY,
                    synced_at TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS annotations (
                    user_id TEXT NOT NULL,
                    log_date TEXT NOT NULL,
                    meal TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    PRIMARY KEY (user_id, log_date, meal)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_imports (
                    user_id TEXT NOT NULL,
                    category TEXT NOT NULL,
                    external_id TEXT NOT NULL,
                    local_id TEXT NOT NULL,
                    PRIMARY KEY (user_id, category, external_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_exports (
                    user_id TEXT NOT NULL,
                    local_id TEXT NOT NULL,
                    category TEXT NOT NULL,
                    external_id TEXT NOT NULL,
                    PRIMARY KEY (user_id, local_id, category)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_sync_exports_external ON sync_exports (user_id, external_id)",
            ]
        } else {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS daily_logs (
                    user_id VARCHAR(128) NOT NULL,
                    log_date VARCHAR(10) NOT NULL,
                    payload LONGTEXT NOT NULL,
                    updated_at BIGINT NOT NULL,
                    PRIMARY KEY (user_id, log_date)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_watermarks (
                    user_id VARCHAR(128) PRIMARY KEY,
                    synced_at VARCHAR(32) NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS annotations (
                    user_id VARCHAR(128) NOT NULL,
                    log_date VARCHAR(10) NOT NULL,
                    meal VARCHAR(16) NOT NULL,
                    payload TEXT NOT NULL,
                    PRIMARY KEY (user_id, log_date, meal)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_imports (
                    user_id VARCHAR(128) NOT NULL,
                    category VARCHAR(32) NOT NULL,
                    external_id VARCHAR(255) NOT NULL,
                    local_id VARCHAR(64) NOT NULL,
                    PRIMARY KEY (user_id, category, external_id)
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS sync_exports (
                    user_id VARCHAR(128) NOT NULL,
                    local_id VARCHAR(64) NOT NULL,
                    category VARCHAR(32) NOT NULL,
                    external_id VARCHAR(255) NOT NULL,
                    PRIMARY KEY (user_id, local_id, category),
                    INDEX idx_sync_exports_external (user_id, external_id)
                )
                "#,
            ]
        };

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            })
            .await?;
        }

        Ok(())
    }

    async fn execute(&self, operation: &'static str, sql: &str, binds: &[&str]) -> Result<(), StorageError> {
        let _timer = metrics::LatencyTimer::new(operation);
        let result = retry(operation, &RetryConfig::query(), || async {
            let mut query = sqlx::query(sql);
            for value in binds {
                query = query.bind(*value);
            }
            query
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await;
        metrics::record_storage_operation(operation, if result.is_ok() { "success" } else { "error" });
        result
    }

    async fn fetch(&self, operation: &'static str, sql: &str, binds: &[&str]) -> Result<Vec<AnyRow>, StorageError> {
        let _timer = metrics::LatencyTimer::new(operation);
        let result = retry(operation, &RetryConfig::query(), || async {
            let mut query = sqlx::query(sql);
            for value in binds {
                query = query.bind(*value);
            }
            query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await;
        metrics::record_storage_operation(operation, if result.is_ok() { "success" } else { "error" });
        result
    }

    fn upsert_log_sql(&self) -> &'static str {
        if self.is_sqlite {
            "INSERT INTO daily_logs (user_id, log_date, payload, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, log_date) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at"
        } else {
            "INSERT INTO daily_logs (user_id, log_date, payload, updated_at) VALUES (?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE
                payload = VALUES(payload),
                updated_at = VALUES(updated_at)"
        }
    }

    fn decode_log(user_id: &str, date: NaiveDate, payload: &str) -> Result<DailyLog, StorageError> {
        let id = format!("{}/{}", user_id, date.format(DATE_FORMAT));
        let corrupt = |detail: String| {
            metrics::record_corruption("daily_logs");
            warn!(id = %id, %detail, "Corrupt aggregate row");
            StorageError::Corruption { id: id.clone(), detail }
        };

        let log: DailyLog = serde_json::from_str(payload).map_err(|e| corrupt(e.to_string()))?;
        if log.user_id() != user_id || log.date() != date {
            return Err(corrupt(format!(
                "payload belongs to {}/{}",
                log.user_id(),
                log.date().format(DATE_FORMAT)
            )));
        }
        log.check_invariants().map_err(corrupt)?;
        Ok(log)
    }
}

/// Read a text column: String first (SQLite TEXT), then bytes (MySQL LONGTEXT via Any).
fn text_column(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

fn required_text(row: &AnyRow, column: &str) -> Result<String, StorageError> {
    text_column(row, column)
        .ok_or_else(|| StorageError::Backend(format!("missing column '{}'", column)))
}

fn parse_date(id: &str, raw: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| StorageError::Corruption {
        id: id.to_string(),
        detail: format!("bad date '{}': {}", raw, e),
    })
}

fn parse_category(id: &str, raw: &str) -> Result<HealthCategory, StorageError> {
    HealthCategory::parse(raw).ok_or_else(|| StorageError::Corruption {
        id: id.to_string(),
        detail: format!("unknown category '{}'", raw),
    })
}

fn meal_column(key: &AnnotationKey) -> &'static str {
    key.meal.map_or(WHOLE_DAY, |m| m.as_str())
}

#[async_trait]
impl AggregateStore for SqlStore {
    async fn load_log(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyLog>, StorageError> {
        let date_str = date.format(DATE_FORMAT).to_string();
        let rows = self
            .fetch(
                "load_log",
                "SELECT payload FROM daily_logs WHERE user_id = ? AND log_date = ?",
                &[user_id, &date_str],
            )
            .await?;

        match rows.first() {
            Some(row) => {
                let payload = required_text(row, "payload")?;
                Self::decode_log(user_id, date, &payload).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn save_log(&self, log: &DailyLog) -> Result<(), StorageError> {
        let payload = serde_json::to_string(log).map_err(|e| StorageError::Backend(e.to_string()))?;
        let date_str = log.date().format(DATE_FORMAT).to_string();
        let updated_at = chrono::Utc::now().timestamp_millis();
        let sql = self.upsert_log_sql();

        let _timer = metrics::LatencyTimer::new("save_log");
        let result = retry("save_log", &RetryConfig::query(), || async {
            sqlx::query(sql)
                .bind(log.user_id())
                .bind(&date_str)
                .bind(&payload)
                .bind(updated_at)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await;
        metrics::record_storage_operation("save_log", if result.is_ok() { "success" } else { "error" });
        debug!(user_id = %log.user_id(), date = %log.date(), "Saved aggregate");
        result
    }

    async fn logs_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyLog>, StorageError> {
        let from_str = from.format(DATE_FORMAT).to_string();
        let to_str = to.format(DATE_FORMAT).to_string();
        let rows = self
            .fetch(
                "logs_between",
                "SELECT log_date, payload FROM daily_logs
                 WHERE user_id = ? AND log_date >= ? AND log_date <= ?
                 ORDER BY log_date",
                &[user_id, &from_str, &to_str],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let raw_date = required_text(row, "log_date")?;
                let date = parse_date(user_id, &raw_date)?;
                let payload = required_text(row, "payload")?;
                Self::decode_log(user_id, date, &payload)
            })
            .collect()
    }
}

#[async_trait]
impl WatermarkStore for SqlStore {
    async fn load_watermark(&self, user_id: &str) -> Result<Option<NaiveDateTime>, StorageError> {
        let rows = self
            .fetch(
                "load_watermark",
                "SELECT synced_at FROM sync_watermarks WHERE user_id = ?",
                &[user_id],
            )
            .await?;

        match rows.first() {
            Some(row) => {
                let raw = required_text(row, "synced_at")?;
                NaiveDateTime::parse_from_str(&raw, DATETIME_FORMAT)
                    .map(Some)
                    .map_err(|e| StorageError::Corruption {
                        id: format!("watermark/{}", user_id),
                        detail: format!("bad timestamp '{}': {}", raw, e),
                    })
            }
            None => Ok(None),
        }
    }

    async fn save_watermark(&self, user_id: &str, at: NaiveDateTime) -> Result<(), StorageError> {
        let at_str = at.format(DATETIME_FORMAT).to_string();
        let sql = if self.is_sqlite {
            "INSERT INTO sync_watermarks (user_id, synced_at) VALUES (?, ?)
             ON CONFLICT(user_id) DO UPDATE SET synced_at = excluded.synced_at"
        } else {
            "INSERT INTO sync_watermarks (user_id, synced_at) VALUES (?, ?)
             ON DUPLICATE KEY UPDATE synced_at = VALUES(synced_at)"
        };
        self.execute("save_watermark", sql, &[user_id, &at_str]).await
    }

    async fn clear_watermark(&self, user_id: &str) -> Result<(), StorageError> {
        self.execute(
            "clear_watermark",
            "DELETE FROM sync_watermarks WHERE user_id = ?",
            &[user_id],
        )
        .await
    }
}

#[async_trait]
impl AnnotationStore for SqlStore {
    async fn load_annotation(&self, key: &AnnotationKey) -> Result<Option<Annotation>, StorageError> {
        let date_str = key.date.format(DATE_FORMAT).to_string();
        let rows = self
            .fetch(
                "load_annotation",
                "SELECT payload FROM annotations WHERE user_id = ? AND log_date = ? AND meal = ?",
                &[&key.user_id, &date_str, meal_column(key)],
            )
            .await?;

        match rows.first() {
            Some(row) => {
                let payload = required_text(row, "payload")?;
                serde_json::from_str(&payload).map(Some).map_err(|e| {
                    metrics::record_corruption("annotations");
                    StorageError::Corruption { id: key.to_string(), detail: e.to_string() }
                })
            }
            None => Ok(None),
        }
    }

    async fn save_annotation(&self, key: &AnnotationKey, annotation: &Annotation) -> Result<(), StorageError> {
        let payload = serde_json::to_string(annotation).map_err(|e| StorageError::Backend(e.to_string()))?;
        let date_str = key.date.format(DATE_FORMAT).to_string();
        let sql = if self.is_sqlite {
            "INSERT INTO annotations (user_id, log_date, meal, payload) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, log_date, meal) DO UPDATE SET payload = excluded.payload"
        } else {
            "INSERT INTO annotations (user_id, log_date, meal, payload) VALUES (?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE payload = VALUES(payload)"
        };
        self.execute(
            "save_annotation",
            sql,
            &[&key.user_id, &date_str, meal_column(key), &payload],
        )
        .await
    }

    async fn delete_annotation(&self, key: &AnnotationKey) -> Result<(), StorageError> {
        let date_str = key.date.format(DATE_FORMAT).to_string();
        self.execute(
            "delete_annotation",
            "DELETE FROM annotations WHERE user_id = ? AND log_date = ? AND meal = ?",
            &[&key.user_id, &date_str, meal_column(key)],
        )
        .await
    }

    async fn delete_annotations_for_day(&self, user_id: &str, date: NaiveDate) -> Result<(), StorageError> {
        let date_str = date.format(DATE_FORMAT).to_string();
        self.execute(
            "delete_annotations_for_day",
            "DELETE FROM annotations WHERE user_id = ? AND log_date = ?",
            &[user_id, &date_str],
        )
        .await
    }
}

#[async_trait]
impl SyncLedger for SqlStore {
    async fn imported(
        &self,
        user_id: &str,
        category: HealthCategory,
        external_id: &str,
    ) -> Result<Option<String>, StorageError> {
        let rows = self
            .fetch(
                "ledger_imported",
                "SELECT local_id FROM sync_imports WHERE user_id = ? AND category = ? AND external_id = ?",
                &[user_id, category.as_str(), external_id],
            )
            .await?;
        rows.first().map(|row| required_text(row, "local_id")).transpose()
    }

    async fn record_import(
        &self,
        user_id: &str,
        category: HealthCategory,
        external_id: &str,
        local_id: &str,
    ) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO sync_imports (user_id, category, external_id, local_id) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, category, external_id) DO UPDATE SET local_id = excluded.local_id"
        } else {
            "INSERT INTO sync_imports (user_id, category, external_id, local_id) VALUES (?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE local_id = VALUES(local_id)"
        };
        self.execute(
            "ledger_record_import",
            sql,
            &[user_id, category.as_str(), external_id, local_id],
        )
        .await
    }

    async fn forget_import(
        &self,
        user_id: &str,
        category: HealthCategory,
        external_id: &str,
    ) -> Result<(), StorageError> {
        self.execute(
            "ledger_forget_import",
            "DELETE FROM sync_imports WHERE user_id = ? AND category = ? AND external_id = ?",
            &[user_id, category.as_str(), external_id],
        )
        .await
    }

    async fn record_export(
        &self,
        user_id: &str,
        local_id: &str,
        category: HealthCategory,
        external_id: &str,
    ) -> Result<(), StorageError> {
        let sql = if self.is_sqlite {
            "INSERT INTO sync_exports (user_id, local_id, category, external_id) VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, local_id, category) DO UPDATE SET external_id = excluded.external_id"
        } else {
            "INSERT INTO sync_exports (user_id, local_id, category, external_id) VALUES (?, ?, ?, ?)
             ON DUPLICATE KEY UPDATE external_id = VALUES(external_id)"
        };
        self.execute(
            "ledger_record_export",
            sql,
            &[user_id, local_id, category.as_str(), external_id],
        )
        .await
    }

    async fn exports_for_local(
        &self,
        user_id: &str,
        local_id: &str,
    ) -> Result<Vec<(HealthCategory, String)>, StorageError> {
        let rows = self
            .fetch(
                "ledger_exports_for_local",
                "SELECT category, external_id FROM sync_exports WHERE user_id = ? AND local_id = ?",
                &[user_id, local_id],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let category = parse_category(local_id, &required_text(row, "category")?)?;
                Ok((category, required_text(row, "external_id")?))
            })
            .collect()
    }

    async fn is_exported(&self, user_id: &str, external_id: &str) -> Result<bool, StorageError> {
        let rows = self
            .fetch(
                "ledger_is_exported",
                "SELECT 1 AS hit FROM sync_exports WHERE user_id = ? AND external_id = ? LIMIT 1",
                &[user_id, external_id],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn forget_export(&self, user_id: &str, local_id: &str) -> Result<(), StorageError> {
        self.execute(
            "ledger_forget_export",
            "DELETE FROM sync_exports WHERE user_id = ? AND local_id = ?",
            &[user_id, local_id],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetabolicBaseline;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[test]
    fn test_decode_rejects_mismatched_key() {
        let log = DailyLog::new("u1", day(), MetabolicBaseline { bmr: 1500, tdee: 2000 });
        let payload = serde_json::to_string(&log).unwrap();

        assert!(SqlStore::decode_log("u1", day(), &payload).is_ok());
        let err = SqlStore::decode_log("u2", day(), &payload).unwrap_err();
        assert!(matches!(err, StorageError::Corruption { .. }));
    }

    #[test]
    fn test_decode_rejects_broken_invariant() {
        let log = DailyLog::new("u1", day(), MetabolicBaseline { bmr: 1500, tdee: 2000 });
        let mut value = serde_json::to_value(&log).unwrap();
        value["net_calories"] = serde_json::json!(999);
        let payload = value.to_string();

        let err = SqlStore::decode_log("u1", day(), &payload).unwrap_err();
        assert!(matches!(err, StorageError::Corruption { .. }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            SqlStore::decode_log("u1", day(), "{not json"),
            Err(StorageError::Corruption { .. })
        ));
    }

    #[test]
    fn test_meal_column() {
        assert_eq!(meal_column(&AnnotationKey::whole_day("u1", day())), "");
        assert_eq!(meal_column(&AnnotationKey::meal("u1", day(), MealCategory::Snack)), "snack");
    }
}
