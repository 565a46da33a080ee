// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-key serialization.
//!
//! Work for the same key queues on a fair `tokio::sync::Mutex`, so it runs
//! in the order it arrived. Different keys never contend. Entries are
//! removed once the last holder or waiter lets go, so the map only holds
//! keys with work in flight.
//!
//! The default key is `(user, logical date)`; tracked repositories key by
//! `(user, record id)`.

use std::hash::Hash;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// `(user, logical date)`
pub type DayKey = (String, NaiveDate);

type LockMap<K> = DashMap<K, Arc<Mutex<()>>>;

pub struct KeyedLocks<K: Eq + Hash + Clone = DayKey> {
    locks: Arc<LockMap<K>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self { locks: Arc::new(DashMap::new()) }
    }
}

impl<K: Eq + Hash + Clone> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self { locks: self.locks.clone() }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: K) -> KeyGuard<K> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Keys currently held or waited on.
    #[must_use]
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

impl KeyedLocks<DayKey> {
    /// Wait for exclusive access to `(user_id, date)`.
    pub async fn lock(&self, user_id: &str, date: NaiveDate) -> KeyGuard<DayKey> {
        self.acquire((user_id.to_string(), date)).await
    }
}

pub struct KeyGuard<K: Eq + Hash + Clone = DayKey> {
    key: K,
    locks: Arc<LockMap<K>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        // Release first so our Arc no longer counts.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks: KeyedLocks = KeyedLocks::new();
        {
            let _guard = locks.lock("u1", day(1)).await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks: KeyedLocks = KeyedLocks::new();
        let _a = locks.lock("u1", day(1)).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("u1", day(2))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks: KeyedLocks = KeyedLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("u1", day(1)).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_custom_key_type() {
        let locks: KeyedLocks<(String, String)> = KeyedLocks::new();
        let _a = locks.acquire(("u1".to_string(), "rec-1".to_string())).await;
        let same = tokio::time::timeout(
            Duration::from_millis(20),
            locks.acquire(("u1".to_string(), "rec-1".to_string())),
        )
        .await;
        assert!(same.is_err());
        let other = tokio::time::timeout(
            Duration::from_millis(20),
            locks.acquire(("u1".to_string(), "rec-2".to_string())),
        )
        .await;
        assert!(other.is_ok());
    }
}
