// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fast annotation tier.
//!
//! Bounded, time-boxed, least-recently-used eviction. An entry past its TTL
//! is a miss even if it still occupies a slot; it is dropped on that lookup.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{Annotation, AnnotationKey};

#[derive(Clone, Debug)]
struct CacheEntry {
    annotation: Annotation,
    inserted_at: Instant,
}

pub struct AnnotationCache {
    cache: DashMap<AnnotationKey, CacheEntry>,
    /// Recency order, least recently used first
    order: Mutex<VecDeque<AnnotationKey>>,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Lookups that found an entry past its TTL
    pub expired: u64,
    /// Entries dropped to make room
    pub evictions: u64,
    pub entries: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

impl AnnotationCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &AnnotationKey) -> Option<Annotation> {
        // Clone out so the shard lock is released before touching `order`.
        let entry = self.cache.get(key).map(|e| e.value().clone());

        match entry {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.touch(key);
                Some(entry.annotation)
            }
            Some(_) => {
                self.expired.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.remove(key);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace, restarting the entry's TTL.
    pub fn insert(&self, key: AnnotationKey, annotation: Annotation) {
        if self.capacity == 0 {
            return;
        }

        let mut order = self.order.lock();
        if let Some(pos) = order.iter().position(|k| *k == key) {
            order.remove(pos);
        } else {
            while self.cache.len() >= self.capacity {
                match order.pop_front() {
                    Some(oldest) => {
                        self.cache.remove(&oldest);
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                    None => break,
                }
            }
        }

        self.cache.insert(
            key.clone(),
            CacheEntry { annotation, inserted_at: Instant::now() },
        );
        order.push_back(key);
    }

    pub fn remove(&self, key: &AnnotationKey) {
        let mut order = self.order.lock();
        self.cache.remove(key);
        order.retain(|k| k != key);
    }

    /// Drop every key (whole-day and per-meal) for one user and date.
    pub fn remove_day(&self, user_id: &str, date: NaiveDate) {
        let mut order = self.order.lock();
        let matches = |k: &AnnotationKey| k.user_id == user_id && k.date == date;
        self.cache.retain(|k, _| !matches(k));
        order.retain(|k| !matches(k));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> AnnotationCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        AnnotationCacheStats {
            hits,
            misses,
            expired: self.expired.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.cache.len(),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        let mut order = self.order.lock();
        self.cache.clear();
        order.clear();
    }

    fn touch(&self, key: &AnnotationKey) {
        let mut order = self.order.lock();
        // Only reorder keys still present; a concurrent remove wins.
        if let Some(pos) = order.iter().position(|k| k == key) {
            if let Some(k) = order.remove(pos) {
                order.push_back(k);
            }
        }
    }
}
