// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::types::{
    AccessDirection, AuthorizationStatus, ExternalSample, HealthCategory, HealthStoreError, NewSample,
    SampleWindow,
};
use super::HealthStore;

/// In-process health store that behaves like a platform store.
///
/// - Permissions default to `NotDetermined`; a denied read returns an empty
///   result rather than an error, as real platforms do.
/// - Writes are checked against write permission.
/// - Transient read/write failures and read latency can be injected.
pub struct InMemoryHealthStore {
    available: AtomicBool,
    statuses: DashMap<(HealthCategory, AccessDirection), AuthorizationStatus>,
    samples: DashMap<String, ExternalSample>,
    next_id: AtomicU64,
    read_failures: AtomicUsize,
    write_failures: AtomicUsize,
    read_calls: AtomicUsize,
    read_delay: Mutex<Duration>,
    preserve_metadata: AtomicBool,
}

impl Default for InMemoryHealthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHealthStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            statuses: DashMap::new(),
            samples: DashMap::new(),
            next_id: AtomicU64::new(1),
            read_failures: AtomicUsize::new(0),
            write_failures: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            read_delay: Mutex::new(Duration::ZERO),
            preserve_metadata: AtomicBool::new(true),
        }
    }

    /// A store with read and write access to every category.
    #[must_use]
    pub fn fully_authorized() -> Self {
        let store = Self::new();
        for category in HealthCategory::ALL {
            store.set_status(category, AccessDirection::Read, AuthorizationStatus::Authorized);
            store.set_status(category, AccessDirection::Write, AuthorizationStatus::Authorized);
        }
        store
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_status(&self, category: HealthCategory, direction: AccessDirection, status: AuthorizationStatus) {
        self.statuses.insert((category, direction), status);
    }

    /// Fail the next `n` reads with a transient error.
    pub fn fail_next_reads(&self, n: usize) {
        self.read_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a transient error.
    pub fn fail_next_writes(&self, n: usize) {
        self.write_failures.store(n, Ordering::SeqCst);
    }

    /// Delay every read, to hold a sync in flight.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    /// Drop metadata on write, like platforms that strip custom keys.
    pub fn set_preserve_metadata(&self, preserve: bool) {
        self.preserve_metadata.store(preserve, Ordering::SeqCst);
    }

    /// Add a sample as if another app had written it.
    pub fn insert_sample(&self, sample: ExternalSample) {
        self.samples.insert(sample.external_id.clone(), sample);
    }

    pub fn remove_sample(&self, external_id: &str) {
        self.samples.remove(external_id);
    }

    /// All samples of `category`, ordered by start time.
    #[must_use]
    pub fn samples(&self, category: HealthCategory) -> Vec<ExternalSample> {
        let mut out: Vec<ExternalSample> = self
            .samples
            .iter()
            .filter(|r| r.value().category() == category)
            .map(|r| r.value().clone())
            .collect();
        out.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.external_id.cmp(&b.external_id)));
        out
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    fn status(&self, category: HealthCategory, direction: AccessDirection) -> AuthorizationStatus {
        self.statuses
            .get(&(category, direction))
            .map_or(AuthorizationStatus::NotDetermined, |r| *r.value())
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn ensure_available(&self) -> Result<(), HealthStoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HealthStoreError::Unavailable)
        }
    }
}

#[async_trait]
impl HealthStore for InMemoryHealthStore {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn request_authorization(
        &self,
        read: &[HealthCategory],
        write: &[HealthCategory],
    ) -> Result<(), HealthStoreError> {
        self.ensure_available()?;
        // The simulated user grants whatever hasn't been decided yet.
        for (categories, direction) in [(read, AccessDirection::Read), (write, AccessDirection::Write)] {
            for category in categories {
                self.statuses
                    .entry((*category, direction))
                    .or_insert(AuthorizationStatus::Authorized);
            }
        }
        Ok(())
    }

    async fn authorization_status(
        &self,
        category: HealthCategory,
        direction: AccessDirection,
    ) -> Result<AuthorizationStatus, HealthStoreError> {
        self.ensure_available()?;
        Ok(self.status(category, direction))
    }

    async fn read_samples(
        &self,
        category: HealthCategory,
        window: SampleWindow,
    ) -> Result<Vec<ExternalSample>, HealthStoreError> {
        self.ensure_available()?;
        self.read_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if Self::take_failure(&self.read_failures) {
            return Err(HealthStoreError::Transient("simulated read timeout".into()));
        }

        if self.status(category, AccessDirection::Read) == AuthorizationStatus::Denied {
            return Ok(Vec::new());
        }

        Ok(self
            .samples(category)
            .into_iter()
            .filter(|s| window.contains(s.start))
            .collect())
    }

    async fn write_sample(&self, sample: &NewSample) -> Result<String, HealthStoreError> {
        self.ensure_available()?;
        let category = sample.category();
        if self.status(category, AccessDirection::Write) != AuthorizationStatus::Authorized {
            return Err(HealthStoreError::AuthorizationDenied(category));
        }
        if Self::take_failure(&self.write_failures) {
            return Err(HealthStoreError::Transient("simulated write timeout".into()));
        }
        if sample.end < sample.start {
            return Err(HealthStoreError::Rejected("sample ends before it starts".into()));
        }

        let external_id = format!("ext-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let metadata = if self.preserve_metadata.load(Ordering::SeqCst) {
            sample.metadata.clone()
        } else {
            Default::default()
        };
        self.samples.insert(
            external_id.clone(),
            ExternalSample {
                external_id: external_id.clone(),
                start: sample.start,
                end: sample.end,
                value: sample.value.clone(),
                metadata,
            },
        );
        Ok(external_id)
    }

    async fn delete_sample(&self, category: HealthCategory, external_id: &str) -> Result<(), HealthStoreError> {
        self.ensure_available()?;
        if self.status(category, AccessDirection::Write) != AuthorizationStatus::Authorized {
            return Err(HealthStoreError::AuthorizationDenied(category));
        }
        self.samples.remove(external_id);
        Ok(())
    }
}
