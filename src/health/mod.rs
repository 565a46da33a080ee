// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! External health store adapter contract and the authorization gate.
//!
//! The platform store has partial, revocable, per-category authorization and
//! no transactions. Everything here treats it as an unreliable peer: reads
//! are soft, writes are checked before they're attempted.

mod gate;
mod memory;
mod types;

use async_trait::async_trait;

pub use gate::{AuthorizationGate, AuthorizationLevel, AuthorizationSummary, CategoryAccess, ReadAccess};
pub use memory::InMemoryHealthStore;
pub use types::{
    AccessDirection, AuthorizationStatus, ExternalSample, HealthCategory, HealthStoreError, NewSample,
    SampleValue, SampleWindow, LOCAL_ID_METADATA_KEY, ORIGIN_METADATA_KEY,
};

#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn is_available(&self) -> bool;

    /// Prompt the user for access. Resolves once the prompt is dismissed,
    /// whatever the user chose.
    async fn request_authorization(
        &self,
        read: &[HealthCategory],
        write: &[HealthCategory],
    ) -> Result<(), HealthStoreError>;

    async fn authorization_status(
        &self,
        category: HealthCategory,
        direction: AccessDirection,
    ) -> Result<AuthorizationStatus, HealthStoreError>;

    /// Samples of `category` whose start lies in `window`.
    async fn read_samples(
        &self,
        category: HealthCategory,
        window: SampleWindow,
    ) -> Result<Vec<ExternalSample>, HealthStoreError>;

    /// Write a sample and return its external id.
    async fn write_sample(&self, sample: &NewSample) -> Result<String, HealthStoreError>;

    async fn delete_sample(&self, category: HealthCategory, external_id: &str) -> Result<(), HealthStoreError>;
}
