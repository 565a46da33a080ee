// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistence for aggregates, watermarks, durable annotations and sync ledgers.

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::InMemoryStore;
pub use sql::SqlStore;
pub use traits::{AggregateStore, AnnotationStore, StorageError, SyncLedger, WatermarkStore};
