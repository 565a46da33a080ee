// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bidirectional sync with the external health store.
//!
//! - [`SyncOrchestrator`] pulls samples and feeds them through the tracked
//!   repositories ([`Importer`]).
//! - [`Exporter`] pushes local records out, tagged so they are never pulled
//!   back in.

mod export;
mod import;
mod orchestrator;
mod state;

pub use export::{ExportReport, Exportable, Exporter};
pub use import::{Importable, Importer};
pub use orchestrator::SyncOrchestrator;
pub use state::{CategoryReport, ImportOutcome, SyncReport, SyncState};
