// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

mod baseline;
mod engine;
mod hooks;
mod locks;

pub use baseline::{BaselineProvider, FixedBaseline};
pub use engine::{AggregateChanged, DeltaEngine};
pub use hooks::DeltaHook;
pub use locks::{KeyGuard, KeyedLocks};
