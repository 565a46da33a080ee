// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Sliding-window call budget.
///
/// At most `limit` acquisitions succeed in any `window`. When the budget is
/// spent, [`try_acquire`](Self::try_acquire) reports how long until the
/// oldest call leaves the window.
pub struct RequestBudget {
    limit: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RequestBudget {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            calls: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Take one call from the budget, or return the wait until one frees up.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut calls = self.calls.lock();
        while calls
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            calls.pop_front();
        }

        if calls.len() < self.limit {
            calls.push_back(now);
            return Ok(());
        }

        let wait = calls
            .front()
            .map_or(self.window, |oldest| self.window.saturating_sub(now.duration_since(*oldest)));
        Err(wait)
    }

    /// Calls still available in the current window.
    #[must_use]
    pub fn remaining(&self) -> usize {
        let now = Instant::now();
        let calls = self.calls.lock();
        let in_window = calls
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count();
        self.limit.saturating_sub(in_window)
    }
}
