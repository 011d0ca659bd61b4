// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delivery cooldown after a failed request.

use std::time::Duration;

/// "Don't attempt delivery before `until_ms`."
///
/// Delivery is allowed once `now > until_ms`. A trip always moves the window
/// to `now + cooldown`, and since trips only happen after the window has
/// elapsed the timestamp strictly increases.
#[derive(Debug, Clone)]
pub struct Backoff {
    until_ms: i64,
    cooldown: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self { until_ms: 0, cooldown }
    }

    #[must_use]
    pub fn is_ready(&self, now_ms: i64) -> bool {
        now_ms > self.until_ms
    }

    /// Start a new cooldown window. Returns its end.
    pub fn trip(&mut self, now_ms: i64) -> i64 {
        self.until_ms = now_ms + self.cooldown.as_millis() as i64;
        self.until_ms
    }

    #[must_use]
    pub fn until_ms(&self) -> i64 {
        self.until_ms
    }

    pub fn reset(&mut self) {
        self.until_ms = 0;
    }
}
