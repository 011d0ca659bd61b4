// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded exponential retry for setup work such as opening native storage.
//!
//! Delivery retries don't go through here; they are paced by the heartbeat
//! and the [`super::backoff::Backoff`] window.
//!
//! # Example
//!
//! ```
//! use beacon_sdk::RetryConfig;
//! use std::time::Duration;
//!
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_attempts, 5);
//! assert_eq!(startup.initial_delay, Duration::from_millis(200));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts including the first one.
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::startup()
    }
}

impl RetryConfig {
    /// Fail fast: 5 attempts, 200ms doubling up to 2s.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            max_attempts: 5,
        }
    }

    /// Single attempt, no waiting.
    #[cfg(test)]
    #[must_use]
    pub fn once() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
            max_attempts: 1,
        }
    }

    /// Delay to wait after `failures` consecutive failures.
    #[must_use]
    pub fn delay_after(&self, failures: usize) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..failures {
            delay = delay.mul_f64(self.factor).min(self.max_delay);
        }
        delay
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
            max_attempts: 3,
        }
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut failures = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if failures > 0 {
                    info!(operation = operation_name, failures, "operation succeeded after retry");
                }
                return Ok(val);
            }
            Err(err) => {
                failures += 1;
                if failures >= config.max_attempts {
                    return Err(err);
                }
                let delay = config.delay_after(failures);
                warn!(
                    operation = operation_name,
                    attempt = failures,
                    max_attempts = config.max_attempts,
                    error = %err,
                    "operation failed, retrying in {:?}",
                    delay
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, String> = retry("open", &RetryConfig::test(), || {
            let a = attempts_clone.clone();
            async move {
                let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err(format!("fail {}", count))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, String> = retry("open", &RetryConfig::test(), || {
            let a = attempts_clone.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err("disk full".to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "disk full");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_once_does_not_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let result: Result<(), String> = retry("open", &RetryConfig::once(), || {
            let a = attempts_clone.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_string())
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::startup();
        assert_eq!(config.delay_after(1), Duration::from_millis(200));
        assert_eq!(config.delay_after(2), Duration::from_millis(400));
        assert_eq!(config.delay_after(3), Duration::from_millis(800));
        assert_eq!(config.delay_after(10), Duration::from_secs(2));
    }
}
