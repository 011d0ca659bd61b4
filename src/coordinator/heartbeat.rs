// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Heartbeat: the periodic tick and the loop that drives it.
//!
//! One tick, in order:
//! 1. Apply queued registry commands (global tracker only)
//! 2. Report session time when the update interval has elapsed
//! 3. Fold pending events into a request
//! 4. Deliver the head of the request queue if nothing blocks it
//!
//! The loop re-arms only after the tick, delivery included, has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::types::{DeliveryAttempt, Lifecycle, SkipReason, TickReport};
use super::{Tracker, TrackerInner};
use crate::transport::dispatcher::QUEUE_DISPATCH;
use crate::transport::ResponseShape;

/// Holds the in-flight flag for the duration of one delivery.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl Tracker {
    /// Run one heartbeat tick now.
    ///
    /// The loop started by [`start()`](Self::start) calls this on every
    /// interval; tests and hosts without a loop call it directly.
    #[tracing::instrument(skip(self), fields(app_key = %self.app_key()))]
    pub async fn tick(&self) -> TickReport {
        if self.lifecycle() == Lifecycle::Uninitialized {
            return TickReport::skipped(SkipReason::Uninitialized);
        }
        if self.is_opted_out().await {
            return TickReport::skipped(SkipReason::OptedOut);
        }

        self.inner.lifecycle.send_replace(Lifecycle::Ticking);
        let report = self.tick_inner().await;
        // reset() during the tick wins
        self.inner.lifecycle.send_if_modified(|lifecycle| {
            if *lifecycle == Lifecycle::Ticking {
                *lifecycle = Lifecycle::Idle;
                true
            } else {
                false
            }
        });
        report
    }

    async fn tick_inner(&self) -> TickReport {
        // Commands may target this tracker, so they run before the state lock
        // is taken.
        let commands_applied = self.drain_commands().await;

        let inner = &self.inner;
        let config = &inner.config;
        let mut state = inner.state.lock().await;

        let session_extended = self.auto_extend_locked(&mut state).await;

        let events_flushed = if config.test_mode_eq {
            0
        } else {
            self.flush_events_locked(&mut state, false).await
        };

        let mut report = TickReport {
            commands_applied,
            session_extended,
            events_flushed,
            delivery: DeliveryAttempt::Skipped(SkipReason::EmptyQueue),
        };

        let now_ms = inner.clock.now_ms();
        let skip = if state.offline {
            Some(SkipReason::Offline)
        } else if state.requests.is_empty() {
            Some(SkipReason::EmptyQueue)
        } else if !state.backoff.is_ready(now_ms) {
            Some(SkipReason::BackingOff)
        } else {
            None
        };
        if let Some(reason) = skip {
            report.delivery = DeliveryAttempt::Skipped(reason);
            return report;
        }

        let Some(_guard) = InFlightGuard::acquire(&inner.in_flight) else {
            report.delivery = DeliveryAttempt::Skipped(SkipReason::InFlight);
            return report;
        };

        let Some(sent) = state.requests.stamp_head(&inner.store).await else {
            return report;
        };

        if config.test_mode {
            debug!("test mode, delivery skipped");
            report.delivery = DeliveryAttempt::Skipped(SkipReason::TestMode);
            return report;
        }

        // Producers keep enqueueing while the request is on the wire.
        drop(state);
        let url = format!("{}/i", config.base_url());
        let dispatch = inner
            .dispatcher
            .send(QUEUE_DISPATCH, &url, sent.clone(), ResponseShape::Object)
            .await;

        let mut state = inner.state.lock().await;
        report.delivery = match dispatch.result {
            Ok(_) => {
                if !state.requests.remove_delivered(&sent, &inner.store).await {
                    debug!("delivered request already left the queue");
                }
                crate::metrics::set_request_queue_depth(self.app_key(), state.requests.len());
                DeliveryAttempt::Delivered(sent)
            }
            Err(failure) => {
                if let (Some(status), Some(body)) = (failure.status(), failure.body()) {
                    inner.health.record_failure(i64::from(status), body);
                    inner.health.persist(&inner.store).await;
                }
                self.log_error(&format!("{} failed: {}", QUEUE_DISPATCH, failure));
                let retry_after_ms = state.backoff.trip(inner.clock.now_ms());
                warn!(retry_after_ms, depth = state.requests.len(), "delivery failed, backing off");
                DeliveryAttempt::Failed {
                    request: sent,
                    failure,
                    retry_after_ms,
                }
            }
        };
        report
    }

    /// Start the heartbeat loop. Does nothing if it is already running.
    pub fn start(&self) {
        let mut slot = self.inner.heartbeat.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let interval = Duration::from_millis(self.inner.config.interval_ms.max(1));
        info!(app_key = %self.app_key(), interval_ms = interval.as_millis() as u64, "heartbeat started");
        *slot = Some(tokio::spawn(run(Arc::downgrade(&self.inner), interval)));
    }

    /// Stop the heartbeat loop. A delivery in progress is abandoned and its
    /// request stays queued.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.heartbeat.lock().take() {
            handle.abort();
            info!(app_key = %self.app_key(), "heartbeat stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .heartbeat
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

// Holds only a weak reference between ticks so dropping the last Tracker
// handle ends the loop.
async fn run(inner: Weak<TrackerInner>, interval: Duration) {
    loop {
        let Some(inner) = inner.upgrade() else {
            debug!("tracker dropped, heartbeat exiting");
            break;
        };
        let tracker = Tracker { inner };
        if tracker.lifecycle() == Lifecycle::Uninitialized {
            break;
        }
        tracker.tick().await;
        drop(tracker);
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = InFlightGuard::acquire(&flag).expect("first acquire");
        assert!(InFlightGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(!flag.load(Ordering::Acquire));
        assert!(InFlightGuard::acquire(&flag).is_some());
    }
}
