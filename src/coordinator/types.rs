//! Public types for the tracker coordinator.

use crate::record::{EventRecord, Request};
use crate::transport::DispatchFailure;

/// Heartbeat lifecycle state.
///
/// Use [`super::Tracker::lifecycle()`] to check the current state or
/// [`super::Tracker::lifecycle_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Not built yet, or torn down by `reset()`
    Uninitialized,
    /// Waiting for the next tick
    Idle,
    /// A tick is running
    Ticking,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Idle => write!(f, "Idle"),
            Self::Ticking => write!(f, "Ticking"),
        }
    }
}

/// Why a tick did not attempt delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Uninitialized,
    OptedOut,
    Offline,
    EmptyQueue,
    InFlight,
    BackingOff,
    TestMode,
}

/// What happened to the head of the request queue during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryAttempt {
    Skipped(SkipReason),
    /// Sent and confirmed; removed from the queue.
    Delivered(Request),
    /// Sent and rejected; still at the head, retried after `retry_after_ms`.
    Failed {
        request: Request,
        failure: DispatchFailure,
        retry_after_ms: i64,
    },
}

/// Summary of one heartbeat tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Commands taken off the registry queue and applied
    pub commands_applied: usize,
    /// A session_duration update was emitted
    pub session_extended: bool,
    /// Events folded into a new request
    pub events_flushed: usize,
    pub delivery: DeliveryAttempt,
}

impl TickReport {
    pub(super) fn skipped(reason: SkipReason) -> Self {
        Self {
            commands_applied: 0,
            session_extended: false,
            events_flushed: 0,
            delivery: DeliveryAttempt::Skipped(reason),
        }
    }

    #[must_use]
    pub fn delivered(&self) -> bool {
        matches!(self.delivery, DeliveryAttempt::Delivered(_))
    }
}

/// Copy of both queues, for tests and diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSnapshot {
    pub events: Vec<EventRecord>,
    pub requests: Vec<Request>,
}
