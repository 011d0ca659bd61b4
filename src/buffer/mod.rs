//! Event and request queues.

pub mod events;
pub mod requests;
pub mod truncate;

pub use events::{EventBuffer, EventStamp};
pub use requests::{EnqueueOutcome, Envelope, RejectReason, RequestBuffer};
pub use truncate::Limits;
