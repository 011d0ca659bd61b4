//! Cross-context coordination.
//!
//! Every tracker's [`KvStore`](crate::storage::KvStore) publishes its writes
//! on a [`StorageChannel`]. A [`SyncListener`] in each other context picks
//! them up and refreshes the matching tracker's in-memory mirrors.

pub mod channel;
pub mod listener;
pub mod registry;

pub use channel::{ContextId, StorageChange, StorageChannel};
pub use listener::SyncListener;
pub use registry::Registry;
