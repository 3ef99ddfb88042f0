//! Update ingestion: polling the chat provider with conflict backoff.

pub mod backoff;
pub mod poller;

pub use backoff::{BackoffDecision, ConflictBackoff};
pub use poller::{PollerState, UpdateHandler, UpdatePoller, spawn_poller};
