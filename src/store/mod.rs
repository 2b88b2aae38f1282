//! Persistent mapping registry and reconciliation state
//!
//! Two JSON documents in the data directory, both rewritten atomically.
//! A stale or truncated file is treated as absent.

pub mod progress;
pub mod types;

pub use progress::ProgressStore;
pub use types::*;
