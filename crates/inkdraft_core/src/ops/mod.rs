//! Generic async operation bookkeeping.
//!
//! # Responsibility
//! - Give every "work with progress and timeout" the same loading-state
//!   semantics (workflow runs, uploads, fetches).
//! - Stay unaware of documents and messages.

pub mod state;
pub mod tracker;

pub use state::{OperationError, OperationId, OperationKind, OperationSnapshot, OperationState};
pub use tracker::{OperationCallback, OperationHandle, OperationTracker, StartOptions};
