//! Content collaborator contracts and the local persistence implementation.
//!
//! # Responsibility
//! - Define the async fetch/save/rollback-sync/refine contracts the core
//!   consumes.
//! - Isolate SQLite query details from store and workflow orchestration.
//!
//! # Invariants
//! - Backend writes enforce `Document::validate()` before persistence.
//! - Backend APIs return semantic errors (`NotFound`) in addition to
//!   transport errors.

pub mod content_backend;
pub mod sqlite_backend;
