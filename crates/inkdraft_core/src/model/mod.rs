//! Domain model for versioned documents and refinement conversations.
//!
//! # Responsibility
//! - Define canonical data structures used by the version store, the
//!   refinement tracker and content backends.
//!
//! # Invariants
//! - Document bodies are opaque block sequences; only equality and
//!   substitution are meaningful to core logic.

pub mod document;
pub mod message;
pub mod refinement;
