//! Versioned document state.

pub mod version_store;

pub use version_store::{
    DocumentVersionStore, RollbackOutcome, StoreError, StoreSnapshot, VersionEntry,
};
