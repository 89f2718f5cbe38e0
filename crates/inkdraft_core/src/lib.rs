//! Core domain logic for inkdraft.
//!
//! Versioned document editing with rollback, the refinement conversation log,
//! and a generic async operation tracker, composed by `RefinementWorkflow`.

pub mod bounded;
pub mod chat;
pub mod config;
pub mod db;
pub mod history;
pub mod logging;
pub mod model;
pub mod ops;
pub mod repo;
pub mod service;

pub use bounded::BoundedLog;
pub use chat::{ProcessingState, ProcessingStatus, RefinementTracker, TrackerError};
pub use config::{ConfigError, CoreConfig, LoggingConfig};
pub use history::{DocumentVersionStore, RollbackOutcome, StoreError, StoreSnapshot, VersionEntry};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::document::{
    ContentBlock, Document, DocumentBody, DocumentId, DocumentMetadata, DocumentValidationError,
};
pub use model::message::{ChatMessage, MessageId, MessageRole, MessageStatus};
pub use model::refinement::{RefinementKind, UnknownRefinementKind};
pub use ops::{
    OperationCallback, OperationError, OperationHandle, OperationId, OperationKind,
    OperationSnapshot, OperationState, OperationTracker, StartOptions,
};
pub use repo::content_backend::{
    BackendError, BackendResult, ContentBackend, ContentRefiner, RefinementProposal, SaveReceipt,
};
pub use repo::sqlite_backend::{RepoError, RepoResult, RevisionReason, RevisionRecord, SqliteContentBackend};
pub use service::refinement_workflow::{
    RefineOutcome, RefineRequest, RefinementWorkflow, WorkflowError,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
