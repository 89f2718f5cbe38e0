//! External collaborator contracts consumed by the core.
//!
//! # Responsibility
//! - Describe the content fetch/save/rollback-sync and refine services the
//!   version store and refinement workflow call across async boundaries.
//!
//! # Invariants
//! - Implementations are `Send + Sync` and shared as `Arc<dyn ...>`.
//! - `ContentRefiner::refine` only proposes a body; it must not mutate
//!   remote document state.

use crate::model::document::{Document, DocumentBody, DocumentId};
use crate::model::refinement::RefinementKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure reported by an external collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("document not found: {0}")]
    NotFound(DocumentId),
    #[error("network error: {0}")]
    Network(String),
    #[error("rejected by backend validation: {0}")]
    Validation(String),
    #[error("model error: {0}")]
    Model(String),
}

impl BackendError {
    /// Network and model failures may succeed when the caller re-invokes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Model(_))
    }
}

/// Acknowledgement returned by a successful save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReceipt {
    pub ok: bool,
    /// Backend-assigned revision number of the persisted body.
    pub version: u64,
}

/// Body proposed by the refine collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementProposal {
    pub updated_body: DocumentBody,
    /// Assistant-facing explanation of the change.
    pub message: String,
}

/// Remote content store used by the document version store.
#[async_trait]
pub trait ContentBackend: Send + Sync {
    /// Fetches one document with its metadata.
    async fn get_document(&self, id: &str) -> BackendResult<Document>;

    /// Persists a new body for an existing document.
    async fn save_document(&self, id: &str, body: &DocumentBody) -> BackendResult<SaveReceipt>;

    /// Persists a body restored by a local rollback.
    async fn sync_rollback(&self, id: &str, body: &DocumentBody) -> BackendResult<()>;
}

/// Rewrite service that proposes refined document bodies.
#[async_trait]
pub trait ContentRefiner: Send + Sync {
    async fn refine(
        &self,
        id: &str,
        prompt: &str,
        kind: RefinementKind,
    ) -> BackendResult<RefinementProposal>;
}
