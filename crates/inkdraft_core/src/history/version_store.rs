//! Document version store.
//!
//! # Responsibility
//! - Hold exactly one current document plus a capped undo history.
//! - Make every content change reversible up to the history capacity.
//! - Mediate load/save/rollback-sync calls to the content backend.
//!
//! # Invariants
//! - `history.len() <= capacity`; the oldest snapshot is evicted first.
//! - `version_count() == history.len() + 1`.
//! - Only the newest `load` applies; older responses are discarded.
//! - update/rollback/save run one at a time; rollback consumes its history
//!   entry only after the backend confirmed the restored body.
//! - A mutation whose document was replaced (load/clear) while it awaited
//!   the backend leaves the new document untouched.
//! - `is_saving` is cleared when a save settles, even a stale one.
//! - Failures set `error`, log, and return `Err`; they never panic.

use crate::bounded::BoundedLog;
use crate::config::{CoreConfig, DEFAULT_HISTORY_CAPACITY};
use crate::model::document::{Document, DocumentBody, DocumentId};
use crate::repo::content_backend::{BackendError, ContentBackend, SaveReceipt};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Snapshot of a body taken immediately before it was replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionEntry {
    pub body: DocumentBody,
    pub timestamp: DateTime<Utc>,
    /// Display counter ("version N"), increasing within one loaded document.
    pub sequence_number: u64,
}

impl VersionEntry {
    pub fn label(&self) -> String {
        format!("version {}", self.sequence_number)
    }

    pub fn preview_text(&self) -> Option<String> {
        self.body.preview_text()
    }
}

/// Result of a successful rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackOutcome {
    /// The consumed history entry whose body is now live.
    pub restored: VersionEntry,
    pub remaining_history: usize,
}

/// Consistent read of the whole store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub document: Option<Document>,
    pub history: Vec<VersionEntry>,
    pub is_loading: bool,
    pub is_saving: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no document is loaded")]
    NoDocument,
    #[error("no previous version to roll back to")]
    NothingToRollback,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("backend did not accept the save")]
    SaveRejected,
    #[error("load of `{0}` was superseded by a newer load")]
    Superseded(DocumentId),
    #[error("document changed while {0} was in flight")]
    Consistency(&'static str),
}

struct StoreState {
    document: Option<Document>,
    history: BoundedLog<VersionEntry>,
    is_loading: bool,
    is_saving: bool,
    error: Option<String>,
    next_sequence: u64,
    /// Bumped whenever the live document is replaced or cleared.
    generation: u64,
    latest_load_ticket: u64,
    /// Bumped on every body change; compared with `saved_revision`.
    body_revision: u64,
    saved_revision: u64,
    last_saved_version: Option<u64>,
}

impl StoreState {
    fn new(capacity: usize) -> Self {
        Self {
            document: None,
            history: BoundedLog::new(capacity),
            is_loading: false,
            is_saving: false,
            error: None,
            next_sequence: 1,
            generation: 0,
            latest_load_ticket: 0,
            body_revision: 0,
            saved_revision: 0,
            last_saved_version: None,
        }
    }

    fn reset(&mut self) {
        self.document = None;
        self.history.clear();
        self.is_loading = false;
        self.is_saving = false;
        self.error = None;
        self.next_sequence = 1;
        self.generation += 1;
        self.latest_load_ticket += 1;
        self.body_revision = 0;
        self.saved_revision = 0;
        self.last_saved_version = None;
    }

    fn fail(&mut self, err: StoreError) -> StoreError {
        self.error = Some(err.to_string());
        err
    }
}

/// Owner of the live document and its undo history.
pub struct DocumentVersionStore {
    backend: Arc<dyn ContentBackend>,
    state: Mutex<StoreState>,
    /// Serializes update/rollback/save so history read-modify-write is atomic.
    mutations: tokio::sync::Mutex<()>,
}

impl DocumentVersionStore {
    pub fn new(backend: Arc<dyn ContentBackend>) -> Self {
        Self::with_capacity(backend, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(backend: Arc<dyn ContentBackend>, history_capacity: usize) -> Self {
        Self {
            backend,
            state: Mutex::new(StoreState::new(history_capacity)),
            mutations: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(backend: Arc<dyn ContentBackend>, config: &CoreConfig) -> Self {
        Self::with_capacity(backend, config.history_capacity)
    }

    /// Fetches `id`, replaces the current document and clears history.
    ///
    /// A newer `load` (or `clear`) supersedes this one: its response is then
    /// discarded and `StoreError::Superseded` returned.
    pub async fn load(&self, id: &str) -> Result<Document, StoreError> {
        let ticket = {
            let mut state = self.state.lock();
            state.latest_load_ticket += 1;
            state.is_loading = true;
            state.error = None;
            state.latest_load_ticket
        };
        info!("event=doc_load module=store status=start document_id={id} ticket={ticket}");

        let fetched = self.backend.get_document(id).await;

        let mut state = self.state.lock();
        if state.latest_load_ticket != ticket {
            debug!("event=doc_load module=store status=superseded document_id={id} ticket={ticket}");
            return Err(StoreError::Superseded(id.to_string()));
        }
        state.is_loading = false;

        match fetched {
            Ok(document) => {
                let state = &mut *state;
                state.history.clear();
                state.next_sequence = 1;
                state.generation += 1;
                state.body_revision = 0;
                state.saved_revision = 0;
                state.last_saved_version = None;
                state.document = Some(document.clone());
                info!(
                    "event=doc_load module=store status=ok document_id={id} blocks={}",
                    document.body.block_count()
                );
                Ok(document)
            }
            Err(err) => {
                error!("event=doc_load module=store status=error document_id={id} error={err}");
                Err(state.fail(err.into()))
            }
        }
    }

    /// Replaces the live body, pushing the previous body onto history.
    ///
    /// Purely local; the backend is not contacted.
    pub async fn update_content(&self, new_body: DocumentBody) -> Result<(), StoreError> {
        self.apply_update(None, new_body).await
    }

    /// Like `update_content`, but only while `expected` is still the loaded
    /// document. A body computed for a document that has since been replaced
    /// returns `StoreError::Consistency` and changes nothing.
    pub async fn update_content_for(
        &self,
        expected: &str,
        new_body: DocumentBody,
    ) -> Result<(), StoreError> {
        self.apply_update(Some(expected), new_body).await
    }

    async fn apply_update(
        &self,
        expected: Option<&str>,
        new_body: DocumentBody,
    ) -> Result<(), StoreError> {
        let _serialized = self.mutations.lock().await;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(document) = state.document.as_mut() else {
            warn!("event=doc_update module=store status=error error_code=no_document");
            return Err(state.fail(StoreError::NoDocument));
        };
        if let Some(expected) = expected.filter(|expected| *expected != document.id) {
            warn!(
                "event=doc_update module=store status=error document_id={} expected_id={expected} error_code=document_replaced",
                document.id
            );
            return Err(state.fail(StoreError::Consistency("update")));
        }

        let block_count = new_body.block_count();
        let previous = document.replace_body(new_body);
        let sequence_number = state.next_sequence;
        state.next_sequence += 1;
        state.body_revision += 1;
        state.error = None;

        let evicted = state.history.push(VersionEntry {
            body: previous,
            timestamp: Utc::now(),
            sequence_number,
        });
        info!(
            "event=doc_update module=store status=ok document_id={} blocks={} history_len={} evicted_sequence={}",
            document.id,
            block_count,
            state.history.len(),
            evicted.map_or(0, |entry| entry.sequence_number)
        );
        Ok(())
    }

    /// Restores the newest history entry and syncs it to the backend.
    ///
    /// The entry is consumed only after the backend accepted the restored
    /// body; on sync failure both document and history stay unchanged.
    pub async fn rollback(&self) -> Result<RollbackOutcome, StoreError> {
        let _serialized = self.mutations.lock().await;
        let (id, generation, candidate) = {
            let mut state = self.state.lock();
            let Some(id) = state.document.as_ref().map(|doc| doc.id.clone()) else {
                warn!("event=doc_rollback module=store status=error error_code=no_document");
                return Err(state.fail(StoreError::NoDocument));
            };
            let Some(candidate) = state.history.newest().cloned() else {
                warn!(
                    "event=doc_rollback module=store status=error document_id={id} error_code=empty_history"
                );
                return Err(state.fail(StoreError::NothingToRollback));
            };
            (id, state.generation, candidate)
        };
        info!(
            "event=doc_rollback module=store status=start document_id={id} sequence={}",
            candidate.sequence_number
        );

        let synced = self.backend.sync_rollback(&id, &candidate.body).await;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.generation != generation {
            warn!("event=doc_rollback module=store status=error document_id={id} error_code=document_replaced");
            return Err(state.fail(StoreError::Consistency("rollback")));
        }
        if let Err(err) = synced {
            error!("event=doc_rollback module=store status=error document_id={id} error={err}");
            return Err(state.fail(err.into()));
        }

        let (Some(document), Some(restored)) = (state.document.as_mut(), state.history.pop_newest())
        else {
            return Err(state.fail(StoreError::Consistency("rollback")));
        };
        document.replace_body(restored.body.clone());
        state.body_revision += 1;
        state.error = None;
        let remaining_history = state.history.len();
        info!(
            "event=doc_rollback module=store status=ok document_id={id} sequence={} history_len={remaining_history}",
            restored.sequence_number
        );
        Ok(RollbackOutcome {
            restored,
            remaining_history,
        })
    }

    /// Persists the live body through the backend. History is untouched.
    pub async fn save(&self) -> Result<SaveReceipt, StoreError> {
        self.persist(None).await
    }

    /// Saves only while `expected` is still the loaded document.
    pub async fn save_for(&self, expected: &str) -> Result<SaveReceipt, StoreError> {
        self.persist(Some(expected)).await
    }

    async fn persist(&self, expected: Option<&str>) -> Result<SaveReceipt, StoreError> {
        let _serialized = self.mutations.lock().await;
        let (id, body, generation, revision) = {
            let mut state = self.state.lock();
            let Some(document) = state.document.as_ref() else {
                warn!("event=doc_save module=store status=error error_code=no_document");
                return Err(state.fail(StoreError::NoDocument));
            };
            if let Some(expected) = expected.filter(|expected| *expected != document.id) {
                warn!(
                    "event=doc_save module=store status=error document_id={} expected_id={expected} error_code=document_replaced",
                    document.id
                );
                return Err(state.fail(StoreError::Consistency("save")));
            }
            let snapshot = (document.id.clone(), document.body.clone());
            state.is_saving = true;
            (snapshot.0, snapshot.1, state.generation, state.body_revision)
        };
        info!("event=doc_save module=store status=start document_id={id}");

        let saved = self.backend.save_document(&id, &body).await;

        let mut state = self.state.lock();
        // Saves are serialized, so no other save owns the flag.
        state.is_saving = false;
        if state.generation != generation {
            // The document was replaced meanwhile; the rest belongs to the new one.
            warn!("event=doc_save module=store status=stale document_id={id}");
            return saved.map_err(StoreError::from);
        }

        match saved {
            Ok(receipt) if receipt.ok => {
                state.saved_revision = revision;
                state.last_saved_version = Some(receipt.version);
                state.error = None;
                info!(
                    "event=doc_save module=store status=ok document_id={id} version={}",
                    receipt.version
                );
                Ok(receipt)
            }
            Ok(_) => {
                error!("event=doc_save module=store status=error document_id={id} error_code=rejected");
                Err(state.fail(StoreError::SaveRejected))
            }
            Err(err) => {
                error!("event=doc_save module=store status=error document_id={id} error={err}");
                Err(state.fail(err.into()))
            }
        }
    }

    pub fn can_rollback(&self) -> bool {
        !self.state.lock().history.is_empty()
    }

    /// History entries plus the live document.
    pub fn version_count(&self) -> usize {
        self.state.lock().history.len() + 1
    }

    pub fn document(&self) -> Option<Document> {
        self.state.lock().document.clone()
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        self.state.lock().document.as_ref().map(|doc| doc.id.clone())
    }

    pub fn body(&self) -> Option<DocumentBody> {
        self.state
            .lock()
            .document
            .as_ref()
            .map(|doc| doc.body.clone())
    }

    /// History oldest-first.
    pub fn history(&self) -> Vec<VersionEntry> {
        self.state.lock().history.to_vec()
    }

    pub fn history_capacity(&self) -> usize {
        self.state.lock().history.capacity()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.lock();
        StoreSnapshot {
            document: state.document.clone(),
            history: state.history.to_vec(),
            is_loading: state.is_loading,
            is_saving: state.is_saving,
            error: state.error.clone(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().is_loading
    }

    pub fn is_saving(&self) -> bool {
        self.state.lock().is_saving
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn clear_error(&self) {
        self.state.lock().error = None;
    }

    /// Backend revision of the most recent successful save of this document.
    pub fn last_saved_version(&self) -> Option<u64> {
        self.state.lock().last_saved_version
    }

    /// True when the live body changed since load or the last save.
    pub fn has_unsaved_changes(&self) -> bool {
        let state = self.state.lock();
        state.document.is_some() && state.body_revision != state.saved_revision
    }

    /// Drops document, history, flags and error; in-flight loads are discarded.
    pub fn clear(&self) {
        self.state.lock().reset();
        debug!("event=doc_clear module=store status=ok");
    }
}
