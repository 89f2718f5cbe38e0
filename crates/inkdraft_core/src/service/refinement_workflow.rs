//! Refine/rollback use-case workflow.
//!
//! # Responsibility
//! - Sequence refine -> update -> save -> complete across the version store,
//!   the refinement tracker and the content refiner.
//! - Wrap rollback in the same start/complete/fail lifecycle.
//! - Mirror every run into the operation tracker for progress display.
//!
//! # Invariants
//! - Precondition failures (`NoDocument`, `EmptyPrompt`, `Busy`) leave the
//!   tracker, store and operation registry untouched.
//! - At most one refine/rollback run per workflow at a time.
//! - A refine failure never mutates the document; a save failure after a
//!   successful update is reported but does not fail the run.
//! - A refined body only lands on the document it was requested for.

use crate::chat::tracker::RefinementTracker;
use crate::config::CoreConfig;
use crate::history::version_store::{DocumentVersionStore, RollbackOutcome, StoreError};
use crate::model::message::{ChatMessage, MessageId, MessageStatus};
use crate::model::refinement::RefinementKind;
use crate::ops::{
    OperationError, OperationHandle, OperationKind, OperationSnapshot, OperationState,
    OperationTracker, StartOptions,
};
use crate::repo::content_backend::{BackendError, ContentBackend, ContentRefiner, SaveReceipt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("no document is loaded")]
    NoDocument,
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("another refinement or rollback is in progress")]
    Busy,
    #[error("refinement failed: {0}")]
    Refine(#[source] BackendError),
    #[error("refinement timed out")]
    TimedOut,
    #[error("refinement was cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no failed refinement to retry")]
    NothingToRetry,
}

impl WorkflowError {
    /// Whether `retry_last` has a chance of succeeding after this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Refine(err) | Self::Store(StoreError::Backend(err)) => err.is_retryable(),
            Self::TimedOut => true,
            _ => false,
        }
    }
}

/// Prompt and kind of one refinement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineRequest {
    pub prompt: String,
    pub kind: RefinementKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefineOutcome {
    /// Assistant reply appended to the conversation.
    pub reply: ChatMessage,
    pub saved: Option<SaveReceipt>,
    /// Set when the refined body was applied locally but could not be saved.
    pub save_error: Option<String>,
}

struct FailedRun {
    request: RefineRequest,
    reply_id: MessageId,
}

/// Composition root for refinement and rollback runs.
pub struct RefinementWorkflow {
    store: Arc<DocumentVersionStore>,
    tracker: Arc<RefinementTracker>,
    operations: OperationTracker,
    refiner: Arc<dyn ContentRefiner>,
    operation_timeout: Option<Duration>,
    in_flight: AtomicBool,
    last_failed: Mutex<Option<FailedRun>>,
}

impl RefinementWorkflow {
    pub fn new(
        store: Arc<DocumentVersionStore>,
        tracker: Arc<RefinementTracker>,
        operations: OperationTracker,
        refiner: Arc<dyn ContentRefiner>,
    ) -> Self {
        Self {
            store,
            tracker,
            operations,
            refiner,
            operation_timeout: None,
            in_flight: AtomicBool::new(false),
            last_failed: Mutex::new(None),
        }
    }

    /// Builds fresh store, tracker and operation registry from `config`.
    pub fn from_config(
        backend: Arc<dyn ContentBackend>,
        refiner: Arc<dyn ContentRefiner>,
        config: &CoreConfig,
    ) -> Self {
        let store = Arc::new(DocumentVersionStore::from_config(backend, config));
        let tracker = Arc::new(RefinementTracker::from_config(config));
        Self::new(store, tracker, OperationTracker::new(), refiner)
            .with_operation_timeout(config.default_operation_timeout())
    }

    /// Fails refine runs whose refiner call outlives `timeout`.
    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<DocumentVersionStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<RefinementTracker> {
        &self.tracker
    }

    pub fn operations(&self) -> &OperationTracker {
        &self.operations
    }

    /// Request that `retry_last` would replay.
    pub fn last_failed(&self) -> Option<RefineRequest> {
        self.last_failed
            .lock()
            .as_ref()
            .map(|run| run.request.clone())
    }

    /// Runs one refinement pass against the loaded document.
    pub async fn refine(
        &self,
        prompt: &str,
        kind: RefinementKind,
    ) -> Result<RefineOutcome, WorkflowError> {
        let prompt = prompt.trim();
        let Some(document_id) = self.store.document_id() else {
            warn!("event=workflow_refine module=workflow status=error error_code=no_document");
            return Err(WorkflowError::NoDocument);
        };
        if prompt.is_empty() {
            warn!("event=workflow_refine module=workflow status=error document_id={document_id} error_code=empty_prompt");
            return Err(WorkflowError::EmptyPrompt);
        }
        let _flight = self.begin_flight(&document_id)?;

        let op_id = refine_operation_id(&document_id);
        let mut options = StartOptions::new(OperationKind::Process)
            .message("refining")
            .cancellable();
        if let Some(timeout) = self.operation_timeout {
            options = options.timeout(timeout);
        }
        self.tracker
            .start_refinement(prompt)
            .map_err(|_| WorkflowError::EmptyPrompt)?;
        let handle = self.begin_operation(&op_id, options);
        info!(
            "event=workflow_refine module=workflow status=start document_id={document_id} kind={kind} prompt_len={}",
            prompt.chars().count()
        );

        let request = RefineRequest {
            prompt: prompt.to_string(),
            kind,
        };
        match self.run_refine(&document_id, &request, &handle).await {
            Ok(outcome) => {
                *self.last_failed.lock() = None;
                settle(&op_id, handle.complete(Some(json!({
                    "document_id": document_id,
                    "saved_version": outcome.saved.as_ref().map(|receipt| receipt.version),
                }))));
                info!(
                    "event=workflow_refine module=workflow status=ok document_id={document_id} saved={}",
                    outcome.save_error.is_none()
                );
                Ok(outcome)
            }
            Err(err) => {
                let reply = self.tracker.fail_refinement(&err.to_string());
                *self.last_failed.lock() = Some(FailedRun {
                    request,
                    reply_id: reply.id,
                });
                settle(&op_id, handle.fail(err.to_string()));
                warn!("event=workflow_refine module=workflow status=error document_id={document_id} error={err}");
                Err(err)
            }
        }
    }

    /// Replays the most recent failed refinement as a fresh pass.
    ///
    /// The failed reply is shown as `processing` while the retry runs and
    /// returns to `error` afterwards.
    pub async fn retry_last(&self) -> Result<RefineOutcome, WorkflowError> {
        let Some((request, reply_id)) = self
            .last_failed
            .lock()
            .as_ref()
            .map(|run| (run.request.clone(), run.reply_id))
        else {
            return Err(WorkflowError::NothingToRetry);
        };
        debug!("event=workflow_retry module=workflow status=start kind={}", request.kind);

        // The reply may already be evicted from the capped log.
        let marked = self
            .tracker
            .set_message_status(reply_id, MessageStatus::Processing)
            .is_ok();
        let result = self.refine(&request.prompt, request.kind).await;
        if marked {
            let _ = self
                .tracker
                .set_message_status(reply_id, MessageStatus::Error);
        }
        result
    }

    /// Restores the previous version of the loaded document.
    pub async fn rollback(&self) -> Result<RollbackOutcome, WorkflowError> {
        let Some(document_id) = self.store.document_id() else {
            warn!("event=workflow_rollback module=workflow status=error error_code=no_document");
            return Err(WorkflowError::NoDocument);
        };
        if !self.store.can_rollback() {
            warn!("event=workflow_rollback module=workflow status=error document_id={document_id} error_code=empty_history");
            return Err(StoreError::NothingToRollback.into());
        }
        let _flight = self.begin_flight(&document_id)?;

        let op_id = rollback_operation_id(&document_id);
        let handle = self.begin_operation(
            &op_id,
            StartOptions::new(OperationKind::Save).message("restoring"),
        );
        self.tracker.start_rollback();
        info!("event=workflow_rollback module=workflow status=start document_id={document_id}");

        match self.store.rollback().await {
            Ok(outcome) => {
                self.tracker
                    .complete_refinement(&format!("Restored {}.", outcome.restored.label()));
                settle(&op_id, handle.complete(Some(json!({
                    "document_id": document_id,
                    "restored_sequence": outcome.restored.sequence_number,
                    "remaining_history": outcome.remaining_history,
                }))));
                info!(
                    "event=workflow_rollback module=workflow status=ok document_id={document_id} remaining_history={}",
                    outcome.remaining_history
                );
                Ok(outcome)
            }
            Err(err) => {
                self.tracker.fail_refinement(&format!("Rollback failed: {err}"));
                settle(&op_id, handle.fail(err.to_string()));
                warn!("event=workflow_rollback module=workflow status=error document_id={document_id} error={err}");
                Err(err.into())
            }
        }
    }

    /// Cancels the running refinement of the loaded document, if any.
    pub fn cancel(&self) -> bool {
        let Some(document_id) = self.store.document_id() else {
            return false;
        };
        self.operations
            .cancel(&refine_operation_id(&document_id))
            .is_ok()
    }

    async fn run_refine(
        &self,
        document_id: &str,
        request: &RefineRequest,
        handle: &OperationHandle,
    ) -> Result<RefineOutcome, WorkflowError> {
        step(handle, 10.0, "started");
        let token = handle.cancellation_token();
        let proposal = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(interruption(handle.snapshot()));
            }
            proposal = self.refiner.refine(document_id, &request.prompt, request.kind) => {
                proposal.map_err(WorkflowError::Refine)?
            }
        };
        // A timeout or cancel that lands after the refiner returned still wins.
        if handle.is_cancelled() {
            return Err(interruption(handle.snapshot()));
        }
        step(handle, 40.0, "refined");

        self.store
            .update_content_for(document_id, proposal.updated_body)
            .await?;
        step(handle, 70.0, "updated");

        let (saved, save_error) = match self.store.save_for(document_id).await {
            Ok(receipt) => (Some(receipt), None),
            Err(err) => {
                warn!("event=workflow_save module=workflow status=error document_id={document_id} error={err}");
                (None, Some(err.to_string()))
            }
        };
        step(handle, 90.0, "saved");

        let reply_text = match &save_error {
            None => proposal.message,
            Some(err) => format!("{} (warning: changes were not saved: {err})", proposal.message),
        };
        let reply = self.tracker.complete_refinement(&reply_text);
        Ok(RefineOutcome {
            reply,
            saved,
            save_error,
        })
    }

    fn begin_flight(&self, document_id: &str) -> Result<InFlight<'_>, WorkflowError> {
        if self.tracker.is_processing()
            || self
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            warn!("event=workflow_guard module=workflow status=error document_id={document_id} error_code=busy");
            return Err(WorkflowError::Busy);
        }
        Ok(InFlight(&self.in_flight))
    }

    /// Drops this document's finished runs, then registers `op_id`.
    fn begin_operation(&self, op_id: &str, options: StartOptions) -> OperationHandle {
        for id in [op_id.to_string(), sibling_operation_id(op_id)] {
            if self
                .operations
                .snapshot(&id)
                .is_some_and(|snapshot| snapshot.state.is_terminal())
            {
                self.operations.remove(&id);
            }
        }
        self.operations.start(op_id, options)
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub fn refine_operation_id(document_id: &str) -> String {
    format!("refine:{document_id}")
}

pub fn rollback_operation_id(document_id: &str) -> String {
    format!("rollback:{document_id}")
}

fn sibling_operation_id(op_id: &str) -> String {
    match op_id.split_once(':') {
        Some(("refine", document_id)) => rollback_operation_id(document_id),
        Some((_, document_id)) => refine_operation_id(document_id),
        None => op_id.to_string(),
    }
}

fn interruption(snapshot: Option<OperationSnapshot>) -> WorkflowError {
    match snapshot.map(|snapshot| snapshot.state) {
        Some(OperationState::Timeout) => WorkflowError::TimedOut,
        _ => WorkflowError::Cancelled,
    }
}

fn step(handle: &OperationHandle, pct: f64, label: &str) {
    if let Err(err) = handle.update_progress(pct, Some(label)) {
        debug!("event=workflow_progress module=workflow status=skipped op_id={} error={err}", handle.id());
    }
}

/// Timed-out or cancelled runs are already terminal in the registry.
fn settle(op_id: &str, result: Result<OperationSnapshot, OperationError>) {
    if let Err(err) = result {
        debug!("event=workflow_settle module=workflow status=skipped op_id={op_id} error={err}");
    }
}
