mod common;

use async_trait::async_trait;
use common::{document, paragraph_body, MockBackend, MockRefiner, RefineCall};
use inkdraft_core::{
    BackendError, BackendResult, ContentRefiner, DocumentVersionStore, MessageRole,
    MessageStatus, OperationState, OperationTracker, ProcessingStatus, RefinementKind,
    RefinementProposal, RefinementTracker, RefinementWorkflow, StoreError, WorkflowError,
};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    backend: Arc<MockBackend>,
    refiner: Arc<MockRefiner>,
    workflow: RefinementWorkflow,
}

fn fixture() -> Fixture {
    let backend = Arc::new(MockBackend::with_documents([document("post", &["draft"])]));
    let refiner = Arc::new(MockRefiner::default());
    let workflow = RefinementWorkflow::new(
        Arc::new(DocumentVersionStore::new(backend.clone())),
        Arc::new(RefinementTracker::new()),
        OperationTracker::new(),
        refiner.clone(),
    );
    Fixture {
        backend,
        refiner,
        workflow,
    }
}

async fn loaded_fixture() -> Fixture {
    let fixture = fixture();
    fixture.workflow.store().load("post").await.unwrap();
    fixture
}

fn proposal(texts: &[&str], message: &str) -> RefinementProposal {
    RefinementProposal {
        updated_body: paragraph_body(texts),
        message: message.to_string(),
    }
}

#[tokio::test]
async fn successful_refine_updates_saves_and_completes() {
    let fx = loaded_fixture().await;
    fx.refiner
        .push_result(Ok(proposal(&["tight draft"], "Shortened by 40%.")));

    let outcome = fx
        .workflow
        .refine("  shorten this ", RefinementKind::Shorten)
        .await
        .unwrap();

    assert_eq!(outcome.reply.content, "Shortened by 40%.");
    assert_eq!(outcome.reply.status, MessageStatus::Completed);
    assert_eq!(outcome.saved.unwrap().version, 1);
    assert!(outcome.save_error.is_none());

    let store = fx.workflow.store();
    assert_eq!(store.body().unwrap(), paragraph_body(&["tight draft"]));
    assert_eq!(store.history()[0].body, paragraph_body(&["draft"]));
    assert_eq!(
        fx.backend.stored_body("post"),
        Some(paragraph_body(&["tight draft"]))
    );
    assert_eq!(
        fx.refiner.calls(),
        vec![RefineCall {
            document_id: "post".to_string(),
            prompt: "shorten this".to_string(),
            kind: RefinementKind::Shorten,
        }]
    );

    let tracker = fx.workflow.tracker();
    let roles: Vec<MessageRole> = tracker.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);
    assert!(!tracker.is_processing());

    let operation = fx.workflow.operations().snapshot("refine:post").unwrap();
    assert_eq!(operation.state, OperationState::Success);
    assert_eq!(operation.progress, 100.0);
    assert_eq!(operation.result.unwrap()["saved_version"], 1);
}

#[tokio::test]
async fn refine_failure_leaves_document_untouched() {
    let fx = loaded_fixture().await;
    fx.refiner
        .push_error(BackendError::Network("connection reset".to_string()));

    let err = fx
        .workflow
        .refine("expand", RefinementKind::Expand)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        WorkflowError::Refine(BackendError::Network("connection reset".to_string()))
    );
    let store = fx.workflow.store();
    assert_eq!(store.body().unwrap(), paragraph_body(&["draft"]));
    assert!(!store.can_rollback());
    assert!(fx.backend.saved().is_empty());

    let tracker = fx.workflow.tracker();
    assert!(!tracker.is_processing());
    assert!(tracker.error().unwrap().contains("connection reset"));
    assert_eq!(tracker.last_message().unwrap().status, MessageStatus::Error);
    assert_eq!(
        fx.workflow.operations().state_of("refine:post"),
        OperationState::Error
    );
    assert_eq!(fx.workflow.last_failed().unwrap().prompt, "expand");
}

#[tokio::test]
async fn save_failure_completes_with_warning() {
    let fx = loaded_fixture().await;
    fx.refiner.push_result(Ok(proposal(&["better"], "Improved.")));
    fx.backend
        .fail_next_save(BackendError::Network("timeout".to_string()));

    let outcome = fx
        .workflow
        .refine("improve", RefinementKind::Improve)
        .await
        .unwrap();

    assert!(outcome.saved.is_none());
    assert!(outcome.save_error.unwrap().contains("timeout"));
    assert!(outcome.reply.content.starts_with("Improved."));
    assert!(outcome.reply.content.contains("not saved"));
    assert_eq!(outcome.reply.status, MessageStatus::Completed);

    let store = fx.workflow.store();
    assert_eq!(store.body().unwrap(), paragraph_body(&["better"]));
    assert!(store.can_rollback());
    assert!(store.has_unsaved_changes());
    assert_eq!(
        fx.workflow.tracker().processing_state().status,
        Some(ProcessingStatus::Complete)
    );
}

#[tokio::test]
async fn preconditions_fail_without_side_effects() {
    let fx = fixture();
    assert_eq!(
        fx.workflow
            .refine("anything", RefinementKind::Custom)
            .await
            .unwrap_err(),
        WorkflowError::NoDocument
    );

    fx.workflow.store().load("post").await.unwrap();
    assert_eq!(
        fx.workflow
            .refine("   ", RefinementKind::Custom)
            .await
            .unwrap_err(),
        WorkflowError::EmptyPrompt
    );

    fx.workflow.tracker().start_refinement("manual").unwrap();
    assert_eq!(
        fx.workflow
            .refine("second", RefinementKind::Custom)
            .await
            .unwrap_err(),
        WorkflowError::Busy
    );

    assert!(fx.refiner.calls().is_empty());
    assert!(fx.workflow.operations().is_empty());
    assert_eq!(fx.workflow.tracker().message_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn overlapping_refines_are_rejected_as_busy() {
    let fx = loaded_fixture().await;
    fx.refiner.set_delay(Duration::from_millis(30));

    let (first, second) = tokio::join!(
        fx.workflow.refine("one", RefinementKind::Rephrase),
        async {
            tokio::task::yield_now().await;
            fx.workflow.refine("two", RefinementKind::Rephrase).await
        }
    );

    first.unwrap();
    assert_eq!(second.unwrap_err(), WorkflowError::Busy);
    assert_eq!(fx.refiner.calls().len(), 1);
}

#[tokio::test]
async fn retry_replays_the_last_failed_request() {
    let fx = loaded_fixture().await;
    assert_eq!(
        fx.workflow.retry_last().await.unwrap_err(),
        WorkflowError::NothingToRetry
    );

    fx.refiner
        .push_error(BackendError::Model("overloaded".to_string()));
    let err = fx
        .workflow
        .refine("fix it", RefinementKind::FixGrammar)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    let failed_reply = fx.workflow.tracker().last_message().unwrap();

    let outcome = fx.workflow.retry_last().await.unwrap();
    assert_eq!(outcome.reply.status, MessageStatus::Completed);
    assert!(fx.workflow.last_failed().is_none());

    let calls = fx.refiner.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], calls[1]);
    assert_eq!(calls[1].kind, RefinementKind::FixGrammar);

    let messages = fx.workflow.tracker().messages();
    assert_eq!(messages.len(), 4);
    let original = messages
        .iter()
        .find(|message| message.id == failed_reply.id)
        .unwrap();
    assert_eq!(original.status, MessageStatus::Error);
}

#[tokio::test]
async fn rollback_restores_previous_version_through_lifecycle() {
    let fx = loaded_fixture().await;
    fx.workflow
        .refine("rewrite", RefinementKind::Rephrase)
        .await
        .unwrap();

    let outcome = fx.workflow.rollback().await.unwrap();

    assert_eq!(outcome.remaining_history, 0);
    assert_eq!(
        fx.workflow.store().body().unwrap(),
        paragraph_body(&["draft"])
    );
    assert_eq!(fx.backend.stored_body("post"), Some(paragraph_body(&["draft"])));
    let reply = fx.workflow.tracker().last_message().unwrap();
    assert_eq!(reply.content, "Restored version 1.");
    assert_eq!(reply.status, MessageStatus::Completed);

    let operations = fx.workflow.operations();
    assert_eq!(operations.state_of("rollback:post"), OperationState::Success);
    assert_eq!(operations.state_of("refine:post"), OperationState::Idle);
}

#[tokio::test]
async fn rollback_without_history_is_rejected_before_start() {
    let fx = loaded_fixture().await;
    assert_eq!(
        fx.workflow.rollback().await.unwrap_err(),
        WorkflowError::Store(StoreError::NothingToRollback)
    );
    assert_eq!(fx.workflow.tracker().message_count(), 0);
    assert!(fx.workflow.operations().is_empty());
}

#[tokio::test]
async fn failed_rollback_sync_is_reported_in_conversation() {
    let fx = loaded_fixture().await;
    fx.workflow
        .refine("rewrite", RefinementKind::Rephrase)
        .await
        .unwrap();
    fx.backend
        .fail_next_sync(BackendError::Network("offline".to_string()));

    let err = fx.workflow.rollback().await.unwrap_err();
    assert!(matches!(err, WorkflowError::Store(StoreError::Backend(_))));
    assert!(fx.workflow.store().can_rollback());

    let tracker = fx.workflow.tracker();
    let reply = tracker.last_message().unwrap();
    assert_eq!(reply.status, MessageStatus::Error);
    assert!(reply.content.starts_with("Rollback failed"));
    assert_eq!(
        fx.workflow.operations().state_of("rollback:post"),
        OperationState::Error
    );
}

#[tokio::test(start_paused = true)]
async fn slow_refiner_times_out() {
    let backend = Arc::new(MockBackend::with_documents([document("post", &["draft"])]));
    let refiner = Arc::new(MockRefiner::default());
    refiner.set_delay(Duration::from_secs(5));
    let workflow = RefinementWorkflow::new(
        Arc::new(DocumentVersionStore::new(backend.clone())),
        Arc::new(RefinementTracker::new()),
        OperationTracker::new(),
        refiner.clone(),
    )
    .with_operation_timeout(Some(Duration::from_millis(100)));
    workflow.store().load("post").await.unwrap();

    let err = workflow
        .refine("expand", RefinementKind::Expand)
        .await
        .unwrap_err();

    assert_eq!(err, WorkflowError::TimedOut);
    assert_eq!(
        workflow.operations().state_of("refine:post"),
        OperationState::Timeout
    );
    assert_eq!(workflow.store().body().unwrap(), paragraph_body(&["draft"]));
    assert_eq!(
        workflow.tracker().error().as_deref(),
        Some("refinement timed out")
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_running_refinement() {
    let fx = loaded_fixture().await;
    fx.refiner.set_delay(Duration::from_secs(5));

    let (result, cancelled) = tokio::join!(
        fx.workflow.refine("expand", RefinementKind::Expand),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            fx.workflow.cancel()
        }
    );

    assert!(cancelled);
    assert_eq!(result.unwrap_err(), WorkflowError::Cancelled);
    assert_eq!(
        fx.workflow.operations().state_of("refine:post"),
        OperationState::Cancelled
    );
    assert!(!fx.workflow.tracker().is_processing());
}

#[test]
fn only_transient_failures_are_retryable() {
    assert!(WorkflowError::Refine(BackendError::Network("reset".to_string())).is_retryable());
    assert!(WorkflowError::TimedOut.is_retryable());
    assert!(!WorkflowError::Refine(BackendError::Validation("empty".to_string())).is_retryable());
    assert!(!WorkflowError::Store(StoreError::Consistency("update")).is_retryable());
    assert!(!WorkflowError::Cancelled.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn refined_body_is_dropped_when_another_document_loads_mid_flight() {
    let fx = loaded_fixture().await;
    fx.backend.insert(document("other", &["other draft"]));
    fx.refiner.set_delay(Duration::from_millis(100));

    let (result, loaded) = tokio::join!(
        fx.workflow.refine("for post", RefinementKind::Expand),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            fx.workflow.store().load("other").await
        }
    );

    loaded.unwrap();
    assert_eq!(
        result.unwrap_err(),
        WorkflowError::Store(StoreError::Consistency("update"))
    );
    let store = fx.workflow.store();
    assert_eq!(store.document_id().as_deref(), Some("other"));
    assert_eq!(store.body().unwrap(), paragraph_body(&["other draft"]));
    assert!(!store.can_rollback());
    assert!(fx.backend.saved().is_empty());
    assert_eq!(
        fx.backend.stored_body("other").unwrap(),
        paragraph_body(&["other draft"])
    );

    let tracker = fx.workflow.tracker();
    assert!(!tracker.is_processing());
    assert_eq!(tracker.last_message().unwrap().status, MessageStatus::Error);
    assert_eq!(
        fx.workflow.operations().state_of("refine:post"),
        OperationState::Error
    );
}

#[tokio::test(start_paused = true)]
async fn save_in_flight_survives_loading_another_document() {
    let fx = loaded_fixture().await;
    fx.backend.insert(document("other", &["other draft"]));
    fx.backend.delay_save(Duration::from_millis(100));

    let (result, loaded) = tokio::join!(
        fx.workflow.refine("for post", RefinementKind::Expand),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            fx.workflow.store().load("other").await
        }
    );

    loaded.unwrap();
    let outcome = result.unwrap();
    assert_eq!(outcome.saved.unwrap().version, 1);
    assert_eq!(
        fx.backend.stored_body("post").unwrap(),
        paragraph_body(&["for post"])
    );

    let store = fx.workflow.store();
    assert!(!store.is_saving());
    assert_eq!(store.document_id().as_deref(), Some("other"));
    assert_eq!(store.body().unwrap(), paragraph_body(&["other draft"]));
    assert!(!store.has_unsaved_changes());
}

/// Refiner that cancels its own operation just before answering.
struct LateCancelRefiner {
    operations: OperationTracker,
}

#[async_trait]
impl ContentRefiner for LateCancelRefiner {
    async fn refine(
        &self,
        id: &str,
        prompt: &str,
        _kind: RefinementKind,
    ) -> BackendResult<RefinementProposal> {
        self.operations
            .cancel(&format!("refine:{id}"))
            .map_err(|err| BackendError::Model(err.to_string()))?;
        Ok(RefinementProposal {
            updated_body: paragraph_body(&[prompt]),
            message: "too late".to_string(),
        })
    }
}

#[tokio::test]
async fn cancel_landing_after_refiner_answer_still_wins() {
    let backend = Arc::new(MockBackend::with_documents([document("post", &["draft"])]));
    let operations = OperationTracker::new();
    let workflow = RefinementWorkflow::new(
        Arc::new(DocumentVersionStore::new(backend.clone())),
        Arc::new(RefinementTracker::new()),
        operations.clone(),
        Arc::new(LateCancelRefiner { operations }),
    );
    workflow.store().load("post").await.unwrap();

    let err = workflow
        .refine("expand", RefinementKind::Expand)
        .await
        .unwrap_err();

    assert_eq!(err, WorkflowError::Cancelled);
    assert_eq!(workflow.store().body().unwrap(), paragraph_body(&["draft"]));
    assert!(!workflow.store().can_rollback());
    assert!(backend.saved().is_empty());
    assert_eq!(
        workflow.operations().state_of("refine:post"),
        OperationState::Cancelled
    );
}
