//! Conversational refinement tracker.
//!
//! # Responsibility
//! - Keep the capped refinement conversation (user prompts and assistant
//!   replies) in append order.
//! - Expose one processing flag plus status for the whole conversation.
//!
//! # Invariants
//! - `messages.len() <= capacity`; the oldest message is evicted first.
//! - Message content is trimmed and never empty.
//! - After creation only a message's `status` may change.
//! - Status transitions: `None -> Refining | RollingBack -> Complete | Error`.
//! - No I/O. Single-flight is the caller's job (see `is_processing`).

use crate::bounded::BoundedLog;
use crate::config::{CoreConfig, DEFAULT_MESSAGE_CAPACITY};
use crate::model::message::{ChatMessage, MessageId, MessageRole, MessageStatus};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

const REFINING_MESSAGE: &str = "Refining content...";
const ROLLING_BACK_MESSAGE: &str = "Restoring previous version...";
const DEFAULT_COMPLETE_MESSAGE: &str = "Refinement complete.";
const DEFAULT_FAILURE_MESSAGE: &str = "Refinement failed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Refining,
    RollingBack,
    Complete,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Refining => "refining",
            Self::RollingBack => "rolling_back",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

/// UI-facing view of the processing flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingState {
    pub is_processing: bool,
    /// `None` before the first refinement or after `reset`.
    pub status: Option<ProcessingStatus>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("message content must not be empty")]
    EmptyMessage,
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),
}

struct TrackerState {
    messages: BoundedLog<ChatMessage>,
    processing: ProcessingState,
    error: Option<String>,
}

impl TrackerState {
    fn append(&mut self, message: ChatMessage) -> ChatMessage {
        if let Some(evicted) = self.messages.push(message.clone()) {
            debug!(
                "event=message_evict module=tracker status=ok message_id={}",
                evicted.id
            );
        }
        message
    }

    fn finish(&mut self, status: ProcessingStatus, message: String) {
        self.processing = ProcessingState {
            is_processing: false,
            status: Some(status),
            message: Some(message),
        };
    }
}

/// Owner of the refinement message log and processing flag.
pub struct RefinementTracker {
    state: Mutex<TrackerState>,
}

impl Default for RefinementTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RefinementTracker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MESSAGE_CAPACITY)
    }

    pub fn with_capacity(message_capacity: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                messages: BoundedLog::new(message_capacity),
                processing: ProcessingState::default(),
                error: None,
            }),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::with_capacity(config.message_capacity)
    }

    pub fn add_user_message(&self, content: &str) -> Result<ChatMessage, TrackerError> {
        let content = normalized(content, "add_user_message")?;
        Ok(self.state.lock().append(ChatMessage::user(content)))
    }

    pub fn add_assistant_message(
        &self,
        content: &str,
        status: MessageStatus,
    ) -> Result<ChatMessage, TrackerError> {
        let content = normalized(content, "add_assistant_message")?;
        Ok(self
            .state
            .lock()
            .append(ChatMessage::assistant(content, status)))
    }

    /// Enters `Refining` and records the prompt as a user message.
    ///
    /// An empty prompt is rejected before any state changes.
    pub fn start_refinement(&self, prompt: &str) -> Result<ChatMessage, TrackerError> {
        let prompt = normalized(prompt, "start_refinement")?;
        let mut state = self.state.lock();
        state.processing = ProcessingState {
            is_processing: true,
            status: Some(ProcessingStatus::Refining),
            message: Some(REFINING_MESSAGE.to_string()),
        };
        state.error = None;
        info!(
            "event=refine_start module=tracker status=start prompt_len={}",
            prompt.chars().count()
        );
        Ok(state.append(ChatMessage::user(prompt)))
    }

    pub fn start_rollback(&self) {
        let mut state = self.state.lock();
        state.processing = ProcessingState {
            is_processing: true,
            status: Some(ProcessingStatus::RollingBack),
            message: Some(ROLLING_BACK_MESSAGE.to_string()),
        };
        state.error = None;
        info!("event=rollback_start module=tracker status=start");
    }

    /// Leaves processing as `Complete` and appends a completed assistant reply.
    pub fn complete_refinement(&self, message: &str) -> ChatMessage {
        let content = or_default(message, DEFAULT_COMPLETE_MESSAGE);
        let mut state = self.state.lock();
        state.finish(ProcessingStatus::Complete, content.clone());
        state.error = None;
        info!(
            "event=refine_finish module=tracker status=ok messages={}",
            state.messages.len() + 1
        );
        state.append(ChatMessage::assistant(content, MessageStatus::Completed))
    }

    /// Leaves processing as `Error` and echoes the failure into the log.
    pub fn fail_refinement(&self, message: &str) -> ChatMessage {
        let content = or_default(message, DEFAULT_FAILURE_MESSAGE);
        let mut state = self.state.lock();
        state.finish(ProcessingStatus::Error, content.clone());
        state.error = Some(content.clone());
        warn!(
            "event=refine_finish module=tracker status=error error_len={}",
            content.chars().count()
        );
        state.append(ChatMessage::assistant(content, MessageStatus::Error))
    }

    /// Changes the status of an existing message, e.g. to show a retry.
    pub fn set_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> Result<(), TrackerError> {
        let mut state = self.state.lock();
        let found = state.messages.iter_mut().find(|message| message.id == id);
        match found {
            Some(message) => {
                message.status = status;
                Ok(())
            }
            None => {
                warn!("event=message_status module=tracker status=error message_id={id} error_code=not_found");
                Err(TrackerError::MessageNotFound(id))
            }
        }
    }

    pub fn clear_error(&self) {
        self.state.lock().error = None;
    }

    pub fn clear_messages(&self) {
        self.state.lock().messages.clear();
    }

    /// Drops messages, processing state and error.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.messages.clear();
        state.processing = ProcessingState::default();
        state.error = None;
        debug!("event=tracker_reset module=tracker status=ok");
    }

    pub fn processing_state(&self) -> ProcessingState {
        self.state.lock().processing.clone()
    }

    pub fn is_processing(&self) -> bool {
        self.state.lock().processing.is_processing
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Messages oldest-first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().messages.to_vec()
    }

    pub fn last_message(&self) -> Option<ChatMessage> {
        self.state.lock().messages.newest().cloned()
    }

    /// Newest user prompt still in the log.
    pub fn last_user_prompt(&self) -> Option<String> {
        self.state
            .lock()
            .messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.content.clone())
    }

    pub fn message_count(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn message_capacity(&self) -> usize {
        self.state.lock().messages.capacity()
    }
}

fn normalized<'a>(content: &'a str, op: &str) -> Result<&'a str, TrackerError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        warn!("event={op} module=tracker status=error error_code=empty_message");
        return Err(TrackerError::EmptyMessage);
    }
    Ok(trimmed)
}

fn or_default(message: &str, fallback: &str) -> String {
    match message.trim() {
        "" => fallback.to_string(),
        trimmed => trimmed.to_string(),
    }
}
