//! Operation state vocabulary and snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Caller-chosen key of one tracked operation.
pub type OperationId = String;

/// Informational category of tracked work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Submit,
    Upload,
    Fetch,
    #[default]
    Process,
    Save,
    Delete,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Upload => "upload",
            Self::Fetch => "fetch",
            Self::Process => "process",
            Self::Save => "save",
            Self::Delete => "delete",
        }
    }
}

/// Per-operation lifecycle.
///
/// ```text
/// idle -> loading -> success | error | timeout | cancelled
/// ```
///
/// Terminal states are sticky until the operation is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Not registered (or removed).
    Idle,
    Loading,
    Success,
    Error,
    Timeout,
    Cancelled,
}

impl OperationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Error | Self::Timeout | Self::Cancelled
        )
    }

    /// `error` and `timeout` both carry error detail.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Timeout)
    }
}

impl Display for OperationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of one tracked operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSnapshot {
    pub id: OperationId,
    pub kind: OperationKind,
    pub state: OperationState,
    /// Always within `[0, 100]`.
    pub progress: f64,
    pub message: Option<String>,
    pub cancellable: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub timeout_ms: Option<u64>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

impl OperationSnapshot {
    pub fn is_loading(&self) -> bool {
        self.state == OperationState::Loading
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|ended| (ended - self.started_at).num_milliseconds())
    }
}

/// Rejected tracker transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("operation not found: {0}")]
    NotFound(OperationId),
    #[error("operation `{id}` is {state}, not loading")]
    NotActive {
        id: OperationId,
        state: OperationState,
    },
    #[error("operation handle for `{0}` was superseded by a newer start")]
    Superseded(OperationId),
}
