//! Registry of named in-flight operations.
//!
//! # Responsibility
//! - Track progress, timeout and cancellation for any number of concurrently
//!   named operations, independent of what the work actually does.
//!
//! # Invariants
//! - Progress updates are accepted only while an operation is `loading`.
//! - Terminal states are sticky; only `remove` clears them.
//! - A timeout fires `on_timeout` at most once, and only if the operation is
//!   still `loading` when the timer elapses.
//! - Restarting an id supersedes older handles for that id; their calls
//!   return `OperationError::Superseded`.

use super::state::{
    OperationError, OperationId, OperationKind, OperationSnapshot, OperationState,
};
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle callback invoked outside the registry lock.
pub type OperationCallback = Arc<dyn Fn(&OperationSnapshot) + Send + Sync>;

/// Options accepted by [`OperationTracker::start`].
#[derive(Clone, Default)]
pub struct StartOptions {
    pub kind: OperationKind,
    /// `None` or zero disables the timeout.
    pub timeout: Option<Duration>,
    pub initial_message: Option<String>,
    /// Whether `cancel` fires the operation's cancellation token.
    pub cancellable: bool,
    pub on_success: Option<OperationCallback>,
    pub on_error: Option<OperationCallback>,
    pub on_timeout: Option<OperationCallback>,
}

impl StartOptions {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.initial_message = Some(message.into());
        self
    }

    pub fn cancellable(mut self) -> Self {
        self.cancellable = true;
        self
    }

    pub fn on_success(mut self, callback: impl Fn(&OperationSnapshot) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&OperationSnapshot) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_timeout(mut self, callback: impl Fn(&OperationSnapshot) + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Arc::new(callback));
        self
    }
}

struct Callbacks {
    on_success: Option<OperationCallback>,
    on_error: Option<OperationCallback>,
    on_timeout: Option<OperationCallback>,
}

struct Entry {
    snapshot: OperationSnapshot,
    epoch: u64,
    token: CancellationToken,
    timer: Option<JoinHandle<()>>,
    callbacks: Callbacks,
}

impl Entry {
    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct Registry {
    entries: HashMap<OperationId, Entry>,
    next_epoch: u64,
}

enum Outcome {
    Success(Option<Value>),
    Failure(String),
    Cancelled,
    TimedOut,
}

impl Outcome {
    fn state(&self) -> OperationState {
        match self {
            Self::Success(_) => OperationState::Success,
            Self::Failure(_) => OperationState::Error,
            Self::Cancelled => OperationState::Cancelled,
            Self::TimedOut => OperationState::Timeout,
        }
    }
}

/// Shared operation registry. Cloning yields another handle to the same
/// registry.
#[derive(Clone, Default)]
pub struct OperationTracker {
    inner: Arc<Mutex<Registry>>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` in `loading` state and returns a handle bound to it.
    ///
    /// Restarting an existing id replaces the previous entry and stops its
    /// timer. Timeouts need a running Tokio runtime; without one the
    /// operation is tracked without a timer.
    pub fn start(&self, id: impl Into<OperationId>, options: StartOptions) -> OperationHandle {
        let id = id.into();
        let token = CancellationToken::new();
        let timeout = options.timeout.filter(|timeout| !timeout.is_zero());

        let mut registry = self.inner.lock();
        let epoch = registry.next_epoch;
        registry.next_epoch += 1;

        if let Some(mut previous) = registry.entries.remove(&id) {
            previous.stop_timer();
            debug!(
                "event=op_replace module=ops status=ok op_id={id} previous_state={}",
                previous.snapshot.state
            );
        }

        let timer = timeout.and_then(|timeout| self.spawn_timer(&id, epoch, timeout));
        registry.entries.insert(
            id.clone(),
            Entry {
                snapshot: OperationSnapshot {
                    id: id.clone(),
                    kind: options.kind,
                    state: OperationState::Loading,
                    progress: 0.0,
                    message: options.initial_message,
                    cancellable: options.cancellable,
                    started_at: Utc::now(),
                    ended_at: None,
                    timeout_ms: timeout.map(|timeout| timeout.as_millis() as u64),
                    error: None,
                    result: None,
                },
                epoch,
                token: token.clone(),
                timer,
                callbacks: Callbacks {
                    on_success: options.on_success,
                    on_error: options.on_error,
                    on_timeout: options.on_timeout,
                },
            },
        );
        drop(registry);

        info!(
            "event=op_start module=ops status=start op_id={id} kind={} timeout_ms={}",
            options.kind.as_str(),
            timeout.map_or(0, |timeout| timeout.as_millis())
        );

        OperationHandle {
            tracker: self.clone(),
            id,
            epoch,
            token,
        }
    }

    /// Sets progress (clamped to `[0, 100]`) and optionally the status message.
    ///
    /// Has no effect unless the operation is `loading`.
    pub fn update_progress(
        &self,
        id: &str,
        pct: f64,
        message: Option<&str>,
    ) -> Result<(), OperationError> {
        self.update_progress_at(id, None, pct, message)
    }

    /// Marks the operation `success` with progress 100.
    pub fn complete(
        &self,
        id: &str,
        result: Option<Value>,
    ) -> Result<OperationSnapshot, OperationError> {
        self.finish(id, None, Outcome::Success(result))
    }

    /// Marks the operation `error` and records the detail.
    pub fn fail(
        &self,
        id: &str,
        error: impl Into<String>,
    ) -> Result<OperationSnapshot, OperationError> {
        self.finish(id, None, Outcome::Failure(error.into()))
    }

    /// Marks the operation `cancelled`, firing its token when cancellable.
    pub fn cancel(&self, id: &str) -> Result<OperationSnapshot, OperationError> {
        self.finish(id, None, Outcome::Cancelled)
    }

    /// Deletes the operation from the registry, stopping any timer.
    pub fn remove(&self, id: &str) -> Option<OperationSnapshot> {
        let mut entry = self.inner.lock().entries.remove(id)?;
        entry.stop_timer();
        Some(entry.snapshot)
    }

    /// Removes every operation in a terminal state, returning how many.
    pub fn clear_finished(&self) -> usize {
        let mut registry = self.inner.lock();
        let before = registry.entries.len();
        registry
            .entries
            .retain(|_, entry| !entry.snapshot.state.is_terminal());
        before - registry.entries.len()
    }

    pub fn snapshot(&self, id: &str) -> Option<OperationSnapshot> {
        self.inner
            .lock()
            .entries
            .get(id)
            .map(|entry| entry.snapshot.clone())
    }

    /// Current state, `Idle` for unknown ids.
    pub fn state_of(&self, id: &str) -> OperationState {
        self.inner
            .lock()
            .entries
            .get(id)
            .map_or(OperationState::Idle, |entry| entry.snapshot.state)
    }

    pub fn is_loading(&self, id: &str) -> bool {
        self.state_of(id) == OperationState::Loading
    }

    pub fn is_any_loading(&self) -> bool {
        self.inner
            .lock()
            .entries
            .values()
            .any(|entry| entry.snapshot.is_loading())
    }

    /// True when any operation ended in `error` or `timeout`.
    pub fn has_any_errors(&self) -> bool {
        self.inner
            .lock()
            .entries
            .values()
            .any(|entry| entry.snapshot.state.is_failure())
    }

    /// Loading operations in start order.
    pub fn active_operations(&self) -> Vec<OperationSnapshot> {
        let registry = self.inner.lock();
        let mut active: Vec<&Entry> = registry
            .entries
            .values()
            .filter(|entry| entry.snapshot.is_loading())
            .collect();
        active.sort_by_key(|entry| entry.epoch);
        active.into_iter().map(|entry| entry.snapshot.clone()).collect()
    }

    /// Mean progress over loading operations, 0 when none are loading.
    pub fn average_progress(&self) -> f64 {
        let registry = self.inner.lock();
        let (sum, count) = registry
            .entries
            .values()
            .filter(|entry| entry.snapshot.is_loading())
            .fold((0.0, 0usize), |(sum, count), entry| {
                (sum + entry.snapshot.progress, count + 1)
            });
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    fn spawn_timer(&self, id: &str, epoch: u64, timeout: Duration) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(
                    "event=op_timer module=ops status=error op_id={id} error_code=no_runtime"
                );
                return None;
            }
        };
        let registry: Weak<Mutex<Registry>> = Arc::downgrade(&self.inner);
        let id = id.to_string();
        Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = registry.upgrade() {
                let tracker = OperationTracker { inner };
                // A finished or superseded operation makes this a no-op.
                let _ = tracker.finish(&id, Some(epoch), Outcome::TimedOut);
            }
        }))
    }

    fn update_progress_at(
        &self,
        id: &str,
        epoch: Option<u64>,
        pct: f64,
        message: Option<&str>,
    ) -> Result<(), OperationError> {
        let mut registry = self.inner.lock();
        let entry = lookup(&mut registry, id, epoch)?;
        if !entry.snapshot.is_loading() {
            debug!(
                "event=op_progress module=ops status=ignored op_id={id} state={}",
                entry.snapshot.state
            );
            return Err(OperationError::NotActive {
                id: id.to_string(),
                state: entry.snapshot.state,
            });
        }
        entry.snapshot.progress = clamp_progress(pct);
        if let Some(message) = message {
            entry.snapshot.message = Some(message.to_string());
        }
        Ok(())
    }

    fn finish(
        &self,
        id: &str,
        epoch: Option<u64>,
        outcome: Outcome,
    ) -> Result<OperationSnapshot, OperationError> {
        let (snapshot, callback) = {
            let mut registry = self.inner.lock();
            let entry = lookup(&mut registry, id, epoch)?;
            if !entry.snapshot.is_loading() {
                return Err(OperationError::NotActive {
                    id: id.to_string(),
                    state: entry.snapshot.state,
                });
            }

            entry.stop_timer();
            let snapshot = &mut entry.snapshot;
            snapshot.state = outcome.state();
            snapshot.ended_at = Some(Utc::now());
            let callback = match outcome {
                Outcome::Success(result) => {
                    snapshot.progress = 100.0;
                    snapshot.result = result;
                    entry.callbacks.on_success.clone()
                }
                Outcome::Failure(error) => {
                    snapshot.error = Some(error);
                    entry.callbacks.on_error.clone()
                }
                Outcome::Cancelled => {
                    if snapshot.cancellable {
                        entry.token.cancel();
                    }
                    None
                }
                Outcome::TimedOut => {
                    snapshot.error = Some(format!(
                        "operation timed out after {}ms",
                        snapshot.timeout_ms.unwrap_or_default()
                    ));
                    entry.token.cancel();
                    entry.callbacks.on_timeout.clone()
                }
            };
            (entry.snapshot.clone(), callback)
        };

        info!(
            "event=op_finish module=ops status={} op_id={id} kind={} duration_ms={}",
            snapshot.state,
            snapshot.kind.as_str(),
            snapshot.duration_ms().unwrap_or_default()
        );
        if let Some(callback) = callback {
            callback(&snapshot);
        }
        Ok(snapshot)
    }
}

fn lookup<'a>(
    registry: &'a mut Registry,
    id: &str,
    epoch: Option<u64>,
) -> Result<&'a mut Entry, OperationError> {
    let entry = registry
        .entries
        .get_mut(id)
        .ok_or_else(|| OperationError::NotFound(id.to_string()))?;
    match epoch {
        Some(epoch) if epoch != entry.epoch => Err(OperationError::Superseded(id.to_string())),
        _ => Ok(entry),
    }
}

fn clamp_progress(pct: f64) -> f64 {
    if pct.is_nan() {
        0.0
    } else {
        pct.clamp(0.0, 100.0)
    }
}

/// Handle bound to one started operation.
///
/// Calls made after the id was restarted return
/// `OperationError::Superseded` and leave the newer operation untouched.
#[derive(Clone)]
pub struct OperationHandle {
    tracker: OperationTracker,
    id: OperationId,
    epoch: u64,
    token: CancellationToken,
}

impl OperationHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn update_progress(&self, pct: f64, message: Option<&str>) -> Result<(), OperationError> {
        self.tracker
            .update_progress_at(&self.id, Some(self.epoch), pct, message)
    }

    pub fn complete(&self, result: Option<Value>) -> Result<OperationSnapshot, OperationError> {
        self.tracker
            .finish(&self.id, Some(self.epoch), Outcome::Success(result))
    }

    pub fn fail(&self, error: impl Into<String>) -> Result<OperationSnapshot, OperationError> {
        self.tracker
            .finish(&self.id, Some(self.epoch), Outcome::Failure(error.into()))
    }

    pub fn cancel(&self) -> Result<OperationSnapshot, OperationError> {
        self.tracker
            .finish(&self.id, Some(self.epoch), Outcome::Cancelled)
    }

    pub fn snapshot(&self) -> Option<OperationSnapshot> {
        self.tracker
            .snapshot(&self.id)
            .filter(|_| self.is_current())
    }

    /// Token fired on cancel (when cancellable) or timeout; pass it to the
    /// work so it can abort early.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn is_current(&self) -> bool {
        self.tracker
            .inner
            .lock()
            .entries
            .get(&self.id)
            .is_some_and(|entry| entry.epoch == self.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::{clamp_progress, OperationTracker, StartOptions};
    use crate::ops::state::{OperationError, OperationKind, OperationState};

    #[test]
    fn clamp_progress_bounds_and_nan() {
        assert_eq!(clamp_progress(-5.0), 0.0);
        assert_eq!(clamp_progress(42.5), 42.5);
        assert_eq!(clamp_progress(250.0), 100.0);
        assert_eq!(clamp_progress(f64::NAN), 0.0);
    }

    #[test]
    fn unknown_ids_are_idle_and_not_found() {
        let tracker = OperationTracker::new();
        assert_eq!(tracker.state_of("nope"), OperationState::Idle);
        assert_eq!(
            tracker.complete("nope", None),
            Err(OperationError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn start_without_runtime_tracks_without_timer() {
        let tracker = OperationTracker::new();
        let handle = tracker.start(
            "upload",
            StartOptions::new(OperationKind::Upload).timeout(std::time::Duration::from_millis(5)),
        );
        assert!(tracker.is_loading("upload"));
        handle.complete(None).unwrap();
        assert_eq!(tracker.state_of("upload"), OperationState::Success);
    }
}
