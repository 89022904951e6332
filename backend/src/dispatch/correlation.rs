//! Correlation of asynchronous completions with their callers.
//!
//! Each admitted request owns one completion slot. The slot resolves exactly
//! once: the first `resolve` or `cancel` wins and removes it, anything that
//! arrives afterwards is counted as discarded.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{oneshot, watch};

use super::lock;
use crate::models::{ChatResult, FailureKind};

/// How many terminal outcomes stay queryable through [`CorrelationTable::state`].
const RECENT_OUTCOMES: usize = 256;

/// Lifecycle of a completion slot. Every state but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

impl SlotState {
    fn of(result: &ChatResult) -> Self {
        match result {
            ChatResult::Success(_) => SlotState::Succeeded,
            ChatResult::Failure {
                kind: FailureKind::Cancelled,
                ..
            } => SlotState::Cancelled,
            ChatResult::Failure { .. } => SlotState::Failed,
        }
    }
}

/// Counters over the lifetime of the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationStats {
    pub pending: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Resolutions that found no pending slot (late or duplicate).
    pub discarded: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("Request {0} is already pending")]
pub struct DuplicateRequest(pub String);

struct Slot {
    tx: oneshot::Sender<ChatResult>,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct TableInner {
    slots: HashMap<String, Slot>,
    /// Terminal states of the most recently closed slots, oldest first.
    recent: VecDeque<(String, SlotState)>,
    stats: CorrelationStats,
}

impl TableInner {
    fn close(&mut self, id: &str, state: SlotState) -> Option<Slot> {
        let slot = self.slots.remove(id)?;
        match state {
            SlotState::Succeeded => self.stats.succeeded += 1,
            SlotState::Cancelled => self.stats.cancelled += 1,
            SlotState::Failed => self.stats.failed += 1,
            SlotState::Pending => {}
        }
        self.stats.pending = self.slots.len();

        if self.recent.len() == RECENT_OUTCOMES {
            self.recent.pop_front();
        }
        self.recent.push_back((id.to_string(), state));
        Some(slot)
    }
}

/// Map from request id to its single-resolution completion slot.
#[derive(Default)]
pub struct CorrelationTable {
    inner: Mutex<TableInner>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a slot for `id`.
    ///
    /// Returns the caller's handle and the signal the executing call watches
    /// for cancellation.
    pub fn register(
        self: &Arc<Self>,
        id: &str,
    ) -> Result<(PendingHandle, CancelSignal), DuplicateRequest> {
        let mut inner = lock(&self.inner);
        if inner.slots.contains_key(id) {
            return Err(DuplicateRequest(id.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        inner.slots.insert(
            id.to_string(),
            Slot {
                tx,
                cancel: cancel_tx,
            },
        );
        inner.stats.pending = inner.slots.len();

        let handle = PendingHandle {
            id: id.to_string(),
            rx,
            table: Arc::clone(self),
            finished: false,
        };
        Ok((handle, CancelSignal(cancel_rx)))
    }

    /// Deliver `result` to the caller waiting on `id`.
    ///
    /// Returns `false` when the slot is already terminal or unknown; the
    /// result is dropped in that case.
    pub fn resolve(&self, id: &str, result: ChatResult) -> bool {
        let mut inner = lock(&self.inner);
        let Some(slot) = inner.close(id, SlotState::of(&result)) else {
            inner.stats.discarded += 1;
            tracing::debug!(request_id = %id, "Discarding result for request that is no longer pending");
            return false;
        };

        // The receiver only goes away after its handle cancelled the slot,
        // which removes it first, so this send cannot lose a live caller.
        let _ = slot.tx.send(result);
        true
    }

    /// Cancel the pending request `id` and signal its executing call.
    ///
    /// Returns `false` when the request already reached a terminal state.
    pub fn cancel(&self, id: &str) -> bool {
        let mut inner = lock(&self.inner);
        let Some(slot) = inner.close(id, SlotState::Cancelled) else {
            return false;
        };

        let _ = slot.cancel.send(true);
        tracing::debug!(request_id = %id, "Request cancelled");
        true
    }

    /// Current state of `id`.
    ///
    /// Terminal states are remembered for the last few hundred closed slots;
    /// older or unknown ids return `None`.
    pub fn state(&self, id: &str) -> Option<SlotState> {
        let inner = lock(&self.inner);
        if inner.slots.contains_key(id) {
            return Some(SlotState::Pending);
        }
        inner
            .recent
            .iter()
            .rev()
            .find(|(recent_id, _)| recent_id == id)
            .map(|(_, state)| *state)
    }

    pub fn stats(&self) -> CorrelationStats {
        lock(&self.inner).stats
    }
}

/// The caller's side of a completion slot.
///
/// Dropping the handle before it resolved cancels the request.
pub struct PendingHandle {
    id: String,
    rx: oneshot::Receiver<ChatResult>,
    table: Arc<CorrelationTable>,
    finished: bool,
}

impl PendingHandle {
    /// Wait for the request's result.
    pub async fn wait(mut self) -> ChatResult {
        let result = match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => ChatResult::failure(FailureKind::Cancelled, "Request was cancelled"),
        };
        self.finished = true;
        result
    }

    /// Give up on the request. Returns `false` if it had already resolved.
    pub fn cancel(mut self) -> bool {
        self.finished = true;
        self.table.cancel(&self.id)
    }
}

impl fmt::Debug for PendingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingHandle").field("id", &self.id).finish()
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        if !self.finished && self.table.cancel(&self.id) {
            tracing::debug!(request_id = %self.id, "Caller detached before completion");
        }
    }
}

/// Cancellation flag observed by the call executing a request.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes once the request is cancelled; never completes if it
    /// resolves normally.
    pub async fn cancelled(&mut self) {
        if self.0.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn table() -> Arc<CorrelationTable> {
        Arc::new(CorrelationTable::new())
    }

    #[tokio::test]
    async fn test_resolve_delivers_to_waiter() {
        let table = table();
        let (handle, _signal) = table.register("req-1").unwrap();
        assert_eq!(table.state("req-1"), Some(SlotState::Pending));

        assert!(table.resolve("req-1", ChatResult::Success("hi there".to_string())));
        assert_eq!(handle.wait().await, ChatResult::Success("hi there".to_string()));

        assert_eq!(table.state("req-1"), Some(SlotState::Succeeded));
        let stats = table.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let table = table();
        let (handle, _signal) = table.register("req-1").unwrap();

        assert!(table.resolve("req-1", ChatResult::Success("first".to_string())));
        assert!(!table.resolve("req-1", ChatResult::Success("second".to_string())));
        assert!(!table.resolve(
            "req-1",
            ChatResult::failure(FailureKind::BackendError, "third")
        ));

        assert_eq!(handle.wait().await, ChatResult::Success("first".to_string()));
        let stats = table.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.discarded, 2);
    }

    #[tokio::test]
    async fn test_failure_is_counted() {
        let table = table();
        let (handle, _signal) = table.register("req-1").unwrap();

        table.resolve("req-1", ChatResult::failure(FailureKind::Timeout, "slow"));
        assert_eq!(handle.wait().await.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(table.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_discarded() {
        let table = table();
        assert!(!table.resolve("nope", ChatResult::Success("x".to_string())));
        assert_eq!(table.stats().discarded, 1);
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let table = table();
        let (_handle, _signal) = table.register("req-1").unwrap();
        assert!(table.register("req-1").is_err());
        assert_eq!(table.stats().pending, 1);
    }

    #[tokio::test]
    async fn test_drop_handle_cancels_and_signals() {
        let table = table();
        let (handle, mut signal) = table.register("req-1").unwrap();
        assert!(!signal.is_cancelled());

        drop(handle);

        assert!(signal.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("cancel signal should fire");
        assert_eq!(table.state("req-1"), Some(SlotState::Cancelled));
        assert_eq!(table.stats().cancelled, 1);

        // A result landing after cancellation is dropped
        assert!(!table.resolve("req-1", ChatResult::Success("late".to_string())));
        assert_eq!(table.state("req-1"), Some(SlotState::Cancelled));
        assert_eq!(table.stats().discarded, 1);
        assert_eq!(table.stats().succeeded, 0);
    }

    #[tokio::test]
    async fn test_explicit_cancel_after_resolution_is_noop() {
        let table = table();
        let (handle, signal) = table.register("req-1").unwrap();

        table.resolve("req-1", ChatResult::Success("done".to_string()));
        assert!(!handle.cancel());
        assert!(!signal.is_cancelled());
        assert_eq!(table.stats().cancelled, 0);
    }

    #[tokio::test]
    async fn test_cancel_by_id_wakes_waiter() {
        let table = table();
        let (handle, _signal) = table.register("req-1").unwrap();

        assert!(table.cancel("req-1"));
        assert!(!table.cancel("req-1"));
        assert_eq!(handle.wait().await.failure_kind(), Some(FailureKind::Cancelled));
        assert_eq!(table.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn test_signal_stays_pending_after_success() {
        let table = table();
        let (handle, mut signal) = table.register("req-1").unwrap();

        table.resolve("req-1", ChatResult::Success("ok".to_string()));
        handle.wait().await;

        let fired = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn test_dropped_wait_future_cancels() {
        let table = table();
        let (handle, signal) = table.register("req-1").unwrap();

        // Caller gives up while waiting
        let waited = tokio::time::timeout(Duration::from_millis(20), handle.wait()).await;
        assert!(waited.is_err());

        assert!(signal.is_cancelled());
        assert_eq!(table.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_terminal_states_are_observable() {
        let table = table();
        let (ok, _s1) = table.register("ok").unwrap();
        let (failed, _s2) = table.register("failed").unwrap();
        let (cancelled, _s3) = table.register("cancelled").unwrap();

        table.resolve("ok", ChatResult::Success("hi".to_string()));
        table.resolve("failed", ChatResult::failure(FailureKind::Timeout, "slow"));
        assert!(cancelled.cancel());
        ok.wait().await;
        failed.wait().await;

        assert_eq!(table.state("ok"), Some(SlotState::Succeeded));
        assert_eq!(table.state("failed"), Some(SlotState::Failed));
        assert_eq!(table.state("cancelled"), Some(SlotState::Cancelled));
        assert_eq!(table.state("never-registered"), None);
    }

    #[tokio::test]
    async fn test_recent_outcomes_are_bounded() {
        let table = table();
        for i in 0..RECENT_OUTCOMES + 1 {
            let id = format!("req-{}", i);
            let (handle, _signal) = table.register(&id).unwrap();
            table.resolve(&id, ChatResult::Success("ok".to_string()));
            handle.wait().await;
        }

        assert_eq!(table.state("req-0"), None);
        assert_eq!(table.state("req-1"), Some(SlotState::Succeeded));
        assert_eq!(lock(&table.inner).recent.len(), RECENT_OUTCOMES);
        assert_eq!(table.stats().succeeded, RECENT_OUTCOMES as u64 + 1);
    }

    #[test]
    fn test_pending_handle_debug_shows_id() {
        let table = table();
        let (handle, _signal) = table.register("req-1").unwrap();
        assert_eq!(format!("{:?}", handle), "PendingHandle { id: \"req-1\" }");
    }
}
