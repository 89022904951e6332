//! Bounded FIFO dispatch to the inference backend.
//!
//! A fixed pool of workers pulls requests from one queue; each worker runs
//! one backend call at a time, so the pool size is the concurrency cap.
//! Admission is refused once in-flight plus queued requests reach
//! `workers + queue_depth`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::correlation::{CancelSignal, CorrelationStats, CorrelationTable, PendingHandle};
use super::lock;
use crate::config::DispatchConfig;
use crate::llm::BackendClient;
use crate::models::{ChatRequest, ChatResult, FailureKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectedError {
    #[error("Dispatch queue is full ({capacity} requests in flight or waiting), retry later")]
    QueueFull { capacity: usize },
    #[error("Dispatcher is shutting down")]
    ShuttingDown,
    #[error("Request {0} was already submitted")]
    Duplicate(String),
}

impl RejectedError {
    pub fn code(&self) -> &'static str {
        match self {
            RejectedError::QueueFull { .. } => "queue_full",
            RejectedError::ShuttingDown => "shutting_down",
            RejectedError::Duplicate(_) => "duplicate_request",
        }
    }
}

/// Snapshot of the dispatcher's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub workers: usize,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub queued: usize,
}

/// A request waiting for a free worker.
struct QueuedRequest {
    request: ChatRequest,
    cancel: CancelSignal,
    enqueued_at: Instant,
}

/// A request a worker is executing.
pub struct InFlightCall {
    pub request: ChatRequest,
    pub started_at: Instant,
    pub cancel: CancelSignal,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueuedRequest>,
    in_flight: usize,
    closed: bool,
}

impl QueueState {
    /// Drop queued requests whose callers went away, so they stop holding
    /// admission capacity. Returns how many were removed.
    fn purge_cancelled(&mut self) -> usize {
        let before = self.queue.len();
        self.queue.retain(|queued| !queued.cancel.is_cancelled());
        before - self.queue.len()
    }
}

enum Next {
    Call(InFlightCall),
    Idle,
    Closed,
}

struct Shared {
    client: BackendClient,
    correlation: Arc<CorrelationTable>,
    state: Mutex<QueueState>,
    /// Wakes idle workers when a request is queued or on shutdown.
    notify: Notify,
    workers: usize,
    queue_depth: usize,
}

impl Shared {
    fn capacity(&self) -> usize {
        self.workers + self.queue_depth
    }

    /// Pop the next live request and count it in flight.
    fn next_call(&self) -> Next {
        let mut state = lock(&self.state);
        while let Some(queued) = state.queue.pop_front() {
            if queued.cancel.is_cancelled() {
                tracing::debug!(
                    request_id = %queued.request.id(),
                    "Skipping request cancelled while queued"
                );
                continue;
            }

            state.in_flight += 1;
            tracing::debug!(
                request_id = %queued.request.id(),
                queue_wait_ms = %queued.enqueued_at.elapsed().as_millis(),
                in_flight = state.in_flight,
                "Dispatching request"
            );
            return Next::Call(InFlightCall {
                request: queued.request,
                started_at: Instant::now(),
                cancel: queued.cancel,
            });
        }

        if state.closed {
            Next::Closed
        } else {
            Next::Idle
        }
    }

    async fn execute(&self, call: InFlightCall, worker: usize) {
        let InFlightCall {
            request,
            started_at,
            mut cancel,
        } = call;

        let result = self
            .client
            .invoke_until(request.content(), self.client.timeout(), cancel.cancelled())
            .await;
        let latency_ms = started_at.elapsed().as_millis();

        lock(&self.state).in_flight -= 1;

        match &result {
            ChatResult::Success(text) => tracing::info!(
                request_id = %request.id(),
                worker,
                latency_ms = %latency_ms,
                response_chars = text.chars().count(),
                "Chat request completed"
            ),
            ChatResult::Failure {
                kind: FailureKind::Cancelled,
                ..
            } => {
                tracing::info!(
                    request_id = %request.id(),
                    worker,
                    latency_ms = %latency_ms,
                    "Abandoned backend call for cancelled request"
                );
                // The slot was already closed by the cancellation.
                return;
            }
            ChatResult::Failure { kind, message } => tracing::warn!(
                request_id = %request.id(),
                worker,
                latency_ms = %latency_ms,
                kind = %kind,
                "Chat request failed: {}",
                message
            ),
        }

        if !self.correlation.resolve(request.id(), result) {
            tracing::debug!(
                request_id = %request.id(),
                state = ?self.correlation.state(request.id()),
                "Caller left before the result arrived"
            );
        }
    }

    /// Refuse new work and fail everything still queued.
    fn close(&self) {
        let drained: Vec<QueuedRequest> = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.queue.drain(..).collect()
        };

        for queued in drained {
            self.correlation.resolve(
                queued.request.id(),
                ChatResult::failure(
                    FailureKind::Shutdown,
                    "Dispatcher shut down before the request was dispatched",
                ),
            );
        }
        self.notify.notify_waiters();
    }
}

async fn worker_loop(shared: Arc<Shared>, worker: usize) {
    tracing::debug!(worker, "Dispatch worker started");
    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        // Register before checking the queue so a concurrent submit cannot be missed
        notified.as_mut().enable();

        match shared.next_call() {
            Next::Call(call) => shared.execute(call, worker).await,
            Next::Idle => notified.await,
            Next::Closed => break,
        }
    }
    tracing::debug!(worker, "Dispatch worker stopped");
}

/// Admits validated requests and runs them on a bounded worker pool.
pub struct Dispatcher {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the worker pool. Must be called from within a Tokio runtime.
    pub fn start(client: BackendClient, config: &DispatchConfig) -> Self {
        let workers = config.workers.max(1);
        let shared = Arc::new(Shared {
            client,
            correlation: Arc::new(CorrelationTable::new()),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            workers,
            queue_depth: config.queue_depth,
        });

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| tokio::spawn(worker_loop(shared.clone(), worker)))
            .collect();

        tracing::info!(
            workers,
            queue_depth = config.queue_depth,
            backend = shared.client.backend_name(),
            timeout_secs = shared.client.timeout().as_secs(),
            "Dispatcher started"
        );

        Self {
            shared,
            workers: Mutex::new(handles),
        }
    }

    /// Queue `request` for execution.
    ///
    /// Fails immediately, without side effects, when the dispatcher is at
    /// capacity or shutting down.
    pub fn submit(&self, request: ChatRequest) -> Result<PendingHandle, RejectedError> {
        let mut state = lock(&self.shared.state);
        if state.closed {
            return Err(RejectedError::ShuttingDown);
        }

        let purged = state.purge_cancelled();
        if purged > 0 {
            tracing::debug!(purged, "Released queue slots of cancelled requests");
        }

        let occupied = state.in_flight + state.queue.len();
        if occupied >= self.shared.capacity() {
            tracing::warn!(
                request_id = %request.id(),
                in_flight = state.in_flight,
                queued = state.queue.len(),
                "Rejecting request, dispatch queue is full"
            );
            return Err(RejectedError::QueueFull {
                capacity: self.shared.capacity(),
            });
        }

        let (handle, cancel) = self
            .shared
            .correlation
            .register(request.id())
            .map_err(|e| RejectedError::Duplicate(e.0))?;

        tracing::debug!(
            request_id = %request.id(),
            position = state.queue.len(),
            "Request queued"
        );
        state.queue.push_back(QueuedRequest {
            request,
            cancel,
            enqueued_at: Instant::now(),
        });
        drop(state);

        self.shared.notify.notify_one();
        Ok(handle)
    }

    /// Cancel a pending request by id. Returns `false` if it already resolved.
    pub fn cancel(&self, request_id: &str) -> bool {
        let cancelled = self.shared.correlation.cancel(request_id);
        if cancelled {
            lock(&self.shared.state).purge_cancelled();
        }
        cancelled
    }

    /// Occupancy counting live requests only.
    pub fn stats(&self) -> DispatchStats {
        let mut state = lock(&self.shared.state);
        state.purge_cancelled();
        DispatchStats {
            workers: self.shared.workers,
            queue_depth: self.shared.queue_depth,
            in_flight: state.in_flight,
            queued: state.queue.len(),
        }
    }

    pub fn correlation_stats(&self) -> CorrelationStats {
        self.shared.correlation.stats()
    }

    /// Stop admitting requests, fail the queued ones and wait for in-flight
    /// calls to finish.
    pub async fn shutdown(&self) {
        self.shared.close();

        let handles = std::mem::take(&mut *lock(&self.workers));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Dispatch worker ended abnormally: {}", e);
            }
        }
        tracing::info!("Dispatcher stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.close();
    }
}
