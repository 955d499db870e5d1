//! Batch assembly over the staging queue
//!
//! This module packages the queue for its intended concurrency model:
//! many producer threads enqueue requests, one batcher thread assembles
//! and commits batches.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Producer Threads                       │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │ SharedQueue::enqueue
//!                    ┌────────▼────────┐
//!                    │   SharedQueue   │ ← Mutex + Condvar
//!                    │ (PriorityQueue) │
//!                    └────────┬────────┘
//!                             │ next_batch()
//!                    ┌────────▼────────┐
//!                    │     Batcher     │ ← cursor walk, shape
//!                    │                 │   screening, commit
//!                    └────────┬────────┘
//!                             │ Vec<Payload>
//!                    ┌────────▼────────┐
//!                    │     Runner      │
//!                    └─────────────────┘
//! ```
//!
//! # Assembly protocol
//!
//! Each `next_batch` call resets the cursor and walks forward: sweep the
//! timeout policy, screen the candidate against the pending batch's shape
//! map, advance to include. Assembly ends at the first incompatible
//! candidate, at `max_batch_size`, or at the end of the queue; the batch
//! is then committed by dequeuing exactly the pending count. An aborted
//! walk costs nothing — the queue is untouched until commit.

mod config;
mod metrics;

pub use config::BatcherConfig;
pub use metrics::{BatcherMetrics, MetricsSnapshot};

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::QueueError;
use crate::queue::{Payload, PriorityQueue};
use crate::shape::{self, PendingBatchShapes};

/// Shape-tensor peek callback used during batch assembly
pub type PeekFn =
    Box<dyn Fn(i64, &Payload, &str) -> Result<(Vec<i64>, Vec<i64>), QueueError> + Send>;

struct SharedState {
    queue: PriorityQueue,
    shutdown: bool,
}

/// Multi-producer handle around the priority queue. Producers enqueue from
/// any thread; the single batcher thread owns cursor operations, dequeues,
/// and rejected-payload draining.
pub struct SharedQueue {
    state: Mutex<SharedState>,
    nonempty: Condvar,
    metrics: Arc<BatcherMetrics>,
}

impl SharedQueue {
    pub fn new(queue: PriorityQueue) -> Self {
        Self::with_metrics(queue, Arc::new(BatcherMetrics::new()))
    }

    pub fn with_metrics(queue: PriorityQueue, metrics: Arc<BatcherMetrics>) -> Self {
        Self {
            state: Mutex::new(SharedState { queue, shutdown: false }),
            nonempty: Condvar::new(),
            metrics,
        }
    }

    /// Enqueue from a producer thread, waking the batcher. A synchronous
    /// rejection (full level, invalid priority) fires the payload's sink
    /// before returning the error.
    pub fn enqueue(&self, priority_level: u32, payload: Payload) -> Result<(), QueueError> {
        let mut state = self.lock_state();
        match state.queue.enqueue(priority_level, payload) {
            Ok(()) => {
                drop(state);
                self.metrics.record_enqueued();
                self.nonempty.notify_one();
                Ok(())
            }
            Err(rejected) => {
                drop(state);
                let error = rejected.error.clone();
                if matches!(error, QueueError::Full { .. }) {
                    self.metrics.record_rejected_full();
                }
                warn!(level = priority_level, %error, "enqueue rejected");
                rejected.payload.reject(error.clone());
                Err(error)
            }
        }
    }

    /// Stop the batcher. `next_batch` drains whatever is queued as final
    /// batches and then returns `None`.
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        state.shutdown = true;
        drop(state);
        self.nonempty.notify_all();
    }

    /// Queued payloads across all levels
    pub fn len(&self) -> usize {
        self.lock_state().queue.size()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().queue.is_empty()
    }

    pub fn metrics(&self) -> &Arc<BatcherMetrics> {
        &self.metrics
    }

    fn lock_state(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().expect("queue lock poisoned")
    }
}

enum Assembled {
    /// A pending batch of this many payloads is ready to commit
    Batch(usize),
    /// Everything from the queue front expired; nothing to commit
    Nothing,
    /// The head payload's shape tensors could not be read; it has been
    /// pulled from the queue for rejection
    ShapeFailed(Payload, QueueError),
}

/// Assembles batches from a [`SharedQueue`] using the non-destructive
/// cursor. Exactly one batcher drives a queue.
pub struct Batcher {
    shared: Arc<SharedQueue>,
    config: BatcherConfig,
    peek: PeekFn,
    pending_shapes: PendingBatchShapes,
}

impl Batcher {
    /// Create a batcher reading shapes straight off each request
    pub fn new(shared: Arc<SharedQueue>, config: BatcherConfig) -> Self {
        Self {
            shared,
            config,
            peek: Box::new(shape::standard_shape_peek),
            pending_shapes: PendingBatchShapes::new(),
        }
    }

    /// Replace the shape-tensor peek function
    pub fn with_peek(
        mut self,
        peek: impl Fn(i64, &Payload, &str) -> Result<(Vec<i64>, Vec<i64>), QueueError>
            + Send
            + 'static,
    ) -> Self {
        self.peek = Box::new(peek);
        self
    }

    /// Block until a batch can be committed, then dequeue and return it.
    /// Returns `None` once the queue is shut down and drained. Expired
    /// payloads encountered along the way are rejected through their sinks
    /// with `DeadlineExceeded`.
    pub fn next_batch(&mut self) -> Option<Vec<Payload>> {
        let mut wait_deadline: Option<Instant> = None;
        loop {
            let mut state = self.shared.lock_state();
            loop {
                if state.shutdown && state.queue.is_empty() {
                    return None;
                }
                if !state.queue.is_empty() {
                    break;
                }
                state = self.shared.nonempty.wait(state).expect("queue lock poisoned");
            }

            let assembled = Self::assemble(
                &self.config,
                &self.peek,
                &mut self.pending_shapes,
                &mut state.queue,
            );
            let rejected = state.queue.release_rejected_payloads();

            match assembled {
                Assembled::ShapeFailed(payload, error) => {
                    drop(state);
                    self.reject_timed_out(rejected);
                    self.shared.metrics.record_rejected_shape();
                    warn!(
                        id = payload.request().id(),
                        %error,
                        "rejecting payload with unreadable shape tensors"
                    );
                    payload.reject(error);
                }
                Assembled::Nothing => {
                    drop(state);
                    self.reject_timed_out(rejected);
                }
                Assembled::Batch(count) => {
                    let undersized = count < self.config.min_batch_size && !state.shutdown;
                    if undersized && !self.config.batch_wait.is_zero() {
                        let deadline = *wait_deadline
                            .get_or_insert_with(|| Instant::now() + self.config.batch_wait);
                        let now = Instant::now();
                        if now < deadline {
                            // Park until another enqueue arrives or the
                            // coalescing budget runs out, then reassemble
                            let (state, _timed_out) = self
                                .shared
                                .nonempty
                                .wait_timeout(state, deadline - now)
                                .expect("queue lock poisoned");
                            drop(state);
                            self.reject_timed_out(rejected);
                            continue;
                        }
                    }
                    let batch = Self::commit(&mut state.queue, count);
                    drop(state);
                    self.reject_timed_out(rejected);
                    self.shared.metrics.record_batch(batch.len());
                    debug!(batch_size = batch.len(), "batch committed");
                    return Some(batch);
                }
            }
        }
    }

    /// Non-blocking variant of [`Batcher::next_batch`]: assembles and
    /// commits whatever is dispatchable right now, without waiting for
    /// `min_batch_size`.
    pub fn try_next_batch(&mut self) -> Option<Vec<Payload>> {
        loop {
            let mut state = self.shared.lock_state();
            if state.queue.is_empty() {
                return None;
            }
            let assembled = Self::assemble(
                &self.config,
                &self.peek,
                &mut self.pending_shapes,
                &mut state.queue,
            );
            let rejected = state.queue.release_rejected_payloads();
            match assembled {
                Assembled::ShapeFailed(payload, error) => {
                    drop(state);
                    self.reject_timed_out(rejected);
                    self.shared.metrics.record_rejected_shape();
                    payload.reject(error);
                }
                Assembled::Nothing => {
                    drop(state);
                    self.reject_timed_out(rejected);
                }
                Assembled::Batch(count) => {
                    let batch = Self::commit(&mut state.queue, count);
                    drop(state);
                    self.reject_timed_out(rejected);
                    self.shared.metrics.record_batch(batch.len());
                    return Some(batch);
                }
            }
        }
    }

    /// Walk the cursor per the assembly protocol: sweep the timeout policy,
    /// seed the shape map from the first payload, then include candidates
    /// until one is incompatible, the batch is full, or the queue ends.
    fn assemble(
        config: &BatcherConfig,
        peek: &PeekFn,
        pending_shapes: &mut PendingBatchShapes,
        queue: &mut PriorityQueue,
    ) -> Assembled {
        queue.reset_cursor();
        queue.apply_policy_at_cursor();
        if queue.cursor_end() {
            return Assembled::Nothing;
        }

        if let Err(error) = shape::init_pending_shape(
            config.runner_id,
            queue.payload_at_cursor(),
            &config.enforce_equal_shape_tensors,
            peek,
            pending_shapes,
        ) {
            // The head cannot even be inspected; pull it for rejection
            return match queue.dequeue() {
                Ok(payload) => Assembled::ShapeFailed(payload, error),
                Err(_) => Assembled::Nothing,
            };
        }
        queue.advance_cursor();

        loop {
            queue.apply_policy_at_cursor();
            if queue.cursor_end() {
                break;
            }
            if config.max_batch_size > 0 && queue.pending_batch_count() >= config.max_batch_size {
                queue.mark_cursor();
                break;
            }
            match shape::compare_with_pending_shape(
                config.runner_id,
                queue.payload_at_cursor(),
                peek,
                pending_shapes,
            ) {
                Ok(true) => queue.advance_cursor(),
                Ok(false) => {
                    queue.mark_cursor();
                    break;
                }
                Err(error) => {
                    // Leave the candidate queued; it is rejected once it
                    // reaches the head of a later assembly
                    debug!(%error, "shape peek failed, ending batch assembly");
                    queue.mark_cursor();
                    break;
                }
            }
        }
        Assembled::Batch(queue.pending_batch_count())
    }

    /// Dequeue exactly `count` payloads in cursor order
    fn commit(queue: &mut PriorityQueue, count: usize) -> Vec<Payload> {
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            match queue.dequeue() {
                Ok(payload) => batch.push(payload),
                Err(error) => {
                    warn!(%error, committed = batch.len(), expected = count, "queue drained mid-commit");
                    break;
                }
            }
        }
        batch
    }

    /// Fire the sinks of payloads rejected by the timeout sweep
    fn reject_timed_out(&self, rejected: Vec<VecDeque<Payload>>) {
        for payload in rejected.into_iter().flatten() {
            self.shared.metrics.record_timed_out();
            debug!(id = payload.request().id(), "request timed out in queue");
            payload.reject(QueueError::DeadlineExceeded);
        }
    }
}
