//! Error types for the batchline core library
//!
//! This module provides structured error types using `thiserror` for
//! type-safe error handling across the library.
//!
//! Queue rejections travel two routes: synchronous failures (`Full`,
//! `InvalidPriority`, `Empty`) are returned to the caller, while
//! asynchronous failures (`DeadlineExceeded`, `Aborted`) reach the
//! request's response sink after the fact.

use thiserror::Error;

/// Errors surfaced by the queue and the batch assembler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Enqueue would exceed the level's `max_queue_size`
    #[error("queue is full (max: {max})")]
    Full { max: u32 },

    /// The request's queue deadline passed under the `Reject` action
    #[error("request deadline exceeded while queued")]
    DeadlineExceeded,

    /// Enqueue to a priority level outside the configured range
    #[error("invalid priority level {level} (configured levels: 1..={levels})")]
    InvalidPriority { level: u32, levels: u32 },

    /// Dequeue on an empty queue
    #[error("queue is empty")]
    Empty,

    /// The injected shape-tensor peek function failed for a request
    #[error("failed to peek shape tensor '{tensor}': {message}")]
    ShapePeek { tensor: String, message: String },

    /// The request was dropped before dispatch (queue teardown)
    #[error("request aborted before execution")]
    Aborted,
}

impl QueueError {
    /// Create a shape peek error
    pub fn shape_peek(tensor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ShapePeek { tensor: tensor.into(), message: message.into() }
    }
}
