//! Priority-aware staging queue
//!
//! Incoming requests are staged per priority level and assembled into
//! batches by a single batcher thread using a reversible cursor:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Producer Threads                        │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │ enqueue(level, payload)
//!                    ┌────────▼────────┐
//!                    │  PriorityQueue  │
//!                    │  ┌───────────┐  │  level 1: [active][delayed]
//!                    │  │PolicyQueue│  │  level 2: [active][delayed]
//!                    │  │PolicyQueue│  │  ...
//!                    │  └───────────┘  │  + rejected side-buffers
//!                    └────────┬────────┘
//!                             │ cursor walk / dequeue
//!                    ┌────────▼────────┐
//!                    │  Batcher Thread │ ← non-destructive lookahead
//!                    └─────────────────┘
//! ```
//!
//! The cursor lets the batcher walk candidate payloads, apply per-level
//! timeout policies along the way, and then either commit (dequeue exactly
//! the pending batch) or roll back without disturbing queue order.

mod payload;
mod policy_queue;
mod priority_queue;

pub use payload::Payload;
pub use priority_queue::PriorityQueue;

use crate::error::QueueError;

/// A synchronously rejected enqueue. The queue did not retain the payload;
/// it is handed back to the caller untouched.
#[derive(Debug)]
pub struct EnqueueError {
    /// Why the enqueue was refused
    pub error: QueueError,
    /// The payload, returned to the caller
    pub payload: Payload,
}

impl std::fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for EnqueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
