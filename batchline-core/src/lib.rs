//! Batchline Core Library
//!
//! Priority-aware batching queue for staging inference requests ahead of
//! model execution. Producer threads enqueue requests per priority level;
//! a single batcher thread assembles shape-compatible batches using a
//! reversible cursor, enforcing per-level queue policies (max size,
//! per-request timeouts with reject or delay actions) along the way.

pub mod batcher;
pub mod clock;
pub mod error;
pub mod policy;
pub mod queue;
pub mod request;
pub mod shape;

pub use batcher::{Batcher, BatcherConfig, BatcherMetrics, MetricsSnapshot, SharedQueue};
pub use clock::{ClockSource, ManualClock, MonotonicClock};
pub use error::QueueError;
pub use policy::{QueuePolicy, QueuePolicyMap, TimeoutAction};
pub use queue::{EnqueueError, Payload, PriorityQueue};
pub use request::{
    InferenceRequest, InputBuffer, MemoryType, RequestedOutput, ResponseSink, TensorInput,
};
