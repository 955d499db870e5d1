//! Payload record flowing through the queue

use crate::error::QueueError;
use crate::request::{InferenceRequest, ResponseSink};

/// A request staged in the queue together with its delivery callback and
/// queue-side bookkeeping
#[derive(Debug)]
pub struct Payload {
    request: InferenceRequest,
    sink: ResponseSink,
    enqueue_time_ns: u64,
    batch_size: usize,
}

impl Payload {
    /// Wrap a request for queueing. The batch size is taken from the
    /// request's first batched input.
    pub fn new(request: InferenceRequest, sink: ResponseSink) -> Self {
        let batch_size = request.batch_size();
        Self { request, sink, enqueue_time_ns: 0, batch_size }
    }

    pub fn request(&self) -> &InferenceRequest {
        &self.request
    }

    /// Batch size used when accounting rejections
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Monotonic time the payload entered the queue; 0 before enqueue
    pub fn enqueue_time_ns(&self) -> u64 {
        self.enqueue_time_ns
    }

    pub(crate) fn set_enqueue_time_ns(&mut self, now_ns: u64) {
        self.enqueue_time_ns = now_ns;
    }

    /// Reject the payload, firing its sink with `error`
    pub fn reject(self, error: QueueError) {
        self.sink.deliver(Err(error));
    }

    /// Split into the request and its sink for dispatch to a runner
    pub fn into_parts(self) -> (InferenceRequest, ResponseSink) {
        (self.request, self.sink)
    }
}
