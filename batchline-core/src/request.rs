//! Inference request model
//!
//! The observable attributes of a request as the queue sees them: identity,
//! priority, timeout, named input tensors with their data buffers, and the
//! outputs the client asked for. Input data is held as reference-counted
//! [`Bytes`] so requests move through the queue without copying buffers.
//!
//! Each request travels with a [`ResponseSink`], a deliver-exactly-once
//! callback that receives either success (dispatch) or a rejection error.
//! A sink dropped without delivery reports [`QueueError::Aborted`], so
//! tearing down a loaded queue notifies every caller.

use bytes::Bytes;

use crate::error::QueueError;

/// No request flags set
pub const REQUEST_FLAG_NONE: u32 = 0;
/// The request is the first of a correlated sequence
pub const REQUEST_FLAG_SEQUENCE_START: u32 = 1;
/// The request is the last of a correlated sequence
pub const REQUEST_FLAG_SEQUENCE_END: u32 = 2;

/// Where an input buffer resides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    Cpu,
    CpuPinned,
    Gpu,
}

/// A chunk of data appended to a named input
#[derive(Debug, Clone)]
pub struct InputBuffer {
    pub data: Bytes,
    pub memory_type: MemoryType,
}

/// A named input tensor with its declared shape and appended data
#[derive(Debug, Clone)]
pub struct TensorInput {
    name: String,
    shape: Vec<i64>,
    buffers: Vec<InputBuffer>,
}

impl TensorInput {
    pub fn new(name: impl Into<String>, shape: Vec<i64>) -> Self {
        Self { name: name.into(), shape, buffers: Vec::new() }
    }

    /// Append a data buffer to this input
    pub fn append_data(mut self, data: Bytes, memory_type: MemoryType) -> Self {
        self.buffers.push(InputBuffer { data, memory_type });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn buffers(&self) -> &[InputBuffer] {
        &self.buffers
    }

    /// Total bytes appended across all buffers
    pub fn byte_size(&self) -> usize {
        self.buffers.iter().map(|b| b.data.len()).sum()
    }
}

/// An output tensor requested by the client
#[derive(Debug, Clone)]
pub struct RequestedOutput {
    pub name: String,
    /// If set, return the top-N classification results instead of raw data
    pub classification_count: Option<u32>,
}

impl RequestedOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), classification_count: None }
    }

    pub fn with_classification_count(mut self, count: u32) -> Self {
        self.classification_count = Some(count);
        self
    }
}

/// An inference request staged for batched execution
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    id: String,
    flags: u32,
    correlation_id: u64,
    priority: u32,
    timeout_us: u64,
    inputs: Vec<TensorInput>,
    outputs: Vec<RequestedOutput>,
}

impl InferenceRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flags: REQUEST_FLAG_NONE,
            correlation_id: 0,
            priority: 0,
            timeout_us: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: u64) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_us(mut self, timeout_us: u64) -> Self {
        self.timeout_us = timeout_us;
        self
    }

    pub fn add_input(mut self, input: TensorInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn add_requested_output(mut self, output: RequestedOutput) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn timeout_us(&self) -> u64 {
        self.timeout_us
    }

    pub fn inputs(&self) -> &[TensorInput] {
        &self.inputs
    }

    /// Look up an input by name
    pub fn input(&self, name: &str) -> Option<&TensorInput> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn outputs(&self) -> &[RequestedOutput] {
        &self.outputs
    }

    /// Batch size for queue accounting: the first dimension of the first
    /// input when positive, else 1
    pub fn batch_size(&self) -> usize {
        self.inputs
            .first()
            .and_then(|i| i.shape.first())
            .filter(|&&dim| dim > 0)
            .map(|&dim| dim as usize)
            .unwrap_or(1)
    }
}

/// Outcome delivered through a response sink: success on dispatch, or the
/// rejection error
pub type SinkResult = Result<(), QueueError>;

/// Deliver-exactly-once completion callback owned by a queued request
pub struct ResponseSink {
    deliver: Option<Box<dyn FnOnce(SinkResult) + Send + 'static>>,
}

impl ResponseSink {
    pub fn new(deliver: impl FnOnce(SinkResult) + Send + 'static) -> Self {
        Self { deliver: Some(Box::new(deliver)) }
    }

    /// A sink that discards its outcome
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    /// Consume the sink, invoking the callback with `result`
    pub fn deliver(mut self, result: SinkResult) {
        if let Some(deliver) = self.deliver.take() {
            deliver(result);
        }
    }
}

impl Drop for ResponseSink {
    fn drop(&mut self) {
        if let Some(deliver) = self.deliver.take() {
            deliver(Err(QueueError::Aborted));
        }
    }
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSink")
            .field("delivered", &self.deliver.is_none())
            .finish()
    }
}
