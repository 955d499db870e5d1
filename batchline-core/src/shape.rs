//! Shape compatibility for pending batches
//!
//! A batch may only contain requests whose tensor shapes agree on the
//! dimensions the model declares must-be-equal. For shape tensors — inputs
//! whose *values* participate in kernel selection — the element values must
//! match as well, not just the declared shape.
//!
//! The batcher seeds a [`PendingBatchShapes`] map from the first payload of
//! each new pending batch with [`init_pending_shape`], then screens every
//! later candidate with [`compare_with_pending_shape`]. Both read tensors
//! through an injected peek function so the queue stays independent of how
//! the runner materializes shape-tensor contents.

use std::collections::HashMap;

use crate::error::QueueError;
use crate::queue::Payload;

/// Shape and value vectors captured per enforced tensor, keyed by name.
/// The value vector is empty for inputs that are not shape tensors.
pub type PendingBatchShapes = HashMap<String, (Vec<i64>, Vec<i64>)>;

/// Capture the enforced tensors of the first payload in a new pending
/// batch. Entries of `enforce_equal` mapped to false are skipped.
pub fn init_pending_shape<F>(
    runner_id: i64,
    payload: &Payload,
    enforce_equal: &HashMap<String, bool>,
    peek: &F,
    pending: &mut PendingBatchShapes,
) -> Result<(), QueueError>
where
    F: Fn(i64, &Payload, &str) -> Result<(Vec<i64>, Vec<i64>), QueueError> + ?Sized,
{
    pending.clear();
    for (name, enforced) in enforce_equal {
        if !enforced {
            continue;
        }
        let (shape, values) = peek(runner_id, payload, name)?;
        pending.insert(name.clone(), (shape, values));
    }
    Ok(())
}

/// Whether `payload` can join the pending batch: every captured tensor must
/// match element-wise in both shape and shape-tensor values.
pub fn compare_with_pending_shape<F>(
    runner_id: i64,
    payload: &Payload,
    peek: &F,
    pending: &PendingBatchShapes,
) -> Result<bool, QueueError>
where
    F: Fn(i64, &Payload, &str) -> Result<(Vec<i64>, Vec<i64>), QueueError> + ?Sized,
{
    for (name, (shape, values)) in pending {
        let (candidate_shape, candidate_values) = peek(runner_id, payload, name)?;
        if candidate_shape != *shape || candidate_values != *values {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Peek implementation that reads declared shapes straight off the request.
/// Value vectors come back empty, so only shape equality is enforced.
pub fn standard_shape_peek(
    _runner_id: i64,
    payload: &Payload,
    tensor_name: &str,
) -> Result<(Vec<i64>, Vec<i64>), QueueError> {
    match payload.request().input(tensor_name) {
        Some(input) => Ok((input.shape().to_vec(), Vec::new())),
        None => Err(QueueError::shape_peek(tensor_name, "no such input on request")),
    }
}
