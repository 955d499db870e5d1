//! Single-priority FIFO with timeout bookkeeping
//!
//! A `PolicyQueue` holds the requests of one priority level in three ordered
//! sub-queues: `queue` (active, in enqueue order), `delayed_queue` (entries
//! whose deadline passed under the `Delay` action), and `rejected_queue`
//! (entries expired under `Reject`, awaiting drain). Absolute deadlines for
//! the active queue live in a parallel deque that stays aligned with it
//! after every operation.

use std::collections::VecDeque;

use crate::error::QueueError;
use crate::policy::{QueuePolicy, TimeoutAction};

use super::payload::Payload;
use super::EnqueueError;

/// FIFO for one priority level with timeout enforcement and side-buffers
#[derive(Debug)]
pub(crate) struct PolicyQueue {
    timeout_action: TimeoutAction,
    default_timeout_us: u64,
    allow_timeout_override: bool,
    max_queue_size: u32,

    /// Absolute deadlines aligned with `queue`; 0 means no deadline
    timeout_timestamp_ns: VecDeque<u64>,
    queue: VecDeque<Payload>,
    delayed_queue: VecDeque<Payload>,
    rejected_queue: VecDeque<Payload>,
}

impl PolicyQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            timeout_action: policy.timeout_action,
            default_timeout_us: policy.default_timeout_us,
            allow_timeout_override: policy.allow_timeout_override,
            max_queue_size: policy.max_queue_size,
            timeout_timestamp_ns: VecDeque::new(),
            queue: VecDeque::new(),
            delayed_queue: VecDeque::new(),
            rejected_queue: VecDeque::new(),
        }
    }

    /// Append `payload` and record its deadline. A full queue hands the
    /// payload straight back to the caller.
    pub fn enqueue(&mut self, mut payload: Payload, now_ns: u64) -> Result<(), EnqueueError> {
        if self.max_queue_size > 0 && self.size() >= self.max_queue_size as usize {
            return Err(EnqueueError {
                error: QueueError::Full { max: self.max_queue_size },
                payload,
            });
        }

        let timeout_us = if self.allow_timeout_override && payload.request().timeout_us() > 0 {
            payload.request().timeout_us()
        } else {
            self.default_timeout_us
        };
        let deadline_ns = if timeout_us == 0 { 0 } else { now_ns + timeout_us * 1_000 };

        payload.set_enqueue_time_ns(now_ns);
        self.queue.push_back(payload);
        self.timeout_timestamp_ns.push_back(deadline_ns);
        Ok(())
    }

    /// Pop the front payload: the unexpired head of the active queue, else
    /// the head of the delayed queue. An expired active head is returned
    /// as-is when nothing is delayed; callers are expected to have swept
    /// the policy first.
    pub fn dequeue(&mut self, now_ns: u64) -> Option<Payload> {
        if !self.queue.is_empty() {
            let deadline = self.timeout_timestamp_ns[0];
            if deadline == 0 || deadline > now_ns || self.delayed_queue.is_empty() {
                self.timeout_timestamp_ns.pop_front();
                return self.queue.pop_front();
            }
        }
        self.delayed_queue.pop_front()
    }

    /// Apply the timeout policy at `idx` in the active queue. Expired
    /// entries move to the rejected buffer (`Reject`) or the delayed tail
    /// with their deadline cleared (`Delay`) until `queue[idx]` holds an
    /// unexpired payload. `rejected_count` and `rejected_batch_size` are
    /// incremented for newly rejected entries.
    ///
    /// Returns true while `queue[idx]` points at a payload, false once the
    /// active queue is exhausted from `idx` on.
    pub fn apply_policy(
        &mut self,
        idx: usize,
        rejected_count: &mut usize,
        rejected_batch_size: &mut usize,
        now_ns: u64,
    ) -> bool {
        while idx < self.queue.len() {
            let deadline = self.timeout_timestamp_ns[idx];
            if deadline == 0 || deadline > now_ns {
                return true;
            }
            // idx is in range, checked by the loop condition
            let payload = self.queue.remove(idx).unwrap();
            self.timeout_timestamp_ns.remove(idx);
            match self.timeout_action {
                TimeoutAction::Reject => {
                    *rejected_count += 1;
                    *rejected_batch_size += payload.batch_size();
                    self.rejected_queue.push_back(payload);
                }
                TimeoutAction::Delay => {
                    self.delayed_queue.push_back(payload);
                }
            }
        }
        false
    }

    /// Move out the rejected buffer, leaving it empty
    pub fn release_rejected(&mut self) -> VecDeque<Payload> {
        std::mem::take(&mut self.rejected_queue)
    }

    /// Payload at `idx` within the active or delayed sub-queue
    pub fn at(&self, idx: usize, at_delayed: bool) -> &Payload {
        if at_delayed {
            &self.delayed_queue[idx]
        } else {
            &self.queue[idx]
        }
    }

    /// Deadline of the payload at `idx`; delayed entries never expire again
    pub fn timeout_at(&self, idx: usize, at_delayed: bool) -> u64 {
        if at_delayed {
            0
        } else {
            self.timeout_timestamp_ns[idx]
        }
    }

    /// Queued payloads, rejected entries not included
    pub fn size(&self) -> usize {
        self.queue.len() + self.delayed_queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Entries still carrying a live deadline slot
    pub fn unexpired_size(&self) -> usize {
        self.queue.len()
    }

    pub fn delayed_size(&self) -> usize {
        self.delayed_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{InferenceRequest, ResponseSink, TensorInput};

    fn payload(id: &str) -> Payload {
        Payload::new(InferenceRequest::new(id), ResponseSink::discard())
    }

    fn payload_with_batch(id: &str, batch: i64) -> Payload {
        let request = InferenceRequest::new(id).add_input(TensorInput::new("x", vec![batch, 3]));
        Payload::new(request, ResponseSink::discard())
    }

    fn payload_with_timeout(id: &str, timeout_us: u64) -> Payload {
        Payload::new(
            InferenceRequest::new(id).with_timeout_us(timeout_us),
            ResponseSink::discard(),
        )
    }

    fn timestamps_aligned(q: &PolicyQueue) -> bool {
        q.timeout_timestamp_ns.len() == q.queue.len()
    }

    #[test]
    fn test_fifo_order() {
        let mut q = PolicyQueue::new(QueuePolicy::default());
        q.enqueue(payload("a"), 0).unwrap();
        q.enqueue(payload("b"), 1).unwrap();
        q.enqueue(payload("c"), 2).unwrap();
        assert_eq!(q.size(), 3);
        assert!(timestamps_aligned(&q));

        assert_eq!(q.dequeue(10).unwrap().request().id(), "a");
        assert_eq!(q.dequeue(10).unwrap().request().id(), "b");
        assert_eq!(q.dequeue(10).unwrap().request().id(), "c");
        assert!(q.is_empty());
        assert!(timestamps_aligned(&q));
    }

    #[test]
    fn test_enqueue_records_time_and_deadline() {
        let mut q = PolicyQueue::new(QueuePolicy::reject_after_us(1_000));
        q.enqueue(payload("a"), 500).unwrap();
        assert_eq!(q.at(0, false).enqueue_time_ns(), 500);
        // 1000us default timeout lands the deadline at 500 + 1_000_000ns
        assert_eq!(q.timeout_at(0, false), 1_000_500);
    }

    #[test]
    fn test_timeout_override() {
        // Override refused: the default applies
        let mut q = PolicyQueue::new(QueuePolicy::reject_after_us(1_000));
        q.enqueue(payload_with_timeout("a", 50), 0).unwrap();
        assert_eq!(q.timeout_at(0, false), 1_000_000);

        // Override allowed: the request's own timeout wins
        let mut q = PolicyQueue::new(QueuePolicy::reject_after_us(1_000).with_timeout_override());
        q.enqueue(payload_with_timeout("a", 50), 0).unwrap();
        assert_eq!(q.timeout_at(0, false), 50_000);

        // Override allowed but request has none: back to the default
        q.enqueue(payload("b"), 0).unwrap();
        assert_eq!(q.timeout_at(1, false), 1_000_000);
    }

    #[test]
    fn test_max_queue_size_hands_payload_back() {
        let mut q = PolicyQueue::new(QueuePolicy::default().with_max_queue_size(2));
        q.enqueue(payload("a"), 0).unwrap();
        q.enqueue(payload("b"), 0).unwrap();

        let err = q.enqueue(payload("c"), 0).unwrap_err();
        assert_eq!(err.error, QueueError::Full { max: 2 });
        assert_eq!(err.payload.request().id(), "c");
        assert_eq!(q.size(), 2);
        assert!(q.rejected_queue.is_empty());
    }

    #[test]
    fn test_apply_policy_rejects_expired() {
        let mut q = PolicyQueue::new(QueuePolicy::reject_after_us(1_000));
        q.enqueue(payload_with_batch("a", 4), 0).unwrap();
        q.enqueue(payload_with_batch("b", 2), 0).unwrap();

        let mut count = 0;
        let mut batch = 0;
        // Both deadlines (1ms) have passed at 2ms
        assert!(!q.apply_policy(0, &mut count, &mut batch, 2_000_000));
        assert_eq!(count, 2);
        assert_eq!(batch, 6);
        assert_eq!(q.size(), 0);
        assert!(timestamps_aligned(&q));

        let rejected: Vec<_> = q.release_rejected().into_iter().collect();
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].request().id(), "a");
        // A second drain is empty
        assert!(q.release_rejected().is_empty());
    }

    #[test]
    fn test_apply_policy_delays_expired() {
        let mut q = PolicyQueue::new(QueuePolicy::delay_after_us(1_000));
        q.enqueue(payload("a"), 0).unwrap();
        q.enqueue(payload("b"), 0).unwrap();

        let mut count = 0;
        let mut batch = 0;
        assert!(!q.apply_policy(0, &mut count, &mut batch, 2_000_000));
        assert_eq!(count, 0);
        assert_eq!(batch, 0);
        assert_eq!(q.size(), 2);
        assert_eq!(q.delayed_size(), 2);
        assert_eq!(q.unexpired_size(), 0);
        assert!(timestamps_aligned(&q));

        // Delayed entries report no deadline and never expire again
        assert_eq!(q.timeout_at(0, true), 0);
        assert_eq!(q.dequeue(5_000_000).unwrap().request().id(), "a");
        assert_eq!(q.dequeue(5_000_000).unwrap().request().id(), "b");
    }

    #[test]
    fn test_apply_policy_stops_at_unexpired() {
        let mut q =
            PolicyQueue::new(QueuePolicy::reject_after_us(1_000).with_timeout_override());
        q.enqueue(payload_with_timeout("a", 100), 0).unwrap();
        q.enqueue(payload_with_timeout("b", 10_000), 0).unwrap();
        q.enqueue(payload_with_timeout("c", 100), 0).unwrap();

        let mut count = 0;
        let mut batch = 0;
        // At 1ms only "a" has expired; the sweep stops on "b" even though
        // "c" behind it is also expired
        assert!(q.apply_policy(0, &mut count, &mut batch, 1_000_000));
        assert_eq!(count, 1);
        assert_eq!(q.at(0, false).request().id(), "b");
        assert_eq!(q.at(1, false).request().id(), "c");
        assert!(timestamps_aligned(&q));
    }

    #[test]
    fn test_dequeue_prefers_unexpired_active_head() {
        let mut q = PolicyQueue::new(QueuePolicy::delay_after_us(1_000));
        q.enqueue(payload("a"), 0).unwrap();

        let mut count = 0;
        let mut batch = 0;
        q.apply_policy(0, &mut count, &mut batch, 2_000_000);
        q.enqueue(payload("b"), 2_000_000).unwrap();

        // "b" sits unexpired at the active head, "a" is delayed; active
        // wins until it expires
        assert_eq!(q.dequeue(2_500_000).unwrap().request().id(), "b");
        assert_eq!(q.dequeue(2_500_000).unwrap().request().id(), "a");
    }

    #[test]
    fn test_dequeue_expired_head_without_delayed() {
        let mut q = PolicyQueue::new(QueuePolicy::reject_after_us(1_000));
        q.enqueue(payload("a"), 0).unwrap();

        // No policy sweep ran; the expired head is all there is
        assert_eq!(q.dequeue(2_000_000).unwrap().request().id(), "a");
        assert!(q.is_empty());
    }
}
