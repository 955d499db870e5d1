//! Multi-level priority queue with a reversible pending-batch cursor
//!
//! Levels are numbered from 1; a smaller number means higher dispatch
//! priority. Each level is a [`PolicyQueue`] with its own admission and
//! timeout policy. The cursor walks payloads in dispatch order (priority-
//! major, active before delayed within a level) without removing them, so
//! the batcher can look ahead, apply timeout policies, and then commit or
//! roll back the pending batch.
//!
//! The cursor is an abstract (level, sub-queue, offset) triple resolved
//! against the underlying containers on every access. Any `enqueue` or
//! `dequeue` invalidates it; batch assembly must restart from
//! [`PriorityQueue::reset_cursor`].

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound::{Excluded, Included};
use std::sync::Arc;

use tracing::debug;

use crate::clock::{ClockSource, MonotonicClock};
use crate::error::QueueError;
use crate::policy::{QueuePolicy, QueuePolicyMap};

use super::payload::Payload;
use super::policy_queue::PolicyQueue;
use super::EnqueueError;

/// Pending-batch cursor: the position after the tentatively included
/// payloads, plus aggregates over them
#[derive(Debug, Clone)]
struct Cursor {
    level: u32,
    queue_idx: usize,
    at_delayed: bool,
    pending_batch_count: usize,
    pending_batch_closest_timeout_ns: u64,
    pending_batch_oldest_enqueue_time_ns: u64,
    valid: bool,
}

impl Cursor {
    fn start_at(level: u32) -> Self {
        Self {
            level,
            queue_idx: 0,
            at_delayed: false,
            pending_batch_count: 0,
            pending_batch_closest_timeout_ns: u64::MAX,
            pending_batch_oldest_enqueue_time_ns: u64::MAX,
            valid: true,
        }
    }

    fn invalid() -> Self {
        Self { valid: false, ..Self::start_at(0) }
    }
}

/// Priority-aware staging queue with non-destructive batch lookahead
pub struct PriorityQueue {
    queues: BTreeMap<u32, PolicyQueue>,
    priority_levels: u32,
    size: usize,

    // Hints to skip empty levels when locating the queue front
    front_priority_level: u32,
    last_priority_level: u32,

    cursor: Cursor,
    mark: Cursor,
    clock: Arc<dyn ClockSource>,
}

impl Default for PriorityQueue {
    /// A single implicit level with the default policy: an unbounded FIFO
    fn default() -> Self {
        Self::new(QueuePolicy::default(), 1, QueuePolicyMap::new())
    }
}

impl PriorityQueue {
    /// Create a queue with levels `1..=priority_levels`. A level uses its
    /// entry from `policy_map` when present, else `default_policy`.
    pub fn new(default_policy: QueuePolicy, priority_levels: u32, policy_map: QueuePolicyMap) -> Self {
        Self::with_clock(default_policy, priority_levels, policy_map, Arc::new(MonotonicClock::new()))
    }

    /// Same as [`PriorityQueue::new`] with an injected clock
    pub fn with_clock(
        default_policy: QueuePolicy,
        priority_levels: u32,
        mut policy_map: QueuePolicyMap,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        let priority_levels = priority_levels.max(1);
        let mut queues = BTreeMap::new();
        for level in 1..=priority_levels {
            let policy = policy_map.remove(&level).unwrap_or_else(|| default_policy.clone());
            queues.insert(level, PolicyQueue::new(policy));
        }
        Self {
            queues,
            priority_levels,
            size: 0,
            front_priority_level: u32::MAX,
            last_priority_level: 0,
            cursor: Cursor::invalid(),
            mark: Cursor::invalid(),
            clock,
        }
    }

    /// Enqueue `payload` at `priority_level` (1 = dispatched first).
    /// Level 0 is reserved for "model default" and resolved by the
    /// frontend before enqueue; here it is invalid. Invalidates the cursor.
    pub fn enqueue(&mut self, priority_level: u32, payload: Payload) -> Result<(), EnqueueError> {
        if priority_level == 0 || priority_level > self.priority_levels {
            return Err(EnqueueError {
                error: QueueError::InvalidPriority {
                    level: priority_level,
                    levels: self.priority_levels,
                },
                payload,
            });
        }
        let now_ns = self.clock.now_ns();
        let queue = self
            .queues
            .get_mut(&priority_level)
            .expect("levels 1..=priority_levels exist from construction");
        queue.enqueue(payload, now_ns)?;

        self.size += 1;
        self.front_priority_level = self.front_priority_level.min(priority_level);
        self.last_priority_level = self.last_priority_level.max(priority_level);
        self.invalidate_cursor();
        debug!(level = priority_level, size = self.size, "payload enqueued");
        Ok(())
    }

    /// Dequeue the front payload in priority-major, FIFO-within-level order.
    /// Invalidates the cursor.
    pub fn dequeue(&mut self) -> Result<Payload, QueueError> {
        if self.size == 0 {
            return Err(QueueError::Empty);
        }
        let now_ns = self.clock.now_ns();
        let level = self
            .queues
            .range(self.front_priority_level..)
            .find(|(_, q)| !q.is_empty())
            .map(|(&level, _)| level)
            .ok_or(QueueError::Empty)?;
        let queue = self
            .queues
            .get_mut(&level)
            .expect("level key comes from the map");
        let payload = queue.dequeue(now_ns).ok_or(QueueError::Empty)?;

        self.size -= 1;
        if queue.is_empty() {
            self.front_priority_level = self
                .queues
                .range((Excluded(level), Included(self.last_priority_level)))
                .find(|(_, q)| !q.is_empty())
                .map(|(&level, _)| level)
                .unwrap_or(u32::MAX);
        }
        self.invalidate_cursor();
        debug!(level, size = self.size, "payload dequeued");
        Ok(payload)
    }

    /// Queued payloads across all levels; rejected buffers not included
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Reset the cursor to an empty pending batch at the queue front.
    /// Does not apply any timeout policy.
    pub fn reset_cursor(&mut self) {
        let front = if self.front_priority_level != u32::MAX {
            self.front_priority_level
        } else {
            1
        };
        self.cursor = Cursor::start_at(front);
        self.mark.valid = false;
    }

    /// Record the cursor so batch assembly can be rolled back to this point
    pub fn mark_cursor(&mut self) {
        self.mark = self.cursor.clone();
    }

    /// Restore the cursor recorded by [`PriorityQueue::mark_cursor`].
    /// Callers must check [`PriorityQueue::is_cursor_valid`] first;
    /// restoring after an intervening enqueue/dequeue/reset is a caller bug.
    pub fn set_cursor_to_mark(&mut self) {
        self.cursor = self.mark.clone();
    }

    /// Whether the pending batch is unchanged since the cursor was created
    pub fn is_cursor_valid(&self) -> bool {
        self.cursor.valid
    }

    /// Sweep the timeout policy from the cursor forward until it rests on a
    /// still-pending payload or the end of the queue. Expired entries move
    /// to their level's rejected buffer (`Reject`) or delayed sub-queue
    /// (`Delay`). Returns the total batch size of newly rejected payloads.
    pub fn apply_policy_at_cursor(&mut self) -> usize {
        let now_ns = self.clock.now_ns();
        let mut rejected_count = 0;
        let mut rejected_batch_size = 0;
        loop {
            let Some(queue) = self.queues.get_mut(&self.cursor.level) else {
                break;
            };
            if !self.cursor.at_delayed {
                if queue.apply_policy(
                    self.cursor.queue_idx,
                    &mut rejected_count,
                    &mut rejected_batch_size,
                    now_ns,
                ) {
                    break;
                }
                // Active exhausted past the cursor; roll into the delayed
                // sub-queue, whose entries never expire
                self.cursor.at_delayed = true;
                self.cursor.queue_idx = 0;
            }
            if self.cursor.queue_idx < queue.delayed_size() {
                break;
            }
            if !self.advance_cursor_level() {
                break;
            }
        }
        self.size -= rejected_count;
        if rejected_count > 0 {
            debug!(
                rejected = rejected_count,
                rejected_batch_size, "expired payloads moved to rejected buffer"
            );
        }
        rejected_batch_size
    }

    /// Payload at the cursor. Callers check [`PriorityQueue::cursor_end`]
    /// first.
    pub fn payload_at_cursor(&self) -> &Payload {
        self.queues[&self.cursor.level].at(self.cursor.queue_idx, self.cursor.at_delayed)
    }

    /// Include the payload at the cursor in the pending batch and step past
    /// it. Does not apply any timeout policy. No effect at the end of the
    /// queue.
    pub fn advance_cursor(&mut self) {
        if self.cursor_end() {
            return;
        }
        let queue = &self.queues[&self.cursor.level];
        let enqueue_ns = queue
            .at(self.cursor.queue_idx, self.cursor.at_delayed)
            .enqueue_time_ns();
        let timeout_ns = queue.timeout_at(self.cursor.queue_idx, self.cursor.at_delayed);
        let active_len = queue.unexpired_size();
        let delayed_len = queue.delayed_size();

        let cursor = &mut self.cursor;
        cursor.pending_batch_oldest_enqueue_time_ns =
            cursor.pending_batch_oldest_enqueue_time_ns.min(enqueue_ns);
        if timeout_ns != 0 {
            cursor.pending_batch_closest_timeout_ns =
                cursor.pending_batch_closest_timeout_ns.min(timeout_ns);
        }
        cursor.pending_batch_count += 1;
        cursor.queue_idx += 1;

        if !cursor.at_delayed && cursor.queue_idx >= active_len {
            cursor.at_delayed = true;
            cursor.queue_idx = 0;
        }
        if cursor.at_delayed && cursor.queue_idx >= delayed_len {
            self.advance_cursor_level();
        }
    }

    /// True when every queued payload is in the pending batch
    pub fn cursor_end(&self) -> bool {
        self.cursor.pending_batch_count == self.size
    }

    /// Number of payloads in the pending batch
    pub fn pending_batch_count(&self) -> usize {
        self.cursor.pending_batch_count
    }

    /// Oldest enqueue time across the pending batch; `u64::MAX` when empty
    pub fn oldest_enqueue_time_ns(&self) -> u64 {
        self.cursor.pending_batch_oldest_enqueue_time_ns
    }

    /// Closest deadline across the pending batch; `u64::MAX` when no
    /// member carries one
    pub fn closest_timeout_ns(&self) -> u64 {
        self.cursor.pending_batch_closest_timeout_ns
    }

    /// Drain the rejected buffers, one sub-sequence per priority level in
    /// ascending level order. A second immediate call returns empty
    /// sub-sequences.
    pub fn release_rejected_payloads(&mut self) -> Vec<VecDeque<Payload>> {
        self.queues.values_mut().map(|q| q.release_rejected()).collect()
    }

    /// Move the cursor to the start of the next level holding payloads.
    /// Returns false when no such level exists.
    fn advance_cursor_level(&mut self) -> bool {
        if self.cursor.level >= self.last_priority_level {
            return false;
        }
        let next = self
            .queues
            .range((Excluded(self.cursor.level), Included(self.last_priority_level)))
            .find(|(_, q)| !q.is_empty())
            .map(|(&level, _)| level);
        match next {
            Some(level) => {
                self.cursor.level = level;
                self.cursor.queue_idx = 0;
                self.cursor.at_delayed = false;
                true
            }
            None => false,
        }
    }

    fn invalidate_cursor(&mut self) {
        self.cursor.valid = false;
        self.mark.valid = false;
    }
}

impl std::fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("priority_levels", &self.priority_levels)
            .field("size", &self.size)
            .field("pending_batch_count", &self.cursor.pending_batch_count)
            .finish_non_exhaustive()
    }
}
