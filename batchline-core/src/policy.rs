//! Per-priority-level queueing policy
//!
//! A `QueuePolicy` controls admission and timeout behavior for one priority
//! level: how long a request may wait, what happens when it waits too long,
//! and how many requests the level may hold. Policies are immutable after
//! queue construction; a config loader can deserialize them directly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What to do with a request whose queue deadline passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Remove the request and report `DeadlineExceeded` through its sink
    #[default]
    Reject,
    /// Keep the request dispatchable but strip its deadline
    Delay,
}

/// Admission and timeout policy for one priority level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePolicy {
    /// Action taken when a request's deadline passes
    pub timeout_action: TimeoutAction,

    /// Default per-request timeout in microseconds (0 = no timeout)
    pub default_timeout_us: u64,

    /// Whether a request's own `timeout_us` may override the default
    pub allow_timeout_override: bool,

    /// Maximum requests queued at this level (0 = unbounded)
    pub max_queue_size: u32,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            timeout_action: TimeoutAction::Reject,
            default_timeout_us: 0,
            allow_timeout_override: false,
            max_queue_size: 0,
        }
    }
}

impl QueuePolicy {
    /// Reject requests that wait longer than `timeout_us`
    pub fn reject_after_us(timeout_us: u64) -> Self {
        Self { default_timeout_us: timeout_us, ..Self::default() }
    }

    /// Strip the deadline from requests that wait longer than `timeout_us`,
    /// keeping them dispatchable
    pub fn delay_after_us(timeout_us: u64) -> Self {
        Self {
            timeout_action: TimeoutAction::Delay,
            default_timeout_us: timeout_us,
            ..Self::default()
        }
    }

    /// Cap the number of requests queued at this level
    pub fn with_max_queue_size(mut self, max: u32) -> Self {
        self.max_queue_size = max;
        self
    }

    /// Let requests override the default timeout with their own
    pub fn with_timeout_override(mut self) -> Self {
        self.allow_timeout_override = true;
        self
    }
}

/// Per-level policy overrides, keyed by priority level
pub type QueuePolicyMap = HashMap<u32, QueuePolicy>;
