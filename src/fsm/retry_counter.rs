use std::time::Duration;

use crate::AwaitPolicy;

/// Reply types an FSM can be waiting for. At most one wait is outstanding per
/// machine; a new request replaces the previous wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AwaitKind {
    BindAck,
    ControlReturn,
    PollReply,
    BulkAck,
}

impl AwaitKind {
    pub const ALL: [AwaitKind; 4] = [
        AwaitKind::BindAck,
        AwaitKind::ControlReturn,
        AwaitKind::PollReply,
        AwaitKind::BulkAck,
    ];

    /// Whether a timeout with retries left resends the request or only keeps
    /// waiting. Binding updates are best effort: they are not resent.
    pub fn resends_on_timeout(self) -> bool {
        !matches!(self, AwaitKind::BindAck)
    }
}

/// Consecutive timeouts for one awaited reply type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCounter {
    count: u32,
    fail_limit: u32,
    timeout: Duration,
}

impl RetryCounter {
    pub fn new(
        fail_limit: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            count: 0,
            fail_limit: fail_limit.max(1),
            timeout,
        }
    }

    pub fn from_policy(policy: &AwaitPolicy) -> Self {
        Self::new(policy.fail_limit, Duration::from_millis(policy.timeout_ms))
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn fail_limit(&self) -> u32 {
        self.fail_limit
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Counts one timeout. Returns `true` once the fail limit is reached.
    pub fn record_timeout(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count >= self.fail_limit
    }
}
