use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::AwaitKind;
use crate::Error;
use crate::Result;

/// How long to wait for one awaited reply, and how many consecutive
/// timeouts to tolerate before falling back.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AwaitPolicy {
    /// Single wait timeout (unit: milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Consecutive timeouts that trigger the fallback state
    #[serde(default = "default_fail_limit")]
    pub fail_limit: u32,
}

impl Default for AwaitPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            fail_limit: default_fail_limit(),
        }
    }
}

impl AwaitPolicy {
    pub(crate) fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name} timeout must be at least 1ms"
            ))));
        }
        if self.fail_limit == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name} fail_limit must be at least 1"
            ))));
        }
        Ok(())
    }
}

/// One policy per awaited reply type
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AwaitPolicies {
    // BNDACK/BNDNAK after a binding update
    #[serde(default = "default_bind_ack")]
    pub bind_ack: AwaitPolicy,

    // CTLRET after a control request
    #[serde(default = "default_control_return")]
    pub control_return: AwaitPolicy,

    // POLLREPLY after a poll
    #[serde(default = "default_poll_reply")]
    pub poll_reply: AwaitPolicy,

    // BULKBNDACK after handing leases back
    #[serde(default = "default_bulk_ack")]
    pub bulk_ack: AwaitPolicy,
}

impl Default for AwaitPolicies {
    fn default() -> Self {
        Self {
            bind_ack: default_bind_ack(),
            control_return: default_control_return(),
            poll_reply: default_poll_reply(),
            bulk_ack: default_bulk_ack(),
        }
    }
}

impl AwaitPolicies {
    pub fn get(
        &self,
        kind: AwaitKind,
    ) -> &AwaitPolicy {
        match kind {
            AwaitKind::BindAck => &self.bind_ack,
            AwaitKind::ControlReturn => &self.control_return,
            AwaitKind::PollReply => &self.poll_reply,
            AwaitKind::BulkAck => &self.bulk_ack,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_ack.validate("bind_ack")?;
        self.control_return.validate("control_return")?;
        self.poll_reply.validate("poll_reply")?;
        self.bulk_ack.validate("bulk_ack")?;
        Ok(())
    }
}

fn default_bind_ack() -> AwaitPolicy {
    AwaitPolicy {
        timeout_ms: 1000,
        fail_limit: 3,
    }
}
fn default_control_return() -> AwaitPolicy {
    AwaitPolicy {
        timeout_ms: 5000,
        fail_limit: 3,
    }
}
fn default_poll_reply() -> AwaitPolicy {
    AwaitPolicy {
        timeout_ms: 5000,
        fail_limit: 3,
    }
}
fn default_bulk_ack() -> AwaitPolicy {
    AwaitPolicy {
        timeout_ms: 10000,
        fail_limit: 3,
    }
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_fail_limit() -> u32 {
    3
}
