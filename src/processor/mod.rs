//! Inbound failover message handling.
//!
//! Every message runs `pre_process -> process -> post_process` in the
//! [`MessagePipeline`]. Sender identity and role are checked once by the
//! pipeline; a processor's own `pre_process` only adds state preconditions.
//! `process` returns the reply to send, if any, and `post_process` runs
//! whether or not `process` failed and may veto that reply.

mod binding;
mod bulk;
mod control;
mod pipeline;
mod polling;

pub use binding::*;
pub use bulk::*;
pub use control::*;
pub use pipeline::*;
pub use polling::*;

#[cfg(test)]
mod pipeline_test;

use std::net::IpAddr;
use std::sync::Arc;

use tonic::async_trait;

use crate::FailoverMessage;
use crate::FsmHandle;
use crate::LeaseManager;
use crate::LinkResolver;
use crate::MessageType;
use crate::PeerLink;
use crate::Result;
use crate::Role;

/// Collaborators shared by all processors of one node.
#[derive(Clone)]
pub struct ProcessContext {
    pub role: Role,
    pub peer_ip: IpAddr,
    pub fsm: FsmHandle,
    pub leases: Arc<dyn LeaseManager>,
    pub links: LinkResolver,
    /// Where replies go.
    pub link: Arc<dyn PeerLink>,
}

#[async_trait]
pub trait MessageProcessor: Send + Sync + 'static {
    fn message_type(&self) -> MessageType;

    /// State preconditions. Returning `false` drops the message silently.
    async fn pre_process(
        &self,
        _ctx: &ProcessContext,
        _msg: &FailoverMessage,
    ) -> bool {
        true
    }

    /// Handles the message and returns the reply, if one is warranted.
    async fn process(
        &self,
        ctx: &ProcessContext,
        msg: &FailoverMessage,
    ) -> Result<Option<FailoverMessage>>;

    /// Always runs after `process`. `reply` is `None` when `process` failed.
    async fn post_process(
        &self,
        _ctx: &ProcessContext,
        _msg: &FailoverMessage,
        reply: Option<FailoverMessage>,
    ) -> Option<FailoverMessage> {
        reply
    }
}
