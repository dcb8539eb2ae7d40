use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tracing::debug;
use tracing::error;
use tracing::warn;

use super::BindReplyProcessor;
use super::BindingUpdateProcessor;
use super::BulkBindingAckProcessor;
use super::BulkBindingChangeProcessor;
use super::ControlAckProcessor;
use super::ControlRequestProcessor;
use super::ControlReturnProcessor;
use super::MessageProcessor;
use super::PollProcessor;
use super::PollReplyProcessor;
use super::ProcessContext;
use crate::metrics::FAILOVER_MESSAGES_PROCESSED;
use crate::metrics::FAILOVER_MESSAGES_RECEIVED;
use crate::metrics::FAILOVER_MESSAGES_REJECTED;
use crate::BindingOp;
use crate::FailoverMessage;
use crate::MessageType;
use crate::ProtocolError;

static BND_ADD: BindingUpdateProcessor = BindingUpdateProcessor { op: BindingOp::Add };
static BND_UPD: BindingUpdateProcessor = BindingUpdateProcessor {
    op: BindingOp::Update,
};
static BND_DEL: BindingUpdateProcessor = BindingUpdateProcessor {
    op: BindingOp::Delete,
};
static BND_ACK: BindReplyProcessor = BindReplyProcessor { acked: true };
static BND_NAK: BindReplyProcessor = BindReplyProcessor { acked: false };
static POLL: PollProcessor = PollProcessor;
static POLL_REPLY: PollReplyProcessor = PollReplyProcessor;
static CTL_REQ: ControlRequestProcessor = ControlRequestProcessor;
static CTL_RET: ControlReturnProcessor = ControlReturnProcessor;
static CTL_ACK: ControlAckProcessor = ControlAckProcessor;
static BULK_BND_CHG: BulkBindingChangeProcessor = BulkBindingChangeProcessor;
static BULK_BND_ACK: BulkBindingAckProcessor = BulkBindingAckProcessor;

/// The processor for `message_type`; `None` for unknown codes.
pub fn processor_for(message_type: MessageType) -> Option<&'static dyn MessageProcessor> {
    match message_type {
        MessageType::BndAdd => Some(&BND_ADD),
        MessageType::BndUpd => Some(&BND_UPD),
        MessageType::BndDel => Some(&BND_DEL),
        MessageType::BndAck => Some(&BND_ACK),
        MessageType::BndNak => Some(&BND_NAK),
        MessageType::Poll => Some(&POLL),
        MessageType::PollReply => Some(&POLL_REPLY),
        MessageType::CtlReq => Some(&CTL_REQ),
        MessageType::CtlRet => Some(&CTL_RET),
        MessageType::CtlAck => Some(&CTL_ACK),
        MessageType::BulkBndChg => Some(&BULK_BND_CHG),
        MessageType::BulkBndAck => Some(&BULK_BND_ACK),
        MessageType::Unknown(_) => None,
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    processed: AtomicU64,
    rejected: AtomicU64,
    replied: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCounts {
    pub received: u64,
    pub processed: u64,
    pub rejected: u64,
    pub replied: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineCounts {
        PipelineCounts {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
        }
    }
}

/// Runs inbound messages through their processor and sends the reply.
///
/// Safe to call concurrently: processors share no state beyond the FSM
/// actor, which serialises transitions.
pub struct MessagePipeline {
    ctx: ProcessContext,
    stats: PipelineStats,
}

impl MessagePipeline {
    pub fn new(ctx: ProcessContext) -> Self {
        Self {
            ctx,
            stats: PipelineStats::default(),
        }
    }

    pub fn context(&self) -> &ProcessContext {
        &self.ctx
    }

    pub fn stats(&self) -> PipelineCounts {
        self.stats.snapshot()
    }

    /// Processes one message and returns the reply that was sent, if any.
    pub async fn handle(
        &self,
        msg: FailoverMessage,
    ) -> Option<FailoverMessage> {
        let type_name = msg.message_type.name();
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        FAILOVER_MESSAGES_RECEIVED.with_label_values(&[type_name]).inc();

        let Some(processor) = processor_for(msg.message_type) else {
            error!("unknown failover message type {} from {:?}", msg.message_type.code(), msg.remote);
            self.reject(type_name, "unknown_type");
            return None;
        };

        if let Err(e) = self.validate_sender(&msg) {
            warn!("dropping {} xid={}: {}", msg.message_type, msg.transaction_id, e);
            let reason = match e {
                ProtocolError::PeerMismatch { .. } => "peer_mismatch",
                _ => "role_mismatch",
            };
            self.reject(type_name, reason);
            return None;
        }

        if !processor.pre_process(&self.ctx, &msg).await {
            debug!(
                "{} xid={} not acceptable in {}",
                msg.message_type,
                msg.transaction_id,
                self.ctx.fsm.state()
            );
            self.reject(type_name, "state");
            return None;
        }

        let reply = match processor.process(&self.ctx, &msg).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("processing {} xid={} failed: {:?}", msg.message_type, msg.transaction_id, e);
                None
            }
        };
        let reply = processor.post_process(&self.ctx, &msg, reply).await;

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        FAILOVER_MESSAGES_PROCESSED.with_label_values(&[type_name]).inc();

        let reply = reply?;
        if let Err(e) = self.ctx.link.send(reply.clone()).await {
            warn!("failed to send {} xid={}: {:?}", reply.message_type, reply.transaction_id, e);
            return None;
        }
        self.stats.replied.fetch_add(1, Ordering::Relaxed);
        Some(reply)
    }

    /// The message must come from the configured peer, and from the role
    /// that sends this type.
    fn validate_sender(
        &self,
        msg: &FailoverMessage,
    ) -> std::result::Result<(), ProtocolError> {
        let remote = msg.remote.map(|addr| addr.ip());
        if remote != Some(self.ctx.peer_ip) {
            return Err(ProtocolError::PeerMismatch {
                remote: remote.unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
                peer: self.ctx.peer_ip,
            });
        }

        let expected = self.ctx.role.peer();
        if msg.message_type.sender_role() != Some(expected) {
            return Err(ProtocolError::RoleMismatch {
                message_type: msg.message_type.name(),
                role: self.ctx.role.name(),
            });
        }
        Ok(())
    }

    fn reject(
        &self,
        type_name: &str,
        reason: &str,
    ) {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        FAILOVER_MESSAGES_REJECTED
            .with_label_values(&[type_name, reason])
            .inc();
    }
}
