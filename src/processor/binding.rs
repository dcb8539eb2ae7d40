use tonic::async_trait;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::MessageProcessor;
use super::ProcessContext;
use crate::BindingOp;
use crate::FailoverMessage;
use crate::Input;
use crate::MessageType;
use crate::Result;

/// BNDADD, BNDUPD and BNDDEL on the Backup: applies the binding through the
/// lease manager and answers BNDACK, or BNDNAK when the manager fails.
pub struct BindingUpdateProcessor {
    pub op: BindingOp,
}

#[async_trait]
impl MessageProcessor for BindingUpdateProcessor {
    fn message_type(&self) -> MessageType {
        MessageType::for_binding_op(self.op)
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        msg: &FailoverMessage,
    ) -> Result<Option<FailoverMessage>> {
        ctx.fsm.notify(Input::Received(msg.clone()))?;

        let Some(binding) = msg.payload.binding() else {
            warn!("{} xid={} carries no binding", msg.message_type, msg.transaction_id);
            return Ok(Some(msg.reply(MessageType::BndNak, Vec::new())));
        };

        // What the Primary sent is what the Primary holds.
        let mut binding = binding.clone();
        binding.leases.iter_mut().for_each(|lease| lease.mark_synced());

        match ctx.leases.apply_binding(self.op, &binding).await {
            Ok(()) => {
                debug!(
                    "applied {:?} for {} lease(s) on link {:?}",
                    self.op,
                    binding.leases.len(),
                    binding.link
                );
                Ok(Some(msg.reply(MessageType::BndAck, Vec::new())))
            }
            Err(e) => {
                error!("lease manager rejected {:?} binding: {:?}", self.op, e);
                Ok(Some(msg.reply(MessageType::BndNak, Vec::new())))
            }
        }
    }
}

/// BNDACK and BNDNAK on the Primary. An ack marks every lease of the
/// acknowledged binding synced; a nak leaves them unknown. An ack for a
/// binding other than the outstanding one marks nothing, since the leases
/// of the outstanding binding are still unconfirmed.
pub struct BindReplyProcessor {
    pub acked: bool,
}

#[async_trait]
impl MessageProcessor for BindReplyProcessor {
    fn message_type(&self) -> MessageType {
        if self.acked {
            MessageType::BndAck
        } else {
            MessageType::BndNak
        }
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        msg: &FailoverMessage,
    ) -> Result<Option<FailoverMessage>> {
        let outcome = ctx.fsm.submit(Input::Received(msg.clone())).await?;
        if !outcome.accepted {
            debug!("{} xid={} arrived with no binding outstanding", msg.message_type, msg.transaction_id);
            return Ok(None);
        }

        let Some(request) = outcome.resolved.as_ref() else {
            return Ok(None);
        };
        if self.acked && request.transaction_id != msg.transaction_id {
            warn!(
                "{} xid={} does not answer outstanding xid={}, leaving leases unknown",
                msg.message_type, msg.transaction_id, request.transaction_id
            );
            return Ok(None);
        }
        let Some(binding) = request.payload.binding() else {
            return Ok(None);
        };
        for lease in &binding.leases {
            let peer_state = self.acked.then_some(lease.state);
            ctx.leases.set_ha_peer_state(lease.ip_address, peer_state).await?;
        }
        Ok(None)
    }
}
