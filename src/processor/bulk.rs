use tonic::async_trait;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::MessageProcessor;
use super::ProcessContext;
use crate::decode_leases;
use crate::FailoverMessage;
use crate::FsmState;
use crate::Input;
use crate::MessageType;
use crate::PrimaryState;
use crate::Result;

/// BULKBNDCHG on the Primary: upserts every lease the Backup hands back,
/// marked synced, then answers BULKBNDACK.
pub struct BulkBindingChangeProcessor;

#[async_trait]
impl MessageProcessor for BulkBindingChangeProcessor {
    fn message_type(&self) -> MessageType {
        MessageType::BulkBndChg
    }

    async fn pre_process(
        &self,
        ctx: &ProcessContext,
        _msg: &FailoverMessage,
    ) -> bool {
        matches!(
            ctx.fsm.state(),
            FsmState::Primary(PrimaryState::Running | PrimaryState::ReceivingUpdates)
        )
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        msg: &FailoverMessage,
    ) -> Result<Option<FailoverMessage>> {
        let outcome = ctx.fsm.submit(Input::Received(msg.clone())).await?;
        if !outcome.accepted {
            return Ok(None);
        }

        let leases = decode_leases(msg.payload.as_bytes())?;
        for mut lease in leases.iter().cloned() {
            lease.mark_synced();
            ctx.leases.upsert_lease(&lease).await?;
        }
        info!("applied {} lease(s) handed back by backup", leases.len());
        Ok(Some(msg.reply(MessageType::BulkBndAck, Vec::new())))
    }

    async fn post_process(
        &self,
        ctx: &ProcessContext,
        _msg: &FailoverMessage,
        reply: Option<FailoverMessage>,
    ) -> Option<FailoverMessage> {
        if let Err(e) = ctx.fsm.submit(Input::UpdatesApplied).await {
            error!("failed to leave receiving updates: {:?}", e);
        }
        reply
    }
}

/// BULKBNDACK on the Backup: the leases it handed back are now synced.
pub struct BulkBindingAckProcessor;

#[async_trait]
impl MessageProcessor for BulkBindingAckProcessor {
    fn message_type(&self) -> MessageType {
        MessageType::BulkBndAck
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        msg: &FailoverMessage,
    ) -> Result<Option<FailoverMessage>> {
        let outcome = ctx.fsm.submit(Input::Received(msg.clone())).await?;
        let Some(request) = outcome.resolved.filter(|_| outcome.accepted) else {
            debug!("bulk ack xid={} matched no outstanding hand-back", msg.transaction_id);
            return Ok(None);
        };

        let leases = decode_leases(request.payload.as_bytes())?;
        for lease in &leases {
            ctx.leases
                .set_ha_peer_state(lease.ip_address, Some(lease.state))
                .await?;
        }
        debug!("{} handed-back lease(s) confirmed", leases.len());
        Ok(None)
    }
}
