use tonic::async_trait;
use tracing::debug;
use tracing::info;

use super::MessageProcessor;
use super::ProcessContext;
use crate::encode_leases;
use crate::BackupState;
use crate::FailoverMessage;
use crate::FsmState;
use crate::Input;
use crate::MessageType;
use crate::PrimaryState;
use crate::Result;

/// CTLREQ on the Backup: stop acting on its own and return control.
pub struct ControlRequestProcessor;

#[async_trait]
impl MessageProcessor for ControlRequestProcessor {
    fn message_type(&self) -> MessageType {
        MessageType::CtlReq
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        msg: &FailoverMessage,
    ) -> Result<Option<FailoverMessage>> {
        let outcome = ctx.fsm.submit(Input::Received(msg.clone())).await?;
        if outcome.to != FsmState::Backup(BackupState::ReturningControl) {
            return Ok(None);
        }
        info!("returning control to primary (was {})", outcome.from);
        Ok(Some(msg.reply(MessageType::CtlRet, Vec::new())))
    }
}

/// CTLRET on the Primary. Acknowledged with CTLACK once the Primary runs,
/// including when the control request already fell back: the Backup is
/// waiting for the ack to hand its leases over.
pub struct ControlReturnProcessor;

#[async_trait]
impl MessageProcessor for ControlReturnProcessor {
    fn message_type(&self) -> MessageType {
        MessageType::CtlRet
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        msg: &FailoverMessage,
    ) -> Result<Option<FailoverMessage>> {
        let outcome = ctx.fsm.submit(Input::Received(msg.clone())).await?;
        if outcome.to != FsmState::Primary(PrimaryState::Running) {
            debug!("control return ignored in {}", outcome.to);
            return Ok(None);
        }
        Ok(Some(msg.reply(MessageType::CtlAck, Vec::new())))
    }
}

/// CTLACK on the Backup: hands back every lease the Primary may not have.
pub struct ControlAckProcessor;

#[async_trait]
impl MessageProcessor for ControlAckProcessor {
    fn message_type(&self) -> MessageType {
        MessageType::CtlAck
    }

    async fn pre_process(
        &self,
        ctx: &ProcessContext,
        _msg: &FailoverMessage,
    ) -> bool {
        ctx.fsm.state() == FsmState::Backup(BackupState::ReturningControl)
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        _msg: &FailoverMessage,
    ) -> Result<Option<FailoverMessage>> {
        let mut unsynced = Vec::new();
        for link in ctx.links.links() {
            unsynced.extend(ctx.leases.find_leases(link.start, link.end, true).await?);
        }

        let bulk_changes = if unsynced.is_empty() {
            Vec::new()
        } else {
            encode_leases(&unsynced)?
        };
        info!("control acknowledged, handing back {} lease(s)", unsynced.len());
        ctx.fsm.submit(Input::ControlAcked { bulk_changes }).await?;
        Ok(None)
    }
}
