use tonic::async_trait;
use tracing::debug;
use tracing::info;

use super::MessageProcessor;
use super::ProcessContext;
use crate::BackupState;
use crate::FailoverMessage;
use crate::FsmState;
use crate::Input;
use crate::MessageType;
use crate::PrimaryState;
use crate::Result;

/// POLL on the Primary. Answers with the Primary's state. A poll from a
/// Backup that is running on its own is the Backup asking the Primary to
/// take control back.
pub struct PollProcessor;

#[async_trait]
impl MessageProcessor for PollProcessor {
    fn message_type(&self) -> MessageType {
        MessageType::Poll
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        msg: &FailoverMessage,
    ) -> Result<Option<FailoverMessage>> {
        let outcome = ctx.fsm.submit(Input::Received(msg.clone())).await?;

        let backup_state = msg.payload_text().and_then(|text| text.parse::<FsmState>().ok());
        if backup_state == Some(FsmState::Backup(BackupState::Running))
            && outcome.to == FsmState::Primary(PrimaryState::Running)
        {
            info!("backup is running on its own, requesting control");
            ctx.fsm.request_control().await?;
        }

        let state = ctx.fsm.state();
        debug!("answering poll xid={} with {}", msg.transaction_id, state);
        Ok(Some(msg.reply(MessageType::PollReply, state.name())))
    }
}

/// POLLREPLY on the Backup.
pub struct PollReplyProcessor;

#[async_trait]
impl MessageProcessor for PollReplyProcessor {
    fn message_type(&self) -> MessageType {
        MessageType::PollReply
    }

    async fn process(
        &self,
        ctx: &ProcessContext,
        msg: &FailoverMessage,
    ) -> Result<Option<FailoverMessage>> {
        let outcome = ctx.fsm.submit(Input::Received(msg.clone())).await?;
        if !outcome.accepted {
            debug!("late poll reply xid={} ignored in {}", msg.transaction_id, outcome.from);
        }
        Ok(None)
    }
}
