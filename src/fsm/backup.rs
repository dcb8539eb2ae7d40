use super::AwaitKind;
use super::Input;
use super::RoleTable;
use super::WaitTracker;
use crate::BackupState;
use crate::FsmState;
use crate::MessageType;
use crate::Role;

impl RoleTable for BackupState {
    const ROLE: Role = Role::Backup;

    fn initial() -> Self {
        BackupState::Init
    }

    fn all() -> &'static [Self] {
        &[
            BackupState::Init,
            BackupState::Polling,
            BackupState::AwaitingPollReply,
            BackupState::PollingFailure,
            BackupState::Running,
            BackupState::ReturningControl,
            BackupState::BulkBindingsSent,
        ]
    }

    fn name(self) -> &'static str {
        match self {
            BackupState::Init => "BACKUP_INIT",
            BackupState::Polling => "BACKUP_POLLING",
            BackupState::AwaitingPollReply => "BACKUP_AWAITING_POLL_REPLY",
            BackupState::PollingFailure => "BACKUP_POLLING_FAILURE",
            BackupState::Running => "BACKUP_RUNNING",
            BackupState::ReturningControl => "BACKUP_RETURNING_CONTROL",
            BackupState::BulkBindingsSent => "BACKUP_BULK_BINDINGS_SENT",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.name() == name)
    }

    fn on_input(
        self,
        input: &Input,
        waits: &mut WaitTracker,
    ) -> Option<Self> {
        use BackupState::*;

        match (self, input) {
            (_, Input::Start) => Some(self),

            // An outstanding poll keeps its own timer; ticks do not replace it.
            (Init | Polling | PollingFailure, Input::PollTick) => {
                waits.request(
                    MessageType::Poll,
                    self.name().as_bytes().to_vec(),
                    AwaitKind::PollReply,
                );
                Some(AwaitingPollReply)
            }
            (Running, Input::PollTick) => {
                waits.send(MessageType::Poll, self.name().as_bytes().to_vec());
                Some(Running)
            }

            (AwaitingPollReply, Input::SendFailed(MessageType::Poll)) => {
                if waits.fail_wait(AwaitKind::PollReply) {
                    Some(Running)
                } else {
                    Some(PollingFailure)
                }
            }

            (ReturningControl, Input::ControlAcked { bulk_changes }) => {
                if bulk_changes.is_empty() {
                    Some(Polling)
                } else {
                    waits.request(MessageType::BulkBndChg, bulk_changes.clone(), AwaitKind::BulkAck);
                    Some(BulkBindingsSent)
                }
            }

            (_, Input::Received(msg)) => match (self, msg.message_type) {
                (AwaitingPollReply, MessageType::PollReply) => {
                    waits.resolve(AwaitKind::PollReply).then_some(Polling)
                }
                (Running, MessageType::PollReply) => {
                    waits.peer_seen();
                    Some(Running)
                }
                (_, MessageType::CtlReq) => {
                    waits.cancel_wait();
                    waits.peer_seen();
                    Some(ReturningControl)
                }
                (BulkBindingsSent, MessageType::BulkBndAck) => {
                    waits.resolve(AwaitKind::BulkAck).then_some(Polling)
                }
                (_, MessageType::BndAdd | MessageType::BndUpd | MessageType::BndDel) => {
                    waits.peer_seen();
                    Some(self)
                }
                _ => None,
            },

            _ => None,
        }
    }

    fn fallback(
        self,
        kind: AwaitKind,
    ) -> Self {
        match kind {
            AwaitKind::PollReply => BackupState::Running,
            AwaitKind::BulkAck => BackupState::Polling,
            AwaitKind::BindAck | AwaitKind::ControlReturn => self,
        }
    }

    fn recover(self) -> Self {
        match self {
            BackupState::Init => BackupState::Init,
            BackupState::Running => BackupState::Running,
            _ => BackupState::Polling,
        }
    }

    fn into_fsm_state(self) -> FsmState {
        FsmState::Backup(self)
    }
}
