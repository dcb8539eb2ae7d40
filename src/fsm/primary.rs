use super::AwaitKind;
use super::Input;
use super::RoleTable;
use super::WaitTracker;
use crate::FsmState;
use crate::MessageType;
use crate::PrimaryState;
use crate::Role;

impl RoleTable for PrimaryState {
    const ROLE: Role = Role::Primary;

    fn initial() -> Self {
        PrimaryState::Init
    }

    fn all() -> &'static [Self] {
        &[
            PrimaryState::Init,
            PrimaryState::Running,
            PrimaryState::AwaitingBindAck,
            PrimaryState::RequestingControl,
            PrimaryState::ReceivingUpdates,
        ]
    }

    fn name(self) -> &'static str {
        match self {
            PrimaryState::Init => "PRIMARY_INIT",
            PrimaryState::Running => "PRIMARY_RUNNING",
            PrimaryState::AwaitingBindAck => "PRIMARY_AWAITING_BIND_ACK",
            PrimaryState::RequestingControl => "PRIMARY_REQUESTING_CONTROL",
            PrimaryState::ReceivingUpdates => "PRIMARY_RECEIVING_UPDATES",
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
        use PrimaryState::*;

        match (self, input) {
            (Init, Input::Start) => Some(Running),
            (_, Input::Start) => Some(self),

            (Running | RequestingControl, Input::RequestControl) => {
                waits.request(MessageType::CtlReq, Vec::new(), AwaitKind::ControlReturn);
                Some(RequestingControl)
            }

            (Running | AwaitingBindAck, Input::SendBinding(msg)) => {
                waits.request_message(msg.clone(), AwaitKind::BindAck);
                Some(AwaitingBindAck)
            }

            (Running | ReceivingUpdates, Input::UpdatesApplied) => Some(Running),

            (Init, Input::Received(_)) => None,
            (_, Input::Received(msg)) => match (self, msg.message_type) {
                (AwaitingBindAck, MessageType::BndAck | MessageType::BndNak) => {
                    waits.resolve(AwaitKind::BindAck).then_some(Running)
                }
                (RequestingControl, MessageType::CtlRet) => {
                    waits.resolve(AwaitKind::ControlReturn).then_some(Running)
                }
                (Running | ReceivingUpdates, MessageType::BulkBndChg) => {
                    waits.peer_seen();
                    Some(ReceivingUpdates)
                }
                (_, MessageType::Poll) => {
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
            AwaitKind::BindAck | AwaitKind::ControlReturn => PrimaryState::Running,
            AwaitKind::PollReply | AwaitKind::BulkAck => self,
        }
    }

    fn recover(self) -> Self {
        match self {
            PrimaryState::Init => PrimaryState::Init,
            _ => PrimaryState::Running,
        }
    }

    fn into_fsm_state(self) -> FsmState {
        FsmState::Primary(self)
    }
}
