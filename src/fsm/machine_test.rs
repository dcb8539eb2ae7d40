use super::*;
use crate::test_utils::leased;
use crate::AwaitPolicies;
use crate::AwaitPolicy;
use crate::Binding;
use crate::BindingOp;
use crate::FailoverMessage;
use crate::MessageType;

fn policies(fail_limit: u32) -> AwaitPolicies {
    let policy = AwaitPolicy {
        timeout_ms: 100,
        fail_limit,
    };
    AwaitPolicies {
        bind_ack: policy,
        control_return: policy,
        poll_reply: policy,
        bulk_ack: policy,
    }
}

fn received(message_type: MessageType) -> Input {
    Input::Received(FailoverMessage::opaque(message_type, 1, Vec::new()))
}

fn binding_update() -> FailoverMessage {
    FailoverMessage::binding(BindingOp::Add, 77, Binding::for_lease(leased("10.0.0.5")))
}

fn sent_types(step: &Step<impl RoleTable>) -> Vec<MessageType> {
    step.actions
        .iter()
        .filter_map(|a| match a {
            Action::Send(msg) => Some(msg.message_type),
            _ => None,
        })
        .collect()
}

fn armed(step: &Step<impl RoleTable>) -> bool {
    step.actions.iter().any(|a| matches!(a, Action::Arm(..)))
}

fn every_input() -> Vec<Input> {
    let mut inputs = vec![
        Input::Start,
        Input::PollTick,
        Input::RequestControl,
        Input::SendBinding(binding_update()),
        Input::ControlAcked {
            bulk_changes: Vec::new(),
        },
        Input::ControlAcked {
            bulk_changes: b"[]".to_vec(),
        },
        Input::UpdatesApplied,
        received(MessageType::Unknown(99)),
    ];
    inputs.extend(MessageType::KNOWN.iter().map(|t| received(*t)));
    inputs.extend(MessageType::KNOWN.iter().map(|t| Input::SendFailed(*t)));
    inputs.extend(AwaitKind::ALL.iter().map(|k| Input::Timeout(*k)));
    inputs
}

fn assert_closed_under_inputs<S: RoleTable>() {
    for state in S::all() {
        for input in every_input() {
            let mut machine = StateMachine::new(*state, &policies(3));
            let step = machine.step(input.clone());
            assert!(
                S::all().contains(&step.to),
                "{:?} + {} left the state set",
                state,
                input.name()
            );
            if !step.accepted {
                assert_eq!(step.to, *state);
                assert!(step.actions.is_empty());
            }
        }
    }
}

#[test]
fn every_state_input_pair_stays_within_role_states() {
    assert_closed_under_inputs::<PrimaryState>();
    assert_closed_under_inputs::<BackupState>();
}

#[test]
fn names_round_trip_for_both_roles() {
    for state in PrimaryState::all() {
        assert_eq!(PrimaryState::from_name(state.name()), Some(*state));
        assert!(state.name().starts_with("PRIMARY_"));
    }
    for state in BackupState::all() {
        assert_eq!(BackupState::from_name(state.name()), Some(*state));
        assert!(state.name().starts_with("BACKUP_"));
    }
    assert_eq!(PrimaryState::from_name("BACKUP_RUNNING"), None);
}

#[test]
fn primary_starts_running_without_the_peer() {
    let mut machine = StateMachine::new(PrimaryState::Init, &policies(3));
    let step = machine.step(Input::Start);
    assert_eq!(step.to, PrimaryState::Running);
    assert!(step.actions.is_empty());
}

#[test]
fn poll_reply_fallback_happens_at_fail_limit_and_not_before() {
    // Backup polls; after 3 missed replies it operates on its own.
    let mut machine = StateMachine::new(BackupState::Polling, &policies(3));
    let step = machine.step(Input::PollTick);
    assert_eq!(step.to, BackupState::AwaitingPollReply);
    assert_eq!(sent_types(&step), vec![MessageType::Poll]);
    assert!(armed(&step));

    for _ in 0..2 {
        let step = machine.step(Input::Timeout(AwaitKind::PollReply));
        assert_eq!(step.to, BackupState::AwaitingPollReply);
        assert_eq!(sent_types(&step), vec![MessageType::Poll]);
        assert!(armed(&step));
    }
    assert_eq!(machine.waits().counter(AwaitKind::PollReply).unwrap().count(), 2);

    let step = machine.step(Input::Timeout(AwaitKind::PollReply));
    assert_eq!(step.from, BackupState::AwaitingPollReply);
    assert_eq!(step.to, BackupState::Running);
    assert!(!armed(&step));
    assert_eq!(machine.waits().awaiting(), None);
    assert!(!machine.waits().peer_reachable());
    assert_eq!(machine.waits().counter(AwaitKind::PollReply).unwrap().count(), 0);
}

#[test]
fn bind_ack_fallback_does_not_resend() {
    let mut machine = StateMachine::new(PrimaryState::Running, &policies(2));
    let step = machine.step(Input::SendBinding(binding_update()));
    assert_eq!(step.to, PrimaryState::AwaitingBindAck);
    assert_eq!(sent_types(&step), vec![MessageType::BndAdd]);

    let step = machine.step(Input::Timeout(AwaitKind::BindAck));
    assert_eq!(step.to, PrimaryState::AwaitingBindAck);
    assert!(sent_types(&step).is_empty());
    assert!(armed(&step));

    let step = machine.step(Input::Timeout(AwaitKind::BindAck));
    assert_eq!(step.to, PrimaryState::Running);
}

#[test]
fn reply_after_fallback_is_ignored() {
    let mut machine = StateMachine::new(PrimaryState::Running, &policies(1));
    machine.step(Input::SendBinding(binding_update()));
    let step = machine.step(Input::Timeout(AwaitKind::BindAck));
    assert_eq!(step.to, PrimaryState::Running);

    let step = machine.step(received(MessageType::BndAck));
    assert!(!step.accepted);
    assert_eq!(step.to, PrimaryState::Running);
    assert!(step.resolved.is_none());
}

#[test]
fn poll_reply_resolves_wait_and_returns_request() {
    let mut machine = StateMachine::new(BackupState::Init, &policies(3));
    machine.step(Input::PollTick);
    machine.step(Input::Timeout(AwaitKind::PollReply));

    let step = machine.step(received(MessageType::PollReply));
    assert_eq!(step.to, BackupState::Polling);
    assert!(step.actions.contains(&Action::Disarm));
    assert_eq!(step.resolved.map(|m| m.message_type), Some(MessageType::Poll));
    assert!(machine.waits().peer_reachable());
    assert_eq!(machine.waits().counter(AwaitKind::PollReply).unwrap().count(), 0);
}

#[test]
fn stale_timeout_is_ignored() {
    let mut machine = StateMachine::new(BackupState::Polling, &policies(3));
    let step = machine.step(Input::Timeout(AwaitKind::PollReply));
    assert!(!step.accepted);

    machine.step(Input::PollTick);
    let step = machine.step(Input::Timeout(AwaitKind::BulkAck));
    assert!(!step.accepted);
    assert_eq!(machine.waits().awaiting(), Some(AwaitKind::PollReply));
}

#[test]
fn poll_tick_does_not_replace_outstanding_poll() {
    let mut machine = StateMachine::new(BackupState::Polling, &policies(3));
    machine.step(Input::PollTick);

    let step = machine.step(Input::PollTick);
    assert!(!step.accepted);
    assert!(step.actions.is_empty());
}

#[test]
fn second_binding_replaces_wait_and_keeps_count() {
    let mut machine = StateMachine::new(PrimaryState::Running, &policies(3));
    machine.step(Input::SendBinding(binding_update()));
    machine.step(Input::Timeout(AwaitKind::BindAck));

    let step = machine.step(Input::SendBinding(binding_update()));
    assert_eq!(step.to, PrimaryState::AwaitingBindAck);
    assert_eq!(sent_types(&step), vec![MessageType::BndAdd]);
    assert!(armed(&step));
    assert_eq!(machine.waits().counter(AwaitKind::BindAck).unwrap().count(), 1);

    machine.step(Input::Timeout(AwaitKind::BindAck));
    let step = machine.step(Input::Timeout(AwaitKind::BindAck));
    assert_eq!(step.to, PrimaryState::Running);
}

#[test]
fn bind_ack_resolves_the_binding_that_was_sent() {
    let mut machine = StateMachine::new(PrimaryState::Running, &policies(3));
    machine.step(Input::SendBinding(binding_update()));

    let step = machine.step(received(MessageType::BndNak));
    assert_eq!(step.to, PrimaryState::Running);
    let resolved = step.resolved.unwrap();
    assert_eq!(resolved.transaction_id, 77);
    assert!(resolved.payload.binding().is_some());
}

#[test]
fn control_request_resends_until_fallback() {
    let mut machine = StateMachine::new(PrimaryState::Running, &policies(2));
    let step = machine.step(Input::RequestControl);
    assert_eq!(step.to, PrimaryState::RequestingControl);
    assert_eq!(sent_types(&step), vec![MessageType::CtlReq]);

    let step = machine.step(Input::Timeout(AwaitKind::ControlReturn));
    assert_eq!(step.to, PrimaryState::RequestingControl);
    assert_eq!(sent_types(&step), vec![MessageType::CtlReq]);

    let step = machine.step(Input::Timeout(AwaitKind::ControlReturn));
    assert_eq!(step.to, PrimaryState::Running);
}

#[test]
fn control_return_completes_request() {
    let mut machine = StateMachine::new(PrimaryState::Running, &policies(3));
    machine.step(Input::RequestControl);
    let step = machine.step(received(MessageType::CtlRet));
    assert_eq!(step.to, PrimaryState::Running);
    assert_eq!(step.resolved.map(|m| m.message_type), Some(MessageType::CtlReq));
}

#[test]
fn backup_hands_control_back_with_bulk_changes() {
    let mut machine = StateMachine::new(BackupState::Running, &policies(3));
    let step = machine.step(received(MessageType::CtlReq));
    assert_eq!(step.to, BackupState::ReturningControl);
    assert!(machine.waits().peer_reachable());

    let step = machine.step(Input::ControlAcked {
        bulk_changes: b"[{}]".to_vec(),
    });
    assert_eq!(step.to, BackupState::BulkBindingsSent);
    assert_eq!(sent_types(&step), vec![MessageType::BulkBndChg]);

    let step = machine.step(received(MessageType::BulkBndAck));
    assert_eq!(step.to, BackupState::Polling);
    assert_eq!(
        step.resolved.map(|m| m.payload.as_bytes().to_vec()),
        Some(b"[{}]".to_vec())
    );
}

#[test]
fn backup_with_nothing_to_hand_back_resumes_polling() {
    let mut machine = StateMachine::new(BackupState::ReturningControl, &policies(3));
    let step = machine.step(Input::ControlAcked {
        bulk_changes: Vec::new(),
    });
    assert_eq!(step.to, BackupState::Polling);
    assert!(step.actions.is_empty());
}

#[test]
fn bulk_ack_timeout_falls_back_to_polling() {
    let mut machine = StateMachine::new(BackupState::ReturningControl, &policies(1));
    machine.step(Input::ControlAcked {
        bulk_changes: b"[]".to_vec(),
    });
    let step = machine.step(Input::Timeout(AwaitKind::BulkAck));
    assert_eq!(step.to, BackupState::Polling);
}

#[test]
fn control_request_cancels_outstanding_poll() {
    let mut machine = StateMachine::new(BackupState::Polling, &policies(3));
    machine.step(Input::PollTick);
    let step = machine.step(received(MessageType::CtlReq));
    assert_eq!(step.to, BackupState::ReturningControl);
    assert!(step.actions.contains(&Action::Disarm));
    assert_eq!(machine.waits().awaiting(), None);
}

#[test]
fn running_backup_polls_without_waiting() {
    let mut machine = StateMachine::new(BackupState::Running, &policies(3));
    let step = machine.step(Input::PollTick);
    assert_eq!(step.to, BackupState::Running);
    assert_eq!(sent_types(&step), vec![MessageType::Poll]);
    assert!(!armed(&step));

    let step = machine.step(received(MessageType::PollReply));
    assert!(step.accepted);
    assert_eq!(step.to, BackupState::Running);
    assert!(machine.waits().peer_reachable());
}

#[test]
fn unsendable_polls_count_towards_fallback() {
    let mut machine = StateMachine::new(BackupState::Polling, &policies(2));
    machine.step(Input::PollTick);
    let step = machine.step(Input::SendFailed(MessageType::Poll));
    assert_eq!(step.to, BackupState::PollingFailure);
    assert!(step.actions.contains(&Action::Disarm));

    let step = machine.step(Input::PollTick);
    assert_eq!(step.to, BackupState::AwaitingPollReply);
    let step = machine.step(Input::SendFailed(MessageType::Poll));
    assert_eq!(step.to, BackupState::Running);
}

#[test]
fn primary_applies_bulk_updates_then_runs() {
    let mut machine = StateMachine::new(PrimaryState::Running, &policies(3));
    let step = machine.step(received(MessageType::BulkBndChg));
    assert_eq!(step.to, PrimaryState::ReceivingUpdates);
    let step = machine.step(Input::UpdatesApplied);
    assert_eq!(step.to, PrimaryState::Running);
}

#[test]
fn init_primary_ignores_peer_messages() {
    let mut machine = StateMachine::new(PrimaryState::Init, &policies(3));
    for message_type in MessageType::KNOWN {
        assert!(!machine.step(received(message_type)).accepted);
    }
}

#[test]
fn recovery_maps_transient_states_to_stable_ones() {
    use crate::FsmState;

    assert_eq!(
        initial_state::<BackupState>(Some(FsmState::Backup(BackupState::AwaitingPollReply))),
        BackupState::Polling
    );
    assert_eq!(
        initial_state::<BackupState>(Some(FsmState::Backup(BackupState::Running))),
        BackupState::Running
    );
    assert_eq!(
        initial_state::<PrimaryState>(Some(FsmState::Primary(PrimaryState::AwaitingBindAck))),
        PrimaryState::Running
    );
    assert_eq!(
        initial_state::<PrimaryState>(Some(FsmState::Backup(BackupState::Running))),
        PrimaryState::Init
    );
    assert_eq!(initial_state::<BackupState>(None), BackupState::Init);
}
