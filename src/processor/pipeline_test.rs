use std::sync::Arc;

use super::*;
use crate::test_utils::enable_logger;
use crate::test_utils::ip;
use crate::test_utils::leased;
use crate::test_utils::PipelineHarness;
use crate::BackupState;
use crate::FailoverMessage;
use crate::FsmState;
use crate::MemLeaseManager;
use crate::MessageType;
use crate::PrimaryState;
use crate::Role;

#[test]
fn every_known_type_has_a_matching_processor() {
    for message_type in MessageType::KNOWN {
        let processor = processor_for(message_type)
            .unwrap_or_else(|| panic!("no processor for {}", message_type));
        assert_eq!(processor.message_type(), message_type);
    }
    assert!(processor_for(MessageType::Unknown(42)).is_none());
}

#[tokio::test]
async fn message_from_a_stranger_never_reaches_a_processor() {
    enable_logger();
    let (backup, leases) = PipelineHarness::with_mem_leases(
        Role::Backup,
        Some(FsmState::Backup(BackupState::Polling)),
    )
    .await;

    let msg = FailoverMessage::binding(crate::BindingOp::Add, 7, crate::Binding::for_lease(leased("10.0.0.7")));
    let reply = backup.pipeline.handle(backup.from_ip(msg, ip("10.9.9.9"))).await;

    assert!(reply.is_none());
    assert!(leases.is_empty());
    let counts = backup.pipeline.stats();
    assert_eq!(counts.received, 1);
    assert_eq!(counts.processed, 0);
    assert_eq!(counts.rejected, 1);
    assert_eq!(backup.fsm.state(), FsmState::Backup(BackupState::Polling));
}

#[tokio::test]
async fn message_without_a_source_is_rejected() {
    enable_logger();
    let (primary, _leases) = PipelineHarness::with_mem_leases(Role::Primary, None).await;

    let poll = FailoverMessage::opaque(MessageType::Poll, 1, "BACKUP_POLLING");
    assert!(primary.pipeline.handle(poll).await.is_none());
    assert_eq!(primary.pipeline.stats().rejected, 1);
}

#[tokio::test]
async fn message_from_the_wrong_role_is_rejected() {
    enable_logger();
    let (backup, _leases) = PipelineHarness::with_mem_leases(
        Role::Backup,
        Some(FsmState::Backup(BackupState::Running)),
    )
    .await;

    // Only a Backup sends POLL.
    let poll = FailoverMessage::opaque(MessageType::Poll, 3, "BACKUP_RUNNING");
    assert!(backup.pipeline.handle(backup.from_peer(poll)).await.is_none());

    let counts = backup.pipeline.stats();
    assert_eq!(counts.rejected, 1);
    assert_eq!(counts.processed, 0);
    assert!(backup.sent.lock().is_empty());
}

#[tokio::test]
async fn unknown_type_produces_no_reply() {
    enable_logger();
    let (primary, _leases) = PipelineHarness::with_mem_leases(Role::Primary, None).await;

    let msg = FailoverMessage::opaque(MessageType::Unknown(99), 4, Vec::new());
    assert!(primary.pipeline.handle(primary.from_peer(msg)).await.is_none());
    assert_eq!(primary.pipeline.stats().rejected, 1);
    assert_eq!(primary.fsm.state(), FsmState::Primary(PrimaryState::Running));
}

#[tokio::test]
async fn control_ack_outside_returning_control_is_dropped() {
    enable_logger();
    let leases = Arc::new(MemLeaseManager::with_leases(vec![leased("10.0.0.9")]));
    let backup = PipelineHarness::start(
        Role::Backup,
        Some(FsmState::Backup(BackupState::Polling)),
        leases,
    )
    .await;

    let ack = FailoverMessage::opaque(MessageType::CtlAck, 5, Vec::new());
    assert!(backup.pipeline.handle(backup.from_peer(ack)).await.is_none());

    assert_eq!(backup.pipeline.stats().rejected, 1);
    assert_eq!(backup.fsm.state(), FsmState::Backup(BackupState::Polling));
}

#[tokio::test]
async fn failed_processing_still_runs_post_process() {
    enable_logger();
    let (primary, leases) = PipelineHarness::with_mem_leases(Role::Primary, None).await;

    let garbage = FailoverMessage::opaque(MessageType::BulkBndChg, 6, "not json");
    let reply = primary.pipeline.handle(primary.from_peer(garbage)).await;

    assert!(reply.is_none());
    assert!(leases.is_empty());
    // Left ReceivingUpdates even though nothing was applied.
    assert_eq!(primary.fsm.state(), FsmState::Primary(PrimaryState::Running));
    let counts = primary.pipeline.stats();
    assert_eq!(counts.processed, 1);
    assert_eq!(counts.replied, 0);
}

#[tokio::test]
async fn reply_is_sent_through_the_link() {
    enable_logger();
    let (primary, _leases) = PipelineHarness::with_mem_leases(Role::Primary, None).await;

    let poll = FailoverMessage::opaque(MessageType::Poll, 8, "BACKUP_POLLING");
    let reply = primary.pipeline.handle(primary.from_peer(poll)).await.unwrap();

    assert_eq!(reply.message_type, MessageType::PollReply);
    assert_eq!(reply.transaction_id, 8);
    assert_eq!(primary.sent.lock().as_slice(), &[reply]);
    assert_eq!(primary.pipeline.stats().replied, 1);
}
