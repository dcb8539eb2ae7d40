use std::sync::Arc;

use tokio::sync::watch;

use crate::test_utils::enable_logger;
use crate::test_utils::ha_node_config;
use crate::test_utils::leased;
use crate::BackupState;
use crate::Error;
use crate::FsmState;
use crate::HaNodeBuilder;
use crate::MemLeaseManager;
use crate::MockPeerTransport;
use crate::PeerProtocol;
use crate::PeerTransport;
use crate::PrimaryState;
use crate::Role;
use crate::StateHistoryStore;
use crate::SystemError;

fn quiet_transport() -> Arc<dyn PeerTransport> {
    let mut transport = MockPeerTransport::new();
    transport.expect_get_peer_state().returning(|_| None);
    transport.expect_get_status().returning(|| None);
    Arc::new(transport)
}

#[tokio::test]
async fn test_build_seeds_history_and_starts_primary() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let config = ha_node_config(dir.path(), Role::Primary, PeerProtocol::Failover);
    let (_shutdown_tx, shutdown_rx) = watch::channel(());

    let node = HaNodeBuilder::from_config(config, shutdown_rx)
        .build()
        .await
        .unwrap()
        .ready()
        .unwrap();

    assert_eq!(node.role(), Role::Primary);
    let mut states = node.fsm().subscribe_state();
    states
        .wait_for(|s| *s == FsmState::Primary(PrimaryState::Running))
        .await
        .unwrap();

    assert_eq!(node.history().path(), dir.path().join("ha-state.json"));
    let recorded: Vec<String> = node.history().states().into_iter().map(|s| s.state).collect();
    assert_eq!(recorded, vec!["PRIMARY_INIT".to_string(), "PRIMARY_RUNNING".to_string()]);
    assert!(!node.server_is_ready());
}

#[tokio::test]
async fn test_build_resumes_recorded_backup_state() {
    enable_logger();
    let dir = tempfile::tempdir().unwrap();
    let history = StateHistoryStore::open(dir.path().join("ha-state.json"), 10).unwrap();
    history.update(FsmState::Backup(BackupState::Running)).unwrap();
    drop(history);

    let config = ha_node_config(dir.path(), Role::Backup, PeerProtocol::Rest);
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let node = HaNodeBuilder::from_config(config, shutdown_rx)
        .transport(quiet_transport())
        .build()
        .await
        .unwrap()
        .ready()
        .unwrap();

    // Running keeps polling without awaiting a reply.
    assert_eq!(node.state(), FsmState::Backup(BackupState::Running));
}

#[tokio::test]
async fn test_custom_lease_manager_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let config = ha_node_config(dir.path(), Role::Primary, PeerProtocol::Rest);
    let leases = Arc::new(MemLeaseManager::with_leases([leased("10.0.0.7")]));
    let (_shutdown_tx, shutdown_rx) = watch::channel(());

    let node = HaNodeBuilder::from_config(config, shutdown_rx)
        .lease_manager(leases.clone())
        .transport(quiet_transport())
        .build()
        .await
        .unwrap()
        .ready()
        .unwrap();

    let found = node.leases().find_lease(leased("10.0.0.7").ip_address).await.unwrap();
    assert!(found.is_some());
    assert_eq!(node.link_states().len(), 1);
}

#[tokio::test]
async fn test_unconfigured_role_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let config = ha_node_config(dir.path(), Role::NotConfigured, PeerProtocol::Failover);
    let (_shutdown_tx, shutdown_rx) = watch::channel(());

    let result = HaNodeBuilder::from_config(config, shutdown_rx).build().await;
    assert!(matches!(result, Err(Error::Config(_))));
    assert!(!dir.path().join("ha-state.json").exists());
}

#[tokio::test]
async fn test_peer_on_local_address_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ha_node_config(dir.path(), Role::Primary, PeerProtocol::Failover);
    config.ha.peer_address = "127.0.0.1".to_string();
    let (_shutdown_tx, shutdown_rx) = watch::channel(());

    let result = HaNodeBuilder::from_config(config, shutdown_rx).build().await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_ready_before_build_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = ha_node_config(dir.path(), Role::Primary, PeerProtocol::Failover);
    let (_shutdown_tx, shutdown_rx) = watch::channel(());

    let result = HaNodeBuilder::from_config(config, shutdown_rx).ready();
    assert!(matches!(
        result,
        Err(Error::System(SystemError::NodeStartFailed(_)))
    ));
}
