use std::sync::Arc;

use tokio::sync::oneshot;

use super::*;
use crate::test_utils::ip;
use crate::test_utils::leased;
use crate::LeaseState;
use crate::MemLeaseManager;

fn replicator(transport: MockPeerTransport) -> (LeaseReplicator, Arc<MemLeaseManager>) {
    let leases = Arc::new(MemLeaseManager::with_leases(vec![leased("10.0.0.5")]));
    (LeaseReplicator::new(Arc::new(transport), leases.clone()), leases)
}

#[tokio::test]
async fn identical_echo_marks_lease_synced() {
    let mut transport = MockPeerTransport::new();
    transport
        .expect_update_lease()
        .times(1)
        .returning(|lease| Some(lease.clone()));
    let (replicator, leases) = replicator(transport);

    assert!(replicator.replicate(&leased("10.0.0.5")).await);
    let stored = leases.get(&ip("10.0.0.5")).unwrap();
    assert_eq!(stored.ha_peer_state, Some(LeaseState::Leased));
}

#[tokio::test]
async fn mismatched_echo_leaves_lease_unknown() {
    let mut transport = MockPeerTransport::new();
    transport.expect_update_lease().returning(|lease| {
        let mut stored = lease.clone();
        stored.valid_end_time += 1;
        Some(stored)
    });
    let (replicator, leases) = replicator(transport);

    assert!(!replicator.replicate(&leased("10.0.0.5")).await);
    assert_eq!(leases.get(&ip("10.0.0.5")).unwrap().ha_peer_state, None);
}

#[tokio::test]
async fn transport_failure_clears_an_earlier_sync_mark() {
    let mut transport = MockPeerTransport::new();
    transport.expect_update_lease().returning(|_| None);
    let leases = Arc::new(MemLeaseManager::with_leases(vec![crate::test_utils::synced("10.0.0.5")]));
    let replicator = LeaseReplicator::new(Arc::new(transport), leases.clone());

    assert!(!replicator.replicate(&leased("10.0.0.5")).await);
    assert!(!leases.get(&ip("10.0.0.5")).unwrap().is_synced());
}

#[tokio::test]
async fn async_replication_reports_through_callback() {
    let mut transport = MockPeerTransport::new();
    transport.expect_update_lease().returning(|lease| Some(lease.clone()));
    let (replicator, leases) = replicator(transport);

    let (tx, rx) = oneshot::channel();
    let handle = replicator.replicate_async(
        leased("10.0.0.5"),
        Box::new(move |synced| {
            let _ = tx.send(synced);
        }),
    );

    assert!(rx.await.unwrap());
    handle.await.unwrap();
    assert!(leases.get(&ip("10.0.0.5")).unwrap().is_synced());
}
