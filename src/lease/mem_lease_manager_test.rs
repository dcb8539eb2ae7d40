use std::net::IpAddr;

use super::*;
use crate::test_utils::ip;
use crate::test_utils::leased;
use crate::Error;
use crate::LeaseError;
use crate::SystemError;

#[tokio::test]
async fn upsert_twice_keeps_single_record_with_last_value() {
    let mgr = MemLeaseManager::new();
    let mut lease = leased("10.0.0.5");
    mgr.upsert_lease(&lease).await.unwrap();
    lease.mark_synced();
    mgr.upsert_lease(&lease).await.unwrap();
    mgr.upsert_lease(&lease).await.unwrap();

    assert_eq!(mgr.len(), 1);
    assert!(mgr.get(&ip("10.0.0.5")).unwrap().is_synced());
}

#[tokio::test]
async fn insert_rejects_duplicate_address() {
    let mgr = MemLeaseManager::with_leases(vec![leased("10.0.0.5")]);
    let err = mgr.insert_lease(&leased("10.0.0.5")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::System(SystemError::Lease(LeaseError::AlreadyExists(_)))
    ));
}

#[tokio::test]
async fn find_leases_filters_range_and_sync_state() {
    let mut synced = leased("10.0.0.2");
    synced.mark_synced();
    let mgr = MemLeaseManager::with_leases(vec![
        leased("10.0.0.1"),
        synced,
        leased("10.0.0.3"),
        leased("10.0.1.1"),
    ]);

    let all = mgr
        .find_leases(ip("10.0.0.0"), ip("10.0.0.255"), false)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);

    let unsynced: Vec<IpAddr> = mgr
        .find_leases(ip("10.0.0.0"), ip("10.0.0.255"), true)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.ip_address)
        .collect();
    assert_eq!(unsynced, vec![ip("10.0.0.1"), ip("10.0.0.3")]);

    let inverted = mgr
        .find_leases(ip("10.0.0.255"), ip("10.0.0.0"), false)
        .await
        .unwrap();
    assert!(inverted.is_empty());
}

#[tokio::test]
async fn apply_binding_delete_removes_leases() {
    let mgr = MemLeaseManager::with_leases(vec![leased("10.0.0.7")]);
    let binding = Binding::for_lease(leased("10.0.0.7"));
    mgr.apply_binding(BindingOp::Delete, &binding).await.unwrap();
    assert!(mgr.is_empty());
}

#[tokio::test]
async fn apply_binding_without_leases_fails() {
    let mgr = MemLeaseManager::new();
    let mut binding = Binding::for_lease(leased("10.0.0.7"));
    binding.leases.clear();
    assert!(mgr.apply_binding(BindingOp::Add, &binding).await.is_err());
}

#[test]
fn same_lease_ignores_peer_state() {
    let a = leased("10.0.0.9");
    let mut b = a.clone();
    b.mark_synced();
    assert!(a.same_lease(&b));

    b.state = LeaseState::Released;
    assert!(!a.same_lease(&b));
}
