use std::collections::BTreeMap;
use std::net::IpAddr;

use parking_lot::RwLock;
use tonic::async_trait;
use tracing::debug;

use super::Binding;
use super::BindingOp;
use super::DhcpLease;
use super::LeaseManager;
use super::LeaseState;
use crate::LeaseError;
use crate::Result;

/// In-memory lease store keyed by address.
///
/// Stands in for the server's lease DAO when the HA core runs on its own
/// (the bundled binary, tests).
#[derive(Debug, Default)]
pub struct MemLeaseManager {
    leases: RwLock<BTreeMap<IpAddr, DhcpLease>>,
}

impl MemLeaseManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_leases(leases: impl IntoIterator<Item = DhcpLease>) -> Self {
        let map = leases.into_iter().map(|l| (l.ip_address, l)).collect();
        Self {
            leases: RwLock::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.leases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.read().is_empty()
    }

    pub fn get(
        &self,
        ip: &IpAddr,
    ) -> Option<DhcpLease> {
        self.leases.read().get(ip).cloned()
    }
}

#[async_trait]
impl LeaseManager for MemLeaseManager {
    async fn find_lease(
        &self,
        ip: IpAddr,
    ) -> Result<Option<DhcpLease>> {
        Ok(self.get(&ip))
    }

    async fn insert_lease(
        &self,
        lease: &DhcpLease,
    ) -> Result<()> {
        let mut leases = self.leases.write();
        if leases.contains_key(&lease.ip_address) {
            return Err(LeaseError::AlreadyExists(lease.ip_address).into());
        }
        leases.insert(lease.ip_address, lease.clone());
        Ok(())
    }

    async fn upsert_lease(
        &self,
        lease: &DhcpLease,
    ) -> Result<DhcpLease> {
        self.leases.write().insert(lease.ip_address, lease.clone());
        Ok(lease.clone())
    }

    async fn delete_lease(
        &self,
        ip: IpAddr,
    ) -> Result<bool> {
        Ok(self.leases.write().remove(&ip).is_some())
    }

    async fn find_leases(
        &self,
        start: IpAddr,
        end: IpAddr,
        unsynced_only: bool,
    ) -> Result<Vec<DhcpLease>> {
        if start > end {
            return Ok(Vec::new());
        }
        let leases = self.leases.read();
        Ok(leases
            .range(start..=end)
            .map(|(_, l)| l)
            .filter(|l| !unsynced_only || !l.is_synced())
            .cloned()
            .collect())
    }

    async fn set_ha_peer_state(
        &self,
        ip: IpAddr,
        peer_state: Option<LeaseState>,
    ) -> Result<()> {
        match self.leases.write().get_mut(&ip) {
            Some(lease) => lease.ha_peer_state = peer_state,
            None => debug!("set_ha_peer_state: lease {} no longer present", ip),
        }
        Ok(())
    }

    async fn apply_binding(
        &self,
        op: BindingOp,
        binding: &Binding,
    ) -> Result<()> {
        if binding.leases.is_empty() {
            return Err(LeaseError::EmptyBinding.into());
        }
        let mut leases = self.leases.write();
        for lease in &binding.leases {
            match op {
                BindingOp::Add | BindingOp::Update => {
                    leases.insert(lease.ip_address, lease.clone());
                }
                BindingOp::Delete => {
                    leases.remove(&lease.ip_address);
                }
            }
        }
        Ok(())
    }
}
