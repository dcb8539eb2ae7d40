//! What this node serves to its peer: the REST surface (warp) and the
//! `dhcpha.HaService` gRPC surface (tonic). Both sit on the same [`HaApi`].

mod grpc_service;
mod rest_server;

pub use grpc_service::*;
pub use rest_server::*;


use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use tonic::async_trait;
use tracing::debug;
use tracing::warn;

use crate::DhcpLease;
use crate::FsmState;
use crate::LeaseError;
use crate::LeaseManager;
use crate::ProtocolError;
use crate::Result;

/// The node behind the API.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PeerStateHandler: Send + Sync + 'static {
    /// `false` until the FSM is running.
    fn is_ready(&self) -> bool;

    /// Feeds the state reported by `remote` into the local FSM and returns
    /// the local state afterwards. `None` means the caller sent no usable
    /// state. Callers other than the configured peer change nothing.
    async fn on_peer_state(
        &self,
        remote: SocketAddr,
        peer_state: Option<FsmState>,
    ) -> FsmState;
}

/// Shared by the REST and gRPC surfaces.
#[derive(Clone)]
pub struct HaApi {
    handler: Arc<dyn PeerStateHandler>,
    leases: Arc<dyn LeaseManager>,
}

impl HaApi {
    pub fn new(
        handler: Arc<dyn PeerStateHandler>,
        leases: Arc<dyn LeaseManager>,
    ) -> Self {
        Self { handler, leases }
    }

    pub fn is_ready(&self) -> bool {
        self.handler.is_ready()
    }

    /// Fails when the transport could not tell who is calling.
    pub async fn exchange_state(
        &self,
        remote: Option<SocketAddr>,
        peer_state: &str,
    ) -> Result<FsmState> {
        let Some(remote) = remote else {
            warn!("state exchange without a caller address");
            return Err(ProtocolError::UnknownSender.into());
        };
        let parsed = if peer_state.is_empty() {
            None
        } else {
            match peer_state.parse::<FsmState>() {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("peer reported an unknown state: {}", e);
                    None
                }
            }
        };
        Ok(self.handler.on_peer_state(remote, parsed).await)
    }

    pub async fn find_lease(
        &self,
        ip: IpAddr,
    ) -> Result<Option<DhcpLease>> {
        self.leases.find_lease(ip).await
    }

    pub async fn find_leases(
        &self,
        start: IpAddr,
        end: IpAddr,
        unsynced_only: bool,
    ) -> Result<Vec<DhcpLease>> {
        self.leases.find_leases(start, end, unsynced_only).await
    }

    pub async fn create_lease(
        &self,
        lease: &DhcpLease,
    ) -> Result<DhcpLease> {
        self.leases.insert_lease(lease).await?;
        Ok(lease.clone())
    }

    /// A regular update must target an existing lease and may not change its
    /// address. An HA update stores the peer's copy as-is.
    pub async fn update_lease(
        &self,
        path_ip: IpAddr,
        lease: &DhcpLease,
        ha_update: bool,
    ) -> Result<DhcpLease> {
        if !ha_update {
            if lease.ip_address != path_ip {
                return Err(LeaseError::AddressChange {
                    path: path_ip,
                    body: lease.ip_address,
                }
                .into());
            }
            if self.leases.find_lease(path_ip).await?.is_none() {
                return Err(LeaseError::NotFound(path_ip).into());
            }
        }
        let stored = self.leases.upsert_lease(lease).await?;
        debug!("stored lease {} (ha update: {})", stored.ip_address, ha_update);
        Ok(stored)
    }

    pub async fn delete_lease(
        &self,
        ip: IpAddr,
    ) -> Result<()> {
        if !self.leases.delete_lease(ip).await? {
            return Err(LeaseError::NotFound(ip).into());
        }
        Ok(())
    }
}
