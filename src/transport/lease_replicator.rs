use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::PeerTransport;
use crate::metrics::LEASE_REPLICATION_RESULTS;
use crate::DhcpLease;
use crate::LeaseManager;

/// Completion callback of [`LeaseReplicator::replicate_async`]; receives
/// whether the peer confirmed an identical copy.
pub type ReplicationCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Pushes single leases to the peer and records the outcome in the local
/// lease's `ha_peer_state`.
///
/// A lease is marked synced only when the peer echoes back a copy equal to
/// the one sent. A mismatch or a transport failure leaves it unknown; the
/// next lease sync picks it up.
#[derive(Clone)]
pub struct LeaseReplicator {
    transport: Arc<dyn PeerTransport>,
    leases: Arc<dyn LeaseManager>,
}

impl LeaseReplicator {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        leases: Arc<dyn LeaseManager>,
    ) -> Self {
        Self { transport, leases }
    }

    pub async fn replicate(
        &self,
        lease: &DhcpLease,
    ) -> bool {
        let peer_state = match self.transport.update_lease(lease).await {
            Some(stored) if stored.same_lease(lease) => {
                LEASE_REPLICATION_RESULTS.with_label_values(&["synced"]).inc();
                Some(lease.state)
            }
            Some(stored) => {
                warn!(
                    "peer stored a different copy of {}: sent {:?}, got {:?}",
                    lease.ip_address, lease.state, stored.state
                );
                LEASE_REPLICATION_RESULTS.with_label_values(&["mismatch"]).inc();
                None
            }
            None => {
                LEASE_REPLICATION_RESULTS.with_label_values(&["failed"]).inc();
                None
            }
        };

        if let Err(e) = self.leases.set_ha_peer_state(lease.ip_address, peer_state).await {
            error!("failed to record peer state of {}: {:?}", lease.ip_address, e);
            return false;
        }
        debug!("replicated {}: synced={}", lease.ip_address, peer_state.is_some());
        peer_state.is_some()
    }

    /// Replicates in the background and reports through `on_result`.
    pub fn replicate_async(
        &self,
        lease: DhcpLease,
        on_result: ReplicationCallback,
    ) -> JoinHandle<()> {
        let replicator = self.clone();
        tokio::spawn(async move {
            let synced = replicator.replicate(&lease).await;
            on_result(synced);
        })
    }
}
