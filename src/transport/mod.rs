//! Talking to the peer.
//!
//! [`PeerTransport`] is the request/response surface used by replication and
//! lease sync; REST and gRPC implementations are interchangeable behind it.
//! [`PeerLink`] is the one-way message path the FSM driver sends through:
//! UDP datagrams for the legacy protocol, or [`HaPeerLink`] which maps
//! failover messages onto a [`PeerTransport`].

mod failover_socket;
mod grpc_client;
mod ha_peer_link;
mod lease_replicator;
mod rest_client;

pub use failover_socket::*;
pub use grpc_client::*;
pub use ha_peer_link::*;
pub use lease_replicator::*;
pub use rest_client::*;

#[cfg(test)]
mod lease_replicator_test;

use std::net::IpAddr;

use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;
use tonic::async_trait;

use crate::DhcpLease;
use crate::FailoverMessage;
use crate::FsmState;
use crate::Result;

/// Leases streamed from the peer. An `Err` item ends the stream.
pub type LeaseStream = BoxStream<'static, Result<DhcpLease>>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Liveness probe. `None` on any failure; never an error.
    async fn get_status(&self) -> Option<String>;

    /// Sends our state, returns the peer's state after it processed ours.
    async fn get_peer_state(
        &self,
        own_state: FsmState,
    ) -> Option<FsmState>;

    /// Pushes `lease` and returns the copy the peer stored.
    async fn update_lease(
        &self,
        lease: &DhcpLease,
    ) -> Option<DhcpLease>;

    /// Pushes `leases` as one batch and returns the copies the peer stored,
    /// in order. `None` if the batch did not get through.
    async fn update_leases(
        &self,
        leases: &[DhcpLease],
    ) -> Option<Vec<DhcpLease>>;

    /// Leases in `start..=end` held by the peer.
    async fn stream_leases(
        &self,
        start: IpAddr,
        end: IpAddr,
        unsynced_only: bool,
    ) -> Result<LeaseStream>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PeerLink: Send + Sync + 'static {
    /// Delivers one message to the peer. An error means it was not sent.
    async fn send(
        &self,
        msg: FailoverMessage,
    ) -> Result<()>;
}
