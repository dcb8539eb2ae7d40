//! Lease records and the lease-manager seam.
//!
//! The allocation engine and its persistence live outside the HA core. This
//! module defines the shapes the HA core moves between peers ([`DhcpLease`],
//! [`Binding`]) and the [`LeaseManager`] trait it calls into. Every write is a
//! single-record upsert keyed by IP address; atomicity of that write is the
//! manager's responsibility.

mod link;
mod mem_lease_manager;
mod model;

pub use link::*;
pub use mem_lease_manager::*;
pub use model::*;

#[cfg(test)]
mod mem_lease_manager_test;

use std::net::IpAddr;

#[cfg(test)]
use mockall::automock;
use tonic::async_trait;

use crate::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LeaseManager: Send + Sync + 'static {
    async fn find_lease(
        &self,
        ip: IpAddr,
    ) -> Result<Option<DhcpLease>>;

    /// Creates a lease; fails with `LeaseError::AlreadyExists` if the address is taken.
    async fn insert_lease(
        &self,
        lease: &DhcpLease,
    ) -> Result<()>;

    /// Create-or-update keyed by IP address. Returns the stored copy.
    async fn upsert_lease(
        &self,
        lease: &DhcpLease,
    ) -> Result<DhcpLease>;

    /// Returns whether a lease was removed.
    async fn delete_lease(
        &self,
        ip: IpAddr,
    ) -> Result<bool>;

    /// Leases with `start <= ip <= end`, ordered by address. With
    /// `unsynced_only` the result is limited to leases whose peer state
    /// differs from their own state.
    async fn find_leases(
        &self,
        start: IpAddr,
        end: IpAddr,
        unsynced_only: bool,
    ) -> Result<Vec<DhcpLease>>;

    /// Records what the peer is known to hold for `ip`. A missing lease is
    /// not an error: it may have been released meanwhile.
    async fn set_ha_peer_state(
        &self,
        ip: IpAddr,
        peer_state: Option<LeaseState>,
    ) -> Result<()>;

    /// Creates, updates or deletes the IA record described by `binding`.
    async fn apply_binding(
        &self,
        op: BindingOp,
        binding: &Binding,
    ) -> Result<()>;
}
