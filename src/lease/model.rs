use std::net::IpAddr;

use serde::Deserialize;
use serde::Serialize;

/// Binding state of a single lease, as owned by the allocation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    Available,
    Offered,
    Leased,
    Expired,
    Released,
    Declined,
}

/// Identity association type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IaType {
    Na,
    Ta,
    Pd,
    V4,
}

/// A DHCP option stored with a lease. The value stays hex-encoded; the HA core
/// only transports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseOption {
    pub code: u16,
    pub value: String,
}

/// A lease record as exchanged between peers.
///
/// `ha_peer_state` is the only field the HA core writes: it holds the lease
/// state the peer is known to have stored, or `None` when the peer's copy is
/// unknown or divergent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhcpLease {
    pub ip_address: IpAddr,
    pub duid: String,
    #[serde(rename = "iatype")]
    pub ia_type: IaType,
    pub iaid: u32,
    #[serde(default)]
    pub prefix_length: u8,
    pub state: LeaseState,
    #[serde(default)]
    pub start_time: u64,
    #[serde(default)]
    pub preferred_end_time: u64,
    #[serde(default)]
    pub valid_end_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ha_peer_state: Option<LeaseState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<LeaseOption>,
}

impl DhcpLease {
    pub fn new(
        ip_address: IpAddr,
        duid: impl Into<String>,
        ia_type: IaType,
        iaid: u32,
        state: LeaseState,
    ) -> Self {
        Self {
            ip_address,
            duid: duid.into(),
            ia_type,
            iaid,
            prefix_length: 0,
            state,
            start_time: 0,
            preferred_end_time: 0,
            valid_end_time: 0,
            ha_peer_state: None,
            options: Vec::new(),
        }
    }

    /// The peer is known to hold this lease in its current state.
    pub fn is_synced(&self) -> bool {
        self.ha_peer_state == Some(self.state)
    }

    pub fn mark_synced(&mut self) {
        self.ha_peer_state = Some(self.state);
    }

    pub fn mark_unknown(&mut self) {
        self.ha_peer_state = None;
    }

    /// Field-by-field comparison of everything the allocation engine owns.
    /// `ha_peer_state` is excluded: each side records its own view of the peer.
    pub fn same_lease(
        &self,
        other: &DhcpLease,
    ) -> bool {
        self.ip_address == other.ip_address
            && self.duid == other.duid
            && self.ia_type == other.ia_type
            && self.iaid == other.iaid
            && self.prefix_length == other.prefix_length
            && self.state == other.state
            && self.start_time == other.start_time
            && self.preferred_end_time == other.preferred_end_time
            && self.valid_end_time == other.valid_end_time
            && self.options == other.options
    }
}

/// Server-side record linking an identity association to its leases.
///
/// Owned by the allocation subsystem; the HA core moves it between peers and
/// never interprets it beyond the lease addresses used to resolve `link`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub duid: String,
    #[serde(rename = "iatype")]
    pub ia_type: IaType,
    pub iaid: u32,
    pub state: LeaseState,
    pub leases: Vec<DhcpLease>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<LeaseOption>,
    /// Name of the local link the binding resolved to on decode.
    #[serde(skip)]
    pub link: Option<String>,
}

impl Binding {
    /// Builds a single-lease binding carrying the lease's identity.
    pub fn for_lease(lease: DhcpLease) -> Self {
        Self {
            duid: lease.duid.clone(),
            ia_type: lease.ia_type,
            iaid: lease.iaid,
            state: lease.state,
            leases: vec![lease],
            options: Vec::new(),
            link: None,
        }
    }

    pub fn first_address(&self) -> Option<IpAddr> {
        self.leases.first().map(|l| l.ip_address)
    }
}

/// What the allocation engine did to a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingOp {
    Add,
    Update,
    Delete,
}
