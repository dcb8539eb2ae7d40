//! Bulk lease reconciliation with the peer, one task per configured link.

mod lease_sync;

pub use lease_sync::*;
