//! Primary and Backup role state machines.
//!
//! Both failover generations share one machine: the legacy UDP protocol and
//! the REST/gRPC HA protocol differ only in the [`crate::PeerLink`] the
//! driver sends through.

mod backup;
mod driver;
mod machine;
mod primary;
mod retry_counter;
mod role;
mod state;

pub use driver::*;
pub use machine::*;
pub use retry_counter::*;
pub use role::*;
pub use state::*;

#[cfg(test)]
mod machine_test;
