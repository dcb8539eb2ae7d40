//! Primary/backup failover coordination for a DHCP server.
//!
//! Two instances keep their lease state consistent through a role state
//! machine, binding-update replication, control handover and bulk lease
//! sync. The peer is reached over the legacy binary failover protocol (UDP)
//! or over REST/gRPC; both drive the same FSM.

mod api;
mod codec;
mod config;
mod errors;
mod fsm;
mod history;
mod lease;
mod metrics;
mod node;
mod processor;
pub mod proto;
mod sync;
mod transport;
pub mod utils;

pub use api::*;
pub use codec::*;
pub use config::*;
pub use errors::*;
pub use fsm::*;
pub use history::*;
pub use lease::*;
pub use metrics::*;
pub use node::*;
pub use processor::*;
pub use sync::*;
pub use transport::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;
const API_SLO: Objective = Objective::new("api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms10, ObjectivePercentile::P99);
