//! Shared fixtures for unit tests: address and lease builders, a tracing
//! subscriber, a mock `dhcpha.HaService` served over loopback, and a
//! pipeline harness running one side of the pair against a recording link.

mod common;
mod mock_ha_service;
mod pipeline_harness;

pub use common::*;
pub use mock_ha_service::*;
pub use pipeline_harness::*;
