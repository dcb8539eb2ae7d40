use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::AwaitPolicies;
use crate::Error;
use crate::Result;
use crate::Role;

/// Which mechanism carries messages to the peer.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PeerProtocol {
    /// Legacy binary protocol over UDP
    #[default]
    Failover,
    Rest,
    Grpc,
}

/// How binding changes reach the peer.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Wait for the peer's acknowledgement
    #[default]
    Sync,
    /// Fire and forget, reconcile on completion
    Async,
    /// Storage-level replication; nothing is sent per lease
    Database,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HaConfig {
    #[serde(default)]
    pub role: Role,

    #[serde(default)]
    pub peer_address: String,

    #[serde(default = "default_peer_failover_port")]
    pub peer_failover_port: u16,

    #[serde(default = "default_peer_rest_port")]
    pub peer_rest_port: u16,

    #[serde(default = "default_peer_grpc_port")]
    pub peer_grpc_port: u16,

    #[serde(default)]
    pub protocol: PeerProtocol,

    #[serde(default)]
    pub update_mode: UpdateMode,

    /// Backup poll period (unit: seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// History entries kept on disk
    #[serde(default = "default_max_stored_states")]
    pub max_stored_states: usize,

    /// Empty means `<data_dir>/ha-state.json`
    #[serde(default)]
    pub state_file: String,

    /// Lease sync pulls only leases the peer has not confirmed
    #[serde(default = "default_sync_unsynced_only")]
    pub sync_unsynced_only: bool,

    #[serde(default)]
    pub sync_on_start: bool,

    #[serde(default)]
    pub awaits: AwaitPolicies,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            role: Role::NotConfigured,
            peer_address: String::new(),
            peer_failover_port: default_peer_failover_port(),
            peer_rest_port: default_peer_rest_port(),
            peer_grpc_port: default_peer_grpc_port(),
            protocol: PeerProtocol::default(),
            update_mode: UpdateMode::default(),
            poll_interval_secs: default_poll_interval_secs(),
            max_stored_states: default_max_stored_states(),
            state_file: String::new(),
            sync_unsynced_only: default_sync_unsynced_only(),
            sync_on_start: false,
            awaits: AwaitPolicies::default(),
        }
    }
}

impl HaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.role == Role::NotConfigured {
            return Err(Error::Config(ConfigError::Message(
                "ha.role must be primary or backup".into(),
            )));
        }

        if self.peer_address.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "ha.peer_address is required".into(),
            )));
        }

        for (name, port) in [
            ("peer_failover_port", self.peer_failover_port),
            ("peer_rest_port", self.peer_rest_port),
            ("peer_grpc_port", self.peer_grpc_port),
        ] {
            if port == 0 {
                return Err(Error::Config(ConfigError::Message(format!(
                    "ha.{name} must be non-zero"
                ))));
            }
        }

        if self.poll_interval_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "ha.poll_interval_secs must be at least 1".into(),
            )));
        }

        if self.max_stored_states == 0 {
            return Err(Error::Config(ConfigError::Message(
                "ha.max_stored_states must be at least 1".into(),
            )));
        }

        self.awaits.validate()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_peer_failover_port() -> u16 {
    647
}
fn default_peer_rest_port() -> u16 {
    9067
}
fn default_peer_grpc_port() -> u16 {
    9068
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_max_stored_states() -> usize {
    100
}
fn default_sync_unsynced_only() -> bool {
    true
}
