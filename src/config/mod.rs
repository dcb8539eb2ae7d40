//! Configuration for one node of an HA pair.
//!
//! Sources are merged in this order (later sources override earlier):
//! 1. Defaults from code
//! 2. `config/ha.toml`, if present
//! 3. The file named by `CONFIG_PATH`, if set
//! 4. Environment variables with the `DHCPHA__` prefix
mod ha;
mod network;
mod retry;
mod server;
mod tls;
pub use ha::*;
pub use network::*;
pub use retry::*;
pub use server::*;
pub use tls::*;

use std::collections::HashSet;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::LinkConfig;
use crate::Result;

const ENV_PREFIX: &str = "DHCPHA";
const DEFAULT_CONFIG_FILE: &str = "config/ha";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct HaNodeConfig {
    /// Local listeners and directories
    #[serde(default)]
    pub server: ServerConfig,
    /// Role, peer and failover policy
    #[serde(default)]
    pub ha: HaConfig,
    /// REST/gRPC client tuning
    #[serde(default)]
    pub network: NetworkConfig,
    /// TLS for the gRPC client
    #[serde(default)]
    pub tls: TlsConfig,
    /// Address ranges served on each link
    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

impl HaNodeConfig {
    /// Loads configuration from defaults, files and environment. Does not
    /// validate: call [`HaNodeConfig::validate`] after all overrides.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Merges `path` over the current values. Environment variables still
    /// take precedence.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Consumes and checks the merged configuration. Any failure here means
    /// the HA subsystem must not start.
    pub fn validate(self) -> Result<Self> {
        self.server.validate()?;
        self.ha.validate()?;
        self.network.validate()?;
        self.tls.validate()?;
        self.validate_pair()?;
        self.validate_links()?;
        Ok(self)
    }

    /// Peer address, parsed.
    pub fn peer_ip(&self) -> Result<IpAddr> {
        self.ha.peer_address.trim().parse().map_err(|_| {
            Error::Config(ConfigError::Message(format!(
                "peer address {:?} is not an IP address",
                self.ha.peer_address
            )))
        })
    }

    /// Where the state history lives: `ha.state_file`, or
    /// `<data_dir>/ha-state.json` when unset.
    pub fn state_file(&self) -> PathBuf {
        if self.ha.state_file.trim().is_empty() {
            self.server.data_dir.join("ha-state.json")
        } else {
            PathBuf::from(&self.ha.state_file)
        }
    }

    fn validate_pair(&self) -> Result<()> {
        let peer = self.peer_ip()?;
        if peer == self.server.listen_address {
            return Err(Error::Config(ConfigError::Message(format!(
                "peer address {peer} must differ from the local listen address"
            ))));
        }
        Ok(())
    }

    fn validate_links(&self) -> Result<()> {
        let mut names = HashSet::new();
        for link in &self.links {
            if !link.is_well_formed() {
                return Err(Error::Config(ConfigError::Message(format!(
                    "link {} has an invalid range {} - {}",
                    link.name, link.start, link.end
                ))));
            }
            if !names.insert(link.name.as_str()) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "duplicate link name {}",
                    link.name
                ))));
            }
        }
        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
