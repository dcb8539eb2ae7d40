use std::collections::HashSet;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address every local listener binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,

    /// UDP port of the legacy failover protocol
    #[serde(default = "default_failover_port")]
    pub failover_port: u16,

    /// HTTP port of the REST surface
    #[serde(default = "default_rest_port")]
    pub rest_port: u16,

    /// gRPC port of the HA service
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            failover_port: default_failover_port(),
            rest_port: default_rest_port(),
            grpc_port: default_grpc_port(),
            log_dir: default_log_dir(),
            data_dir: default_data_dir(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        let ports = [
            ("failover_port", self.failover_port),
            ("rest_port", self.rest_port),
            ("grpc_port", self.grpc_port),
        ];

        let mut seen = HashSet::new();
        for (name, port) in ports {
            if port == 0 {
                return Err(Error::Config(ConfigError::Message(format!(
                    "server.{name} must be non-zero"
                ))));
            }
            if !seen.insert(port) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "server.{name} {port} conflicts with another listener"
                ))));
            }
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "server.data_dir cannot be empty".into(),
            )));
        }
        Ok(())
    }

    pub fn failover_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.failover_port)
    }

    pub fn rest_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.rest_port)
    }

    pub fn grpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.grpc_port)
    }
}

fn default_listen_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_failover_port() -> u16 {
    647
}
fn default_rest_port() -> u16 {
    9067
}
fn default_grpc_port() -> u16 {
    9068
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
