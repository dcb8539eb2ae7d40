use std::fs;
use std::path::Path;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TlsConfig {
    /// Enables TLS on the gRPC client channel
    /// Default: false (disabled)
    #[serde(default)]
    pub enable_tls: bool,

    /// Path to Certificate Authority root certificate
    /// Default: "/etc/ssl/certs/ca.pem"
    #[serde(default = "default_ca_path")]
    pub certificate_authority_root_path: String,

    /// Domain name the peer certificate must match
    #[serde(default = "default_domain_name")]
    pub domain_name: String,

    /// Client certificate chain for mTLS, PEM
    #[serde(default)]
    pub client_certificate_path: String,

    /// Client private key for mTLS, PEM
    #[serde(default)]
    pub client_private_key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enable_tls: false,
            certificate_authority_root_path: default_ca_path(),
            domain_name: default_domain_name(),
            client_certificate_path: String::new(),
            client_private_key_path: String::new(),
        }
    }
}

impl TlsConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enable_tls {
            return Ok(());
        }

        validate_file(&self.certificate_authority_root_path, "CA certificate")?;

        match (
            self.client_certificate_path.is_empty(),
            self.client_private_key_path.is_empty(),
        ) {
            (true, true) => Ok(()),
            (false, false) => {
                validate_file(&self.client_certificate_path, "client certificate")?;
                validate_file(&self.client_private_key_path, "client private key")
            }
            _ => Err(Error::Config(ConfigError::Message(
                "client certificate and private key must be set together".into(),
            ))),
        }
    }

    pub fn mtls_enabled(&self) -> bool {
        self.enable_tls && !self.client_certificate_path.is_empty()
    }
}

fn validate_file(
    path: &str,
    name: &str,
) -> Result<()> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(Error::Config(ConfigError::Message(format!(
            "{} file {} not found",
            name,
            path.display()
        ))));
    }
    fs::File::open(path).map_err(|e| {
        Error::Config(ConfigError::Message(format!(
            "{} file {} is unreadable: {}",
            name,
            path.display(),
            e
        )))
    })?;
    Ok(())
}

fn default_ca_path() -> String {
    "/etc/ssl/certs/ca.pem".into()
}
fn default_domain_name() -> String {
    "dhcp-ha.local".into()
}
