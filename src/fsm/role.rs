use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Role of this instance in the HA pair, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    NotConfigured,
    Primary,
    Backup,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::NotConfigured => "not_configured",
            Role::Primary => "primary",
            Role::Backup => "backup",
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Primary => Role::Backup,
            Role::Backup => Role::Primary,
            Role::NotConfigured => Role::NotConfigured,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}
