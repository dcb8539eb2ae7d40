use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

use super::RoleTable;
use crate::ProtocolError;
use crate::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimaryState {
    Init,
    Running,
    AwaitingBindAck,
    RequestingControl,
    ReceivingUpdates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupState {
    Init,
    Polling,
    AwaitingPollReply,
    PollingFailure,
    Running,
    ReturningControl,
    BulkBindingsSent,
}

/// State of either role's machine. Persisted and exchanged by name
/// (`PRIMARY_RUNNING`, `BACKUP_POLLING`, ...), so the role is recoverable
/// from the name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsmState {
    Primary(PrimaryState),
    Backup(BackupState),
}

impl FsmState {
    pub fn role(self) -> Role {
        match self {
            FsmState::Primary(_) => Role::Primary,
            FsmState::Backup(_) => Role::Backup,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FsmState::Primary(s) => s.name(),
            FsmState::Backup(s) => s.name(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        PrimaryState::from_name(name)
            .map(FsmState::Primary)
            .or_else(|| BackupState::from_name(name).map(FsmState::Backup))
    }

    /// Initial state of `role`'s machine.
    pub fn init(role: Role) -> Option<Self> {
        match role {
            Role::Primary => Some(FsmState::Primary(PrimaryState::Init)),
            Role::Backup => Some(FsmState::Backup(BackupState::Init)),
            Role::NotConfigured => None,
        }
    }
}

impl fmt::Display for FsmState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FsmState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FsmState::from_name(s.trim()).ok_or_else(|| ProtocolError::InvalidState(s.to_string()))
    }
}

impl Serialize for FsmState {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for FsmState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

impl From<PrimaryState> for FsmState {
    fn from(s: PrimaryState) -> Self {
        FsmState::Primary(s)
    }
}

impl From<BackupState> for FsmState {
    fn from(s: BackupState) -> Self {
        FsmState::Backup(s)
    }
}
