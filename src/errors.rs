//! Failover/HA Error Hierarchy
//!
//! Defines error types for the HA coordination core, categorized by the layer
//! that produced them. Transport and protocol failures are normally absorbed at
//! task boundaries (logged, counted, turned into `None`/`false`); only
//! configuration errors are expected to reach the process entry point.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, storage, lease store)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration that loaded but does not describe a usable HA pair
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Failover protocol violations
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Unrecoverable failures requiring the HA subsystem to stop
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Lease manager error: {0}")]
    Lease(#[from] LeaseError),

    #[error("Node failed to start: {0}")]
    NodeStartFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Peer answered but reported itself unavailable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Peer communication timeout
    #[error("Request to {peer} timed out after {duration:?}")]
    Timeout { peer: String, duration: Duration },

    #[error("Socket connect failed error")]
    ConnectError,

    #[error("Invalid URI format: {0}")]
    InvalidURI(String),

    /// Non-success HTTP status from the peer's REST surface
    #[error("Peer returned HTTP status {0}")]
    UnexpectedStatus(u16),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// gRPC transport layer errors
    #[error(transparent)]
    TonicError(#[from] Box<tonic::transport::Error>),

    /// gRPC status code errors
    #[error(transparent)]
    TonicStatusError(#[from] Box<tonic::Status>),

    #[error("UDP socket error: {0}")]
    Socket(#[source] std::io::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    /// Retried task gave up
    #[error("Task failed after {0} retries")]
    RetryExhausted(usize),

    #[error("{0}")]
    SignalSendFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("Error occurred at path: {path}")]
    PathError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON (de)serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("Lease {0} not found")]
    NotFound(IpAddr),

    #[error("Lease {0} already exists")]
    AlreadyExists(IpAddr),

    #[error("Lease body address {body} does not match {path}")]
    AddressChange { path: IpAddr, body: IpAddr },

    #[error("Binding carries no lease records")]
    EmptyBinding,

    #[error("Lease store failure: {0}")]
    Store(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Message from {remote} is not from the configured peer {peer}")]
    PeerMismatch { remote: IpAddr, peer: IpAddr },

    /// State exchange whose caller address is not known
    #[error("State exchange arrived without a caller address")]
    UnknownSender,

    #[error("Message type {message_type} is not accepted by role {role}")]
    RoleMismatch {
        message_type: &'static str,
        role: &'static str,
    },

    #[error("Unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("Invalid state name: {0}")]
    InvalidState(String),

    /// The FSM actor has stopped and no longer accepts commands
    #[error("State machine is not running")]
    FsmStopped,
}

/// Failures turning a datagram into a [`crate::FailoverMessage`]. The caller
/// drops the datagram; nothing is partially applied.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Truncated failover message: {0} bytes, need at least 4")]
    Truncated(usize),

    #[error("Binding payload is not valid JSON: {0}")]
    InvalidBinding(#[from] serde_json::Error),

    #[error("Binding payload carries no lease addresses")]
    EmptyBinding,

    #[error("Address {0} matches no configured link")]
    NoMatchingLink(IpAddr),
}

// ===== System Error conversions =====

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<LeaseError> for Error {
    fn from(e: LeaseError) -> Self {
        Error::System(SystemError::Lease(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::System(SystemError::Storage(StorageError::Json(e)))
    }
}

// ===== Protocol Error conversions =====

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Protocol(ProtocolError::Decode(e))
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        NetworkError::TonicError(Box::new(e)).into()
    }
}

impl From<tonic::Status> for Error {
    fn from(s: tonic::Status) -> Self {
        NetworkError::TonicStatusError(Box::new(s)).into()
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        NetworkError::Http(e).into()
    }
}
