//! Error hierarchy for the coordinator server list.
//!
//! Defines error types for the server table, the change log and the
//! background dissemination engine, categorized by operational concern.

use config::ConfigError;
use tokio::task::JoinError;

use crate::list::ServerId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Server table and change log failures
    #[error(transparent)]
    ServerList(#[from] ServerListError),

    /// Network-level failures of update dissemination
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ServerListError {
    /// The id is not present, or its generation does not match the
    /// current occupant of the slot.
    #[error("Invalid ServerId ({0})")]
    UnknownServer(ServerId),

    /// Index beyond the server table length.
    #[error("Index beyond server table length ({index} >= {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// `crashed` or `remove` called against a DOWN entry.
    #[error("Illegal status transition for server {0}: entry is DOWN")]
    IllegalTransition(ServerId),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The update target left the cluster during/after the RPC.
    #[error("Server {0} is not up")]
    ServerNotUp(ServerId),

    /// Per-RPC deadline exceeded; the updater retries the target.
    #[error("Update RPC to {0} timed out")]
    RpcTimeout(ServerId),

    /// Persistent connection failures
    #[error("Socket connect failed error: {0}")]
    ConnectError(String),

    /// gRPC transport layer errors
    #[error(transparent)]
    TonicError(#[from] Box<tonic::transport::Error>),

    /// gRPC status code errors
    #[error(transparent)]
    TonicStatusError(#[from] Box<tonic::Status>),

    /// Background RPC task failed to join
    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

// ============== Conversion Implementations ============== //
impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        NetworkError::TonicError(Box::new(err)).into()
    }
}

impl From<tonic::Status> for Error {
    fn from(err: tonic::Status) -> Self {
        NetworkError::TonicStatusError(Box::new(err)).into()
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        NetworkError::TaskFailed(err).into()
    }
}
