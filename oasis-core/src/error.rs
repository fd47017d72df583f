//! Error types shared across the log-access layer

use thiserror::Error;

use crate::rpc::RpcError;

/// Failures of the connection supervisor itself
///
/// A log store that is slow to start or temporarily unreachable is not an
/// error: callers simply wait until the dial loop succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Connection supervisor has been shut down")]
    Shutdown,

    #[error("Dial task failed: {0}")]
    DialTask(String),
}

/// Failures surfaced by the request facade and everything built on it
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    #[error("Remote error: {0}")]
    Remote(RpcError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl AccessError {
    /// Wrap an error returned by the log store, keeping not-found distinct
    pub fn from_remote(err: RpcError) -> Self {
        if err.is_not_found() {
            AccessError::NotFound(err.message)
        } else {
            AccessError::Remote(err)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AccessError::NotFound(_))
    }
}

impl From<RpcError> for AccessError {
    fn from(err: RpcError) -> Self {
        AccessError::from_remote(err)
    }
}

impl From<serde_json::Error> for AccessError {
    fn from(err: serde_json::Error) -> Self {
        AccessError::Decode(err.to_string())
    }
}

pub type AccessResult<T> = Result<T, AccessError>;
