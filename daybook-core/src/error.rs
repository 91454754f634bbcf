//! Error types shared by the dispatcher and the reconciler.

use std::time::Duration;

/// Failure talking to the remote authority.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("Sync not configured. Add server_url and api_key to config.")]
    NotConfigured,
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("remote request timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid remote response: {0}")]
    Decode(String),
}

/// Failure reading or writing the local entity store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("local store error: {0}")]
    Storage(String),
    #[error("corrupt local record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}
