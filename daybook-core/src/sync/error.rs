//! Reconciliation error types.

use uuid::Uuid;

use crate::error::{RemoteError, StoreError};
use crate::ledger::LedgerError;
use crate::models::EntityKind;

/// Why one entity could not be included in a batch. Never fails the round.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionError {
    #[error("{kind} {id} no longer exists locally")]
    Missing { kind: EntityKind, id: Uuid },
    #[error("failed to read {kind} {id}: {reason}")]
    Store {
        kind: EntityKind,
        id: Uuid,
        reason: String,
    },
}

/// Failure of a whole round. Cursor and pushed flags are left as they were.
#[derive(Debug, thiserror::Error)]
pub enum RoundError {
    #[error("sync transport failed: {0}")]
    TransportFailure(String),
    #[error("server rejected sync with status {status}: {message}")]
    ServerRejected { status: u16, message: String },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("sync cursor unavailable: {0}")]
    Cursor(StoreError),
}

impl From<RemoteError> for RoundError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Rejected { status, message } => {
                RoundError::ServerRejected { status, message }
            }
            other => RoundError::TransportFailure(other.to_string()),
        }
    }
}
