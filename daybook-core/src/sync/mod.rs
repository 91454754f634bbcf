//! Reconciliation between local changes and the remote authority.
//!
//! ## Round
//!
//! 1. Read unpushed ledger entries newer than the cursor
//! 2. Collapse them per entity and resolve current local state
//! 3. Send the batch to `POST /api/sync`
//! 4. Apply the authoritative response, mark entries pushed, advance cursor

mod client;
mod error;
mod protocol;
mod reconciler;
mod store;

pub use client::{check_server, HttpRemote, Identity};
pub use error::{ResolutionError, RoundError};
pub use protocol::{ItemsByKind, SyncBatch, SyncItem, SyncRequest, SyncResponse};
pub use reconciler::{ExchangeOutcome, RoundPhase, RoundReport, RoundStatus, SyncReconciler};
pub use store::{
    ConnectivityProbe, CursorStore, LocalStore, MemoryCursorStore, RemoteAuthority, SyncCursor,
};
