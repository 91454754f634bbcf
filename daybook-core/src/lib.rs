//! Daybook Core Library
//!
//! Shared models plus the offline-first sync engine: the change ledger,
//! the cache-freshness dispatcher and the reconciliation round.

pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod models;
pub mod sync;

pub use dispatch::{CacheDecision, CacheFreshnessDispatcher, DataSource, FetchContext, FetchError};
pub use error::{RemoteError, StoreError};
pub use ledger::{ChangeAction, ChangeEntry, ChangeLedger, LedgerError, LoggedAt};
pub use models::{
    Entity, EntityKind, Exercise, Frequency, Habit, JournalEntry, Priority, Syncable, Task,
    WorkoutDay,
};
pub use sync::{check_server, HttpRemote, RoundError, RoundStatus, SyncCursor, SyncReconciler};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
