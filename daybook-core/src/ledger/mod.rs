//! Change ledger: the ordered record of local mutations that drives sync.
//!
//! Every local write path appends exactly one [`ChangeEntry`] in the same
//! transaction as the write itself. The reconciler reads unpushed entries,
//! collapses them per entity (see [`collapse`]) and flips `pushed` once the
//! server has acknowledged them.

mod collapse;
mod memory;

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::EntityKind;

pub use collapse::{collapse, CollapsedChange};
pub use memory::MemoryLedger;

/// Logical timestamp in microseconds since the Unix epoch.
pub type LoggedAt = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Insert => "insert",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(ChangeAction::Insert),
            "update" => Ok(ChangeAction::Update),
            "delete" => Ok(ChangeAction::Delete),
            _ => Err(format!("Invalid change action '{}'", s)),
        }
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Ledger row id, unique per device.
    pub seq: i64,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub action: ChangeAction,
    pub logged_at: LoggedAt,
    pub pushed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(String),
    #[error("corrupt ledger row {seq}: {reason}")]
    Corrupt { seq: i64, reason: String },
}

/// Returns the next logical timestamp given the newest one already logged.
///
/// Wall-clock microseconds, bumped past `last` so timestamps stay strictly
/// increasing on this device even if the clock goes backwards.
pub fn next_logged_at(last: LoggedAt) -> LoggedAt {
    Utc::now().timestamp_micros().max(last + 1)
}

/// Durable, ordered record of local mutations.
pub trait ChangeLedger: Send + Sync {
    /// Appends one entry. Implementations backed by a database should also
    /// offer a variant that joins the caller's write transaction.
    fn record(
        &self,
        kind: EntityKind,
        id: Uuid,
        action: ChangeAction,
    ) -> impl Future<Output = Result<ChangeEntry, LedgerError>> + Send;

    /// Unpushed entries with `logged_at > cursor`, oldest first.
    fn unpushed_since(
        &self,
        cursor: LoggedAt,
    ) -> impl Future<Output = Result<Vec<ChangeEntry>, LedgerError>> + Send;

    /// Flags entries as pushed. Already-pushed entries are left alone.
    fn mark_pushed(
        &self,
        entries: &[ChangeEntry],
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Removes pushed entries logged at or before `cursor`.
    fn compact(&self, cursor: LoggedAt) -> impl Future<Output = Result<u64, LedgerError>> + Send;

    /// Number of entries still waiting to be pushed.
    fn pending_count(&self) -> impl Future<Output = Result<u64, LedgerError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_logged_at_is_strictly_increasing() {
        let far_future = Utc::now().timestamp_micros() + 60_000_000;
        assert_eq!(next_logged_at(far_future), far_future + 1);

        let a = next_logged_at(0);
        let b = next_logged_at(a);
        assert!(b > a);
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!(ChangeAction::from_str("DELETE").unwrap(), ChangeAction::Delete);
        assert!(ChangeAction::from_str("upsert").is_err());
    }
}
