//! Client-side wiring of the sync engine.
//!
//! - [`SyncedRepository`]: feature reads and writes through the
//!   cache-freshness dispatcher
//! - [`try_auto_sync`]: the reconciliation trigger used by CLI commands

pub mod auto_sync;
pub mod entity_sync;

pub use auto_sync::{
    build_reconciler, manual_reconciler, try_auto_sync, LocalReconciler, SyncStartError,
};
pub use entity_sync::{remote_from_config, SyncedRepository};
