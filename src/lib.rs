//! Daybook: offline-first tasks, habits, workouts and journal.
//!
//! The library holds the SQLite-backed local store, the HTTP sync server
//! and the glue that wires the sync engine from `daybook-core` to both.

pub mod config;
pub mod db;
pub mod server;
pub mod sync;
