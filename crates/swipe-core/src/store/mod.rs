//! Persistent task/instance store (SQLite via sqlx).
//!
//! Holds the swipe queue, the singleton proxy-instance ledger, and a small
//! key/value config table. Every engine pass recovers purely from what is
//! persisted here; status changes are compare-and-swap updates so a
//! concurrent actor moving a row forward aborts the stale mutation.

pub mod db;
pub mod types;

pub use db::Store;
pub use types::*;
