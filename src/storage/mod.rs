//! Storage layer for shelfkeeper
//!
//! SQLite holds the inventory and the migration ledger; file locks under
//! `.locks/` serialize the long-running operations that touch it.

pub mod inventory;
pub mod lock;
pub mod migrations;
pub mod sqlite;

pub use inventory::MigrationLedgerEntry;
pub use lock::{LockHolder, OperationKind, OperationLock};
pub use sqlite::Database;
