//! Backup creation, retention and restore.

pub mod artifact;
pub mod dump;
pub mod manager;
pub mod restore;
pub mod store;

pub use artifact::{BackupArtifact, BackupReason};
pub use dump::{DumpExecutor, DumpOperations};
pub use manager::BackupManager;
pub use restore::{RestoreCoordinator, RestoreOperation, RestorePhase};
pub use store::{BackupStore, PruneReport, RetentionClass};
