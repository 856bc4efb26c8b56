//! Legacy flat-file inventory import.
//!
//! [`LegacyDocument`] decodes the old JSON export record by record and
//! [`MigrationEngine`] copies it into the relational schema, keeping a
//! ledger so the same file can be migrated any number of times.

mod engine;
mod legacy;

pub use engine::{MigrationEngine, MigrationSummary};
pub use legacy::{
    LegacyDocument, LegacyPrice, LegacyProduct, LegacyStore, RecordKind, SkippedRecord,
};
