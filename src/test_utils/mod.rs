//! Shared test utilities for shelfkeeper.

pub mod dump;
pub mod fixtures;

pub use dump::{FailingDump, SlowDump, SqlTextDump};
pub use fixtures::InventoryFixture;
