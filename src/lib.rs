pub mod app;
pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod import;
pub mod storage;
pub mod test_utils;

pub use error::{Result, ShelfError};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
