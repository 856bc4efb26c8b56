//! Database migrations

use rusqlite::Connection;

use crate::error::{Result, ShelfError};

const MIGRATIONS: [&str; 2] = [
    include_str!("../../migrations/001_inventory_schema.sql"),
    include_str!("../../migrations/002_migration_ledger.sql"),
];

pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// Run all pending migrations on the database.
///
/// Every statement is `IF NOT EXISTS`, so replaying against a database
/// restored from a text dump (which drops `user_version`) is harmless.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    let current_version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(|err| ShelfError::AssertionFailed(format!("read user_version: {err}")))?;

    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let target_version = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        if current_version >= target_version {
            continue;
        }

        conn.execute_batch(sql)?;
        conn.pragma_update(None, "user_version", target_version)?;
    }

    Ok(SCHEMA_VERSION)
}
