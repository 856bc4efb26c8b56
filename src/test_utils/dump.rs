//! In-process [`DumpOperations`] implementations for tests.
//!
//! [`SqlTextDump`] writes the same kind of SQL text the `sqlite3` shell
//! produces, using only rusqlite, so backup and restore can be exercised on
//! machines without the shell installed.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rusqlite::Connection;

use crate::backup::DumpOperations;
use crate::error::{Result, ShelfError};
use crate::storage::sqlite::open_existing;

/// Dumps one database file as `CREATE` and `INSERT` statements.
#[derive(Debug, Clone)]
pub struct SqlTextDump {
    database: PathBuf,
}

impl SqlTextDump {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
        }
    }
}

impl DumpOperations for SqlTextDump {
    fn create_dump(&self, target: &Path) -> Result<()> {
        let conn = open_existing(&self.database)?;
        let mut out = BufWriter::new(fs::File::create(target)?);
        writeln!(out, "PRAGMA foreign_keys=OFF;")?;
        writeln!(out, "BEGIN TRANSACTION;")?;

        let mut schema = conn.prepare(
            "SELECT type, name, sql FROM sqlite_master \
             WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%' \
             ORDER BY CASE type WHEN 'table' THEN 0 ELSE 1 END, rowid",
        )?;
        let objects = schema
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (kind, _, sql) in &objects {
            if kind == "table" {
                writeln!(out, "{sql};")?;
            }
        }
        for (kind, name, _) in &objects {
            if kind == "table" {
                write_rows(&conn, name, &mut out)?;
            }
        }
        write_sequences(&conn, &mut out)?;
        for (kind, _, sql) in &objects {
            if kind != "table" {
                writeln!(out, "{sql};")?;
            }
        }

        writeln!(out, "COMMIT;")?;
        out.flush()?;
        Ok(())
    }

    fn apply_dump(&self, artifact: &Path, into: &Path) -> Result<()> {
        let sql = fs::read_to_string(artifact)?;
        let _ = fs::remove_file(into);
        let conn = Connection::open(into)?;
        conn.execute_batch(&sql)?;
        Ok(())
    }
}

fn write_rows(conn: &Connection, table: &str, out: &mut impl Write) -> Result<()> {
    let columns = conn
        .prepare(&format!("PRAGMA table_info(\"{table}\")"))?
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Ok(());
    }
    let quoted = columns
        .iter()
        .map(|c| format!("quote(\"{c}\")"))
        .collect::<Vec<_>>()
        .join(" || ',' || ");
    let mut stmt = conn.prepare(&format!("SELECT {quoted} FROM \"{table}\" ORDER BY rowid"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    for values in rows {
        writeln!(out, "INSERT INTO \"{table}\" VALUES({});", values?)?;
    }
    Ok(())
}

/// AUTOINCREMENT counters. The table itself is recreated by the first
/// AUTOINCREMENT `CREATE`, so only its rows are written.
fn write_sequences(conn: &Connection, out: &mut impl Write) -> Result<()> {
    let present: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'sqlite_sequence')",
        [],
        |row| row.get(0),
    )?;
    if !present {
        return Ok(());
    }
    writeln!(out, "DELETE FROM sqlite_sequence;")?;
    let mut stmt = conn.prepare(
        "SELECT quote(name) || ',' || quote(seq) FROM sqlite_sequence ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    for values in rows {
        writeln!(out, "INSERT INTO sqlite_sequence VALUES({});", values?)?;
    }
    Ok(())
}

/// Always fails like a crashing dump tool, after touching the target.
#[derive(Debug, Default)]
pub struct FailingDump {
    pub calls: AtomicUsize,
}

impl DumpOperations for FailingDump {
    fn create_dump(&self, target: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::write(target, "-- partial output\n")?;
        Err(failure())
    }

    fn apply_dump(&self, _artifact: &Path, into: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fs::write(into, "")?;
        Err(failure())
    }
}

fn failure() -> ShelfError {
    ShelfError::ExternalTool {
        program: "sqlite3".to_string(),
        exit_code: Some(1),
        stderr_tail: "Error: simulated failure".to_string(),
        elapsed: Duration::from_millis(1),
    }
}

/// Wraps another implementation and sleeps before replaying, to keep a
/// restore in flight long enough for a competing caller to collide.
#[derive(Debug)]
pub struct SlowDump<D> {
    inner: D,
    delay: Duration,
}

impl<D> SlowDump<D> {
    pub fn new(inner: D, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl<D: DumpOperations> DumpOperations for SlowDump<D> {
    fn create_dump(&self, target: &Path) -> Result<()> {
        self.inner.create_dump(target)
    }

    fn apply_dump(&self, artifact: &Path, into: &Path) -> Result<()> {
        std::thread::sleep(self.delay);
        self.inner.apply_dump(artifact, into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use tempfile::tempdir;

    #[test]
    fn dump_and_replay_reproduce_rows() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("live.db");
        let db = Database::open(&db_path).unwrap();
        db.conn()
            .execute(
                "INSERT INTO stores (name, location, created_at) VALUES ('O''Neil''s', NULL, 'now')",
                [],
            )
            .unwrap();

        let dump = SqlTextDump::new(&db_path);
        let artifact = dir.path().join("dump.sql");
        dump.create_dump(&artifact).unwrap();

        let copy = dir.path().join("copy.db");
        dump.apply_dump(&artifact, &copy).unwrap();

        let conn = Connection::open(&copy).unwrap();
        let name: String = conn
            .query_row("SELECT name FROM stores", [], |row| row.get(0))
            .unwrap();
        assert_eq!(name, "O'Neil's");
        let indexes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 2);
    }

    #[test]
    fn replay_keeps_autoincrement_counters() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("live.db");
        let db = Database::open(&db_path).unwrap();
        for name in ["a", "b", "c"] {
            db.conn()
                .execute(
                    "INSERT INTO stores (name, location, created_at) VALUES (?1, NULL, 'now')",
                    [name],
                )
                .unwrap();
        }
        db.conn().execute("DELETE FROM stores WHERE name = 'c'", []).unwrap();

        let dump = SqlTextDump::new(&db_path);
        let artifact = dir.path().join("dump.sql");
        dump.create_dump(&artifact).unwrap();
        let copy = dir.path().join("copy.db");
        dump.apply_dump(&artifact, &copy).unwrap();

        let conn = Connection::open(&copy).unwrap();
        conn.execute(
            "INSERT INTO stores (name, location, created_at) VALUES ('d', NULL, 'now')",
            [],
        )
        .unwrap();
        let id: i64 = conn
            .query_row("SELECT id FROM stores WHERE name = 'd'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(id, 4);
    }
}
