use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::backup::{BackupManager, BackupStore, DumpOperations, RestoreCoordinator};
use crate::config::Config;
use crate::storage::Database;

use super::SqlTextDump;

/// Isolated root with a migrated database and a backup directory.
pub struct InventoryFixture {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub config: Config,
}

impl Default for InventoryFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();

        let mut config = Config::default();
        config.database.path = root.join("shelf.db");
        config.backup.dir = root.join("backups");

        Database::open(&config.database.path).expect("Failed to create database");

        Self {
            temp_dir,
            root,
            config,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.config.database.path
    }

    pub fn open_db(&self) -> Database {
        Database::open(self.db_path()).expect("Failed to open database")
    }

    pub fn backup_store(&self) -> BackupStore {
        BackupStore::open(&self.config.backup.dir).expect("Failed to open backup store")
    }

    pub fn dump(&self) -> Arc<dyn DumpOperations> {
        Arc::new(SqlTextDump::new(self.db_path()))
    }

    /// Manager backed by the in-process dump.
    pub fn backup_manager(&self) -> BackupManager {
        self.backup_manager_with(self.dump())
    }

    pub fn backup_manager_with(&self, dump: Arc<dyn DumpOperations>) -> BackupManager {
        BackupManager::new(self.backup_store(), dump, self.config.backup.clone())
    }

    pub fn coordinator<'a>(&self, manager: &'a BackupManager) -> RestoreCoordinator<'a> {
        RestoreCoordinator::new(manager, self.db_path(), self.config.restore.clone())
    }

    /// Insert stores named `prefix-0`, `prefix-1`, ...
    pub fn add_stores(&self, prefix: &str, count: usize) {
        let db = self.open_db();
        for i in 0..count {
            db.conn()
                .execute(
                    "INSERT INTO stores (name, created_at) VALUES (?, '2026-01-01T00:00:00Z')",
                    [format!("{prefix}-{i}")],
                )
                .expect("Failed to insert store");
        }
    }

    pub fn store_names(&self) -> Vec<String> {
        let db = self.open_db();
        let mut stmt = db
            .conn()
            .prepare("SELECT name FROM stores ORDER BY name")
            .expect("Failed to prepare query");
        stmt.query_map([], |row| row.get(0))
            .expect("Failed to query stores")
            .collect::<Result<Vec<String>, _>>()
            .expect("Failed to read stores")
    }

    /// Write a file under the fixture root.
    pub fn create_file(&self, relative_path: &str, content: &str) -> PathBuf {
        let full_path = self.root.join(relative_path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        std::fs::write(&full_path, content).expect("Failed to write file");
        full_path
    }
}
