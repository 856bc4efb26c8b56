//! Resolved runtime context shared by every command.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::backup::{BackupManager, BackupStore, DumpExecutor, RestoreCoordinator};
use crate::cli::Cli;
use crate::config::Config;
use crate::error::{Result, ShelfError};
use crate::import::MigrationEngine;
use crate::storage::Database;

#[derive(Debug)]
pub struct AppContext {
    pub root: PathBuf,
    pub config: Config,
    pub json: bool,
}

impl AppContext {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let config = Config::load(cli.config.as_deref(), &cli.root)?;
        Ok(Self::new(cli.root.clone(), config, cli.json))
    }

    pub fn new(root: PathBuf, config: Config, json: bool) -> Self {
        debug!(root = %root.display(), "resolved shelf root");
        Self { root, config, json }
    }

    pub fn database_path(&self) -> PathBuf {
        self.config.database_path(&self.root)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.config.backup_dir(&self.root)
    }

    /// Process-backed dump executor for the configured database.
    pub fn dump_executor(&self) -> DumpExecutor {
        DumpExecutor::new(&self.config.dump, self.database_path())
    }

    pub fn backup_store(&self) -> Result<BackupStore> {
        BackupStore::open(self.backup_dir())
    }

    /// Manager wired to the real `sqlite3` shell. Fails early when the
    /// shell cannot be found.
    pub fn backup_manager(&self) -> Result<BackupManager> {
        let executor = self.dump_executor();
        if !executor.is_available() {
            return Err(ShelfError::ExternalToolUnavailable {
                program: executor.program().display().to_string(),
                reason: "not found on PATH".to_string(),
            });
        }
        self.require_database()?;
        let mut backup = self.config.backup.clone();
        backup.dir = self.backup_dir();
        Ok(BackupManager::new(self.backup_store()?, Arc::new(executor), backup))
    }

    pub fn restore_coordinator<'a>(&self, manager: &'a BackupManager) -> RestoreCoordinator<'a> {
        RestoreCoordinator::new(manager, self.database_path(), self.config.restore.clone())
    }

    /// Open (and create if missing) the inventory database.
    pub fn open_database(&self) -> Result<Database> {
        Database::open(self.database_path())
    }

    pub fn migration_engine(&self) -> Result<MigrationEngine> {
        Ok(MigrationEngine::new(self.open_database()?))
    }

    fn require_database(&self) -> Result<()> {
        let path = self.database_path();
        if path.exists() {
            Ok(())
        } else {
            Err(ShelfError::NotFound(format!(
                "database {} does not exist",
                path.display()
            )))
        }
    }
}
