//! Point-in-time snapshots of the live database.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::BackupConfig;
use crate::error::{Result, ShelfError};
use crate::storage::{OperationKind, OperationLock};

use super::artifact::{BackupArtifact, BackupReason, artifact_filename, next_stamp};
use super::dump::DumpOperations;
use super::store::{BackupStore, PruneReport, checksum_file};

/// Creates backups: dump to a temp file, rename into place, register.
pub struct BackupManager {
    store: BackupStore,
    dump: Arc<dyn DumpOperations>,
    config: BackupConfig,
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BackupManager {
    pub fn new(store: BackupStore, dump: Arc<dyn DumpOperations>, config: BackupConfig) -> Self {
        Self {
            store,
            dump,
            config,
        }
    }

    pub fn store(&self) -> &BackupStore {
        &self.store
    }

    pub fn dump(&self) -> &Arc<dyn DumpOperations> {
        &self.dump
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Take a snapshot of the live database.
    ///
    /// Concurrent calls serialize on the backup lock, waiting at most
    /// `lock_wait` before failing with a conflict. The artifact becomes
    /// visible to [`BackupStore::list`] only after the rename and
    /// registration have both succeeded.
    pub fn create_backup(&self, reason: BackupReason) -> Result<BackupArtifact> {
        let _lock = OperationLock::acquire_timeout(
            self.store.dir(),
            OperationKind::Backup,
            Some(reason.as_str()),
            self.config.lock_wait,
        )?;

        let created_at = next_stamp(Utc::now(), self.store.newest_stamp()?);
        let filename = artifact_filename(created_at, reason);
        let final_path = self.store.artifact_path(&filename);

        // Removed on drop unless persisted.
        let tmp = tempfile::Builder::new()
            .prefix(".dump-")
            .suffix(".sql.part")
            .tempfile_in(self.store.temp_dir())?;

        self.dump.create_dump(tmp.path())?;
        tmp.as_file().sync_all()?;

        let (checksum, size_bytes) = checksum_file(tmp.path())?;
        if size_bytes == 0 {
            return Err(ShelfError::ValidationFailed(
                "dump tool produced an empty file".to_string(),
            ));
        }

        tmp.persist_noclobber(&final_path)
            .map_err(|err| ShelfError::Io(err.error))?;
        sync_dir(self.store.dir());

        let artifact = BackupArtifact {
            filename,
            created_at,
            size_bytes,
            reason,
            checksum,
        };
        if let Err(err) = self.store.register(&artifact) {
            // An unregistered file is invisible anyway; don't leave it behind.
            let _ = std::fs::remove_file(&final_path);
            return Err(err);
        }

        info!(
            filename = %artifact.filename,
            size_bytes = artifact.size_bytes,
            reason = %reason,
            "backup created"
        );

        if self.config.auto_prune {
            if let Err(err) = self.apply_retention(None) {
                warn!(error = %err, "automatic prune failed");
            }
        }

        Ok(artifact)
    }

    /// Prune both retention classes. `max_kept` overrides the configured
    /// count for manual and scheduled artifacts.
    pub fn apply_retention(&self, max_kept: Option<usize>) -> Result<PruneReport> {
        self.store.apply_retention(
            max_kept.unwrap_or(self.config.max_kept),
            self.config.keep_pre_restore,
        )
    }
}

/// Flush the directory entry for the rename. Best effort.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = std::fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}
