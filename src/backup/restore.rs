//! Restoring the live database from a backup artifact.
//!
//! The dump is replayed into a staging database first. Only a staging
//! database that passes verification is copied over the live one, in a
//! single step through SQLite's online-backup API, so the live database is
//! either fully replaced or left as it was.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::backup::{Backup, StepResult};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RestoreConfig;
use crate::error::{Result, ShelfError};
use crate::storage::sqlite::{integrity_check, open_existing, row_count};
use crate::storage::{OperationKind, OperationLock};

use super::artifact::{BackupArtifact, BackupReason};
use super::manager::BackupManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    Idle,
    Validating,
    PreBackup,
    Restoring,
    Verifying,
    Done,
    Failed,
}

impl RestorePhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::PreBackup => "pre_backup",
            Self::Restoring => "restoring",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Validating)
                | (Self::Validating, Self::PreBackup)
                | (Self::PreBackup, Self::Restoring)
                | (Self::Restoring, Self::Verifying)
                | (Self::Verifying, Self::Done)
                | (
                    Self::Validating | Self::PreBackup | Self::Restoring | Self::Verifying,
                    Self::Failed
                )
        )
    }
}

impl std::fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One restore call, from request to outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOperation {
    /// Correlates the phase log lines of one call
    pub id: String,
    pub artifact: String,
    pub phase: RestorePhase,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Safety snapshot taken before the live database was touched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_restore: Option<String>,
    /// Rows in the reference table after the restore
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RestoreOperation {
    pub fn new(artifact: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            artifact: artifact.into(),
            phase: RestorePhase::Idle,
            started_at: Utc::now(),
            finished_at: None,
            pre_restore: None,
            reference_rows: None,
            error: None,
        }
    }

    pub fn advance(&mut self, next: RestorePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(ShelfError::AssertionFailed(format!(
                "illegal restore transition {} -> {next}",
                self.phase
            )));
        }
        info!(
            id = %self.id,
            artifact = %self.artifact,
            from = %self.phase,
            to = %next,
            "restore phase"
        );
        self.phase = next;
        if matches!(next, RestorePhase::Done | RestorePhase::Failed) {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Move to `Failed` and wrap `err` with the phase it happened in. Errors
    /// raised while validating are returned unchanged.
    fn fail(&mut self, err: ShelfError) -> ShelfError {
        let phase = self.phase;
        self.error = Some(err.to_string());
        if let Err(assertion) = self.advance(RestorePhase::Failed) {
            return assertion;
        }
        warn!(
            id = %self.id,
            artifact = %self.artifact,
            phase = %phase,
            error = %err,
            "restore failed"
        );
        if phase == RestorePhase::Validating {
            return err;
        }
        ShelfError::RestoreFailed {
            phase: phase.to_string(),
            pre_restore: self.pre_restore.clone(),
            source: Box::new(err),
        }
    }
}

/// Runs restores one at a time against the live database.
#[derive(Debug)]
pub struct RestoreCoordinator<'a> {
    manager: &'a BackupManager,
    database: PathBuf,
    config: RestoreConfig,
}

impl<'a> RestoreCoordinator<'a> {
    pub fn new(
        manager: &'a BackupManager,
        database: impl Into<PathBuf>,
        config: RestoreConfig,
    ) -> Self {
        Self {
            manager,
            database: database.into(),
            config,
        }
    }

    /// Replace the live database with the contents of `filename`.
    ///
    /// A second restore while one is running fails with
    /// `RestoreInProgress`. On failure after the safety snapshot the error
    /// names the failing phase and the pre-restore artifact.
    pub fn restore(&self, filename: &str) -> Result<RestoreOperation> {
        let store = self.manager.store();
        let _lock =
            OperationLock::try_acquire(store.dir(), OperationKind::Restore, Some(filename))?;

        let mut op = RestoreOperation::new(filename);
        op.advance(RestorePhase::Validating)?;
        let artifact = match self.validate(filename) {
            Ok(artifact) => artifact,
            Err(err) => return Err(op.fail(err)),
        };

        op.advance(RestorePhase::PreBackup)?;
        match self.manager.create_backup(BackupReason::PreRestore) {
            Ok(pre) => op.pre_restore = Some(pre.filename),
            Err(err) => return Err(op.fail(err)),
        }

        op.advance(RestorePhase::Restoring)?;
        let staging = match self.stage(&artifact) {
            Ok(staging) => staging,
            Err(err) => return Err(op.fail(err)),
        };

        op.advance(RestorePhase::Verifying)?;
        match self.verify_and_promote(staging.path()) {
            Ok(rows) => op.reference_rows = Some(rows),
            Err(err) => return Err(op.fail(err)),
        }

        op.advance(RestorePhase::Done)?;
        info!(
            artifact = %op.artifact,
            pre_restore = ?op.pre_restore,
            reference_rows = ?op.reference_rows,
            "restore complete"
        );
        Ok(op)
    }

    fn validate(&self, filename: &str) -> Result<BackupArtifact> {
        let store = self.manager.store();
        let artifact = store.get(filename)?;
        if artifact.size_bytes == 0 {
            return Err(ShelfError::ArtifactNotFound(filename.to_string()));
        }
        store.verify(&artifact)?;
        Ok(artifact)
    }

    /// Replay the artifact into a fresh staging database that is deleted
    /// when the returned handle drops.
    fn stage(&self, artifact: &BackupArtifact) -> Result<tempfile::NamedTempFile> {
        let store = self.manager.store();
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .suffix(".db")
            .tempfile_in(store.temp_dir())?;
        self.manager
            .dump()
            .apply_dump(&store.artifact_path(&artifact.filename), staging.path())?;
        Ok(staging)
    }

    fn verify_and_promote(&self, staging_path: &std::path::Path) -> Result<u64> {
        let staging = open_existing(staging_path)?;
        integrity_check(&staging)?;

        let table = &self.config.reference_table;
        let staged_rows = row_count(&staging, table)?.ok_or_else(|| {
            ShelfError::RestoreVerification(format!("reference table {table} missing from backup"))
        })?;
        if staged_rows < self.config.min_reference_rows {
            return Err(ShelfError::RestoreVerification(format!(
                "reference table {table} has {staged_rows} rows, expected at least {}",
                self.config.min_reference_rows
            )));
        }

        let mut live = Connection::open(&self.database)?;
        live.busy_timeout(Duration::from_secs(5))?;
        promote(&staging, &mut live)?;

        let live_rows = row_count(&live, table)?.unwrap_or(0);
        if live_rows != staged_rows {
            return Err(ShelfError::RestoreVerification(format!(
                "reference table {table} has {live_rows} rows after promotion, staged {staged_rows}"
            )));
        }
        Ok(live_rows)
    }
}

/// Copy every page of `staging` over `live` in a single backup step.
/// Anything short of `Done` means the live database was not replaced.
fn promote(staging: &Connection, live: &mut Connection) -> Result<()> {
    let backup = Backup::new(staging, live)?;
    match backup.step(-1)? {
        StepResult::Done => Ok(()),
        StepResult::Busy | StepResult::Locked => Err(ShelfError::Conflict {
            operation: "restore".to_string(),
            holder: Some("another connection holds the live database".to_string()),
        }),
        other => Err(ShelfError::RestoreVerification(format!(
            "promotion stopped early ({other:?}); live database left as it was"
        ))),
    }
}
