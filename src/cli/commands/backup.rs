//! shelf backup - snapshot, list, prune and restore the inventory database.

use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;

use crate::app::AppContext;
use crate::backup::{BackupArtifact, BackupReason, PruneReport, RestoreOperation};
use crate::cli::output::{HumanLayout, emit_human, emit_ok, format_bytes};
use crate::error::{Result, ShelfError};
use crate::storage::{OperationKind, OperationLock};

#[derive(Args, Debug)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupCommand,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Create a new backup artifact
    Create(BackupCreateArgs),
    /// List available backups, newest first
    List(BackupListArgs),
    /// Replace the live database with a backup
    Restore(BackupRestoreArgs),
    /// Delete backups beyond the retention count
    Prune(BackupPruneArgs),
    /// Delete one backup
    Delete(BackupDeleteArgs),
}

/// Reasons an operator may pick by hand. Pre-restore artifacts are only
/// ever taken by the restore itself.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum CreateReason {
    #[default]
    Manual,
    Scheduled,
}

impl From<CreateReason> for BackupReason {
    fn from(reason: CreateReason) -> Self {
        match reason {
            CreateReason::Manual => Self::Manual,
            CreateReason::Scheduled => Self::Scheduled,
        }
    }
}

#[derive(Args, Debug)]
pub struct BackupCreateArgs {
    #[arg(long, value_enum, default_value_t = CreateReason::Manual)]
    pub reason: CreateReason,
}

#[derive(Args, Debug)]
pub struct BackupListArgs {
    /// Maximum number of backups to show
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct BackupRestoreArgs {
    /// Artifact filename to restore
    pub filename: Option<String>,

    /// Restore the most recent backup
    #[arg(long)]
    pub latest: bool,

    /// Apply restore (required)
    #[arg(long)]
    pub approve: bool,
}

#[derive(Args, Debug)]
pub struct BackupPruneArgs {
    /// Manual and scheduled backups to keep (default: backup.max_kept)
    #[arg(long)]
    pub keep: Option<usize>,
}

#[derive(Args, Debug)]
pub struct BackupDeleteArgs {
    /// Artifact filename to delete
    pub filename: String,

    /// Apply deletion (required)
    #[arg(long)]
    pub approve: bool,
}

#[derive(Serialize)]
struct BackupList {
    count: usize,
    total: usize,
    backups: Vec<BackupArtifact>,
}

pub fn run(ctx: &AppContext, args: &BackupArgs) -> Result<()> {
    match &args.command {
        BackupCommand::Create(create) => run_create(ctx, create),
        BackupCommand::List(list) => run_list(ctx, list),
        BackupCommand::Restore(restore) => run_restore(ctx, restore),
        BackupCommand::Prune(prune) => run_prune(ctx, prune),
        BackupCommand::Delete(delete) => run_delete(ctx, delete),
    }
}

fn run_create(ctx: &AppContext, args: &BackupCreateArgs) -> Result<()> {
    let manager = ctx.backup_manager()?;
    let artifact = manager.create_backup(args.reason.into())?;

    if ctx.json {
        return emit_ok(&artifact);
    }

    let mut layout = HumanLayout::new();
    layout.title("Backup created");
    push_artifact(&mut layout, &artifact);
    layout.kv("Path", &manager.store().artifact_path(&artifact.filename).display().to_string());
    emit_human(layout);
    Ok(())
}

fn run_list(ctx: &AppContext, args: &BackupListArgs) -> Result<()> {
    let store = ctx.backup_store()?;
    let all = store.list()?;
    let total = all.len();
    let backups: Vec<_> = all.into_iter().take(args.limit).collect();

    if ctx.json {
        return emit_ok(BackupList {
            count: backups.len(),
            total,
            backups,
        });
    }

    if backups.is_empty() {
        println!("No backups found.");
        return Ok(());
    }

    let mut layout = HumanLayout::new();
    layout.title(&format!("Backups ({} of {total})", backups.len()));
    for artifact in &backups {
        layout.bullet(&format!(
            "{}  {:>10}  {}",
            artifact.filename,
            format_bytes(artifact.size_bytes),
            artifact.reason
        ));
    }
    emit_human(layout);
    Ok(())
}

fn run_restore(ctx: &AppContext, args: &BackupRestoreArgs) -> Result<()> {
    if !args.approve {
        return Err(ShelfError::ApprovalRequired(
            "backup restore requires --approve".to_string(),
        ));
    }

    let manager = ctx.backup_manager()?;
    let filename = match (&args.filename, args.latest) {
        (Some(name), false) => name.clone(),
        (None, true) => manager
            .store()
            .list()?
            .into_iter()
            .next()
            .map(|artifact| artifact.filename)
            .ok_or_else(|| ShelfError::NotFound("no backups found".to_string()))?,
        (Some(_), true) => {
            return Err(ShelfError::ValidationFailed(
                "cannot use both filename and --latest".to_string(),
            ));
        }
        (None, false) => {
            return Err(ShelfError::ValidationFailed(
                "restore requires a filename or --latest".to_string(),
            ));
        }
    };

    let operation = ctx.restore_coordinator(&manager).restore(&filename)?;

    if ctx.json {
        return emit_ok(&operation);
    }
    emit_human(restore_layout(&operation));
    Ok(())
}

fn run_prune(ctx: &AppContext, args: &BackupPruneArgs) -> Result<()> {
    if args.keep == Some(0) {
        return Err(ShelfError::ValidationFailed(
            "--keep must be at least 1".to_string(),
        ));
    }
    let store = ctx.backup_store()?;
    // Serialized with create and its auto-prune.
    let _lock = OperationLock::acquire_timeout(
        store.dir(),
        OperationKind::Backup,
        Some("prune"),
        ctx.config.backup.lock_wait,
    )?;
    let report = store.apply_retention(
        args.keep.unwrap_or(ctx.config.backup.max_kept),
        ctx.config.backup.keep_pre_restore,
    )?;

    if ctx.json {
        return emit_ok(&report);
    }
    emit_human(prune_layout(&report));
    Ok(())
}

fn run_delete(ctx: &AppContext, args: &BackupDeleteArgs) -> Result<()> {
    if !args.approve {
        return Err(ShelfError::ApprovalRequired(
            "backup delete requires --approve".to_string(),
        ));
    }
    let artifact = ctx.backup_store()?.delete(&args.filename)?;

    if ctx.json {
        return emit_ok(&artifact);
    }
    println!("Deleted backup: {}", artifact.filename);
    Ok(())
}

fn push_artifact(layout: &mut HumanLayout, artifact: &BackupArtifact) {
    layout
        .kv("Filename", &artifact.filename)
        .kv("Created", &artifact.created_at.to_rfc3339())
        .kv("Reason", artifact.reason.as_str())
        .kv("Size", &format_bytes(artifact.size_bytes))
        .kv("SHA-256", &artifact.checksum);
}

fn restore_layout(operation: &RestoreOperation) -> HumanLayout {
    let mut layout = HumanLayout::new();
    layout.title("Restore complete").kv("Artifact", &operation.artifact);
    if let Some(pre) = &operation.pre_restore {
        layout.kv("Safety backup", pre);
    }
    if let Some(rows) = operation.reference_rows {
        layout.kv("Reference rows", &rows.to_string());
    }
    if let Some(finished) = operation.finished_at {
        let elapsed = finished - operation.started_at;
        layout.kv("Elapsed", &format!("{} ms", elapsed.num_milliseconds()));
    }
    layout
}

fn prune_layout(report: &PruneReport) -> HumanLayout {
    let mut layout = HumanLayout::new();
    layout
        .title("Prune complete")
        .kv("Deleted", &report.deleted.len().to_string())
        .kv("Kept", &report.kept.to_string());
    if let Some(pinned) = &report.pinned {
        layout.kv("Pinned", pinned);
    }
    for name in &report.deleted {
        layout.bullet(name);
    }
    layout
}
