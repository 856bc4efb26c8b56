//! CLI module - Command-line interface definitions and handlers
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod commands;
pub mod output;

/// shelfkeeper - back up, restore and migrate the inventory database
#[derive(Parser, Debug)]
#[command(name = "shelf")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding the database, backups and config.toml
    #[arg(long, global = true, env = "SHELF_ROOT", default_value = ".shelf")]
    pub root: PathBuf,

    /// Config file path (default: <root>/config.toml layered over ~/.config/shelf/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit the `{success, data|error}` JSON envelope on stdout
    #[arg(long, short = 'm', global = true, alias = "machine")]
    pub json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress log output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create, list, restore and prune database backups
    Backup(commands::backup::BackupArgs),

    /// Copy a legacy JSON inventory export into the database
    Migrate(commands::migrate::MigrateArgs),
}
