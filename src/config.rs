use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShelfError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub dump: DumpConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
}

impl Config {
    pub fn load(explicit_path: Option<&Path>, root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("SHELF_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = explicit {
            let patch = Self::load_patch(&path)?.ok_or_else(|| {
                ShelfError::Config(format!("config file not found: {}", path.display()))
            })?;
            config.merge_patch(patch);
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            if let Some(local) = Self::load_patch(&root.join("config.toml"))? {
                config.merge_patch(local);
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        let Some(dir) = dirs::config_dir() else {
            return Ok(None);
        };
        Self::load_patch(&dir.join("shelf/config.toml"))
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| ShelfError::Config(format!("read config {}: {err}", path.display())))?;
        let patch = toml::from_str(&raw)
            .map_err(|err| ShelfError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.database {
            self.database.merge(patch);
        }
        if let Some(patch) = patch.backup {
            self.backup.merge(patch);
        }
        if let Some(patch) = patch.dump {
            self.dump.merge(patch);
        }
        if let Some(patch) = patch.restore {
            self.restore.merge(patch);
        }
    }

    /// Apply `SHELF_*` overrides read through `lookup`.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SHELF_DATABASE_PATH") {
            self.database.path = PathBuf::from(value);
        }
        if let Some(value) = lookup("SHELF_BACKUP_DIR") {
            self.backup.dir = PathBuf::from(value);
        }
        if let Some(value) = parse_var::<usize>(&lookup, "SHELF_BACKUP_MAX_KEPT")? {
            self.backup.max_kept = value;
        }
        if let Some(value) = parse_var::<usize>(&lookup, "SHELF_BACKUP_KEEP_PRE_RESTORE")? {
            self.backup.keep_pre_restore = value;
        }
        if let Some(value) = lookup("SHELF_BACKUP_AUTO_PRUNE") {
            self.backup.auto_prune = parse_bool(&value);
        }
        if let Some(value) = parse_var::<u64>(&lookup, "SHELF_DUMP_TIMEOUT_SECS")? {
            self.dump.timeout = Duration::from_secs(value);
        }
        if let Some(value) = lookup("SHELF_SQLITE3") {
            self.dump.sqlite3_path = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.backup.max_kept == 0 {
            return Err(ShelfError::Config(
                "backup.max_kept must be at least 1".to_string(),
            ));
        }
        if self.backup.keep_pre_restore == 0 {
            return Err(ShelfError::Config(
                "backup.keep_pre_restore must be at least 1".to_string(),
            ));
        }
        if self.dump.timeout.is_zero() {
            return Err(ShelfError::Config(
                "dump.timeout must be greater than zero".to_string(),
            ));
        }
        if self.dump.sqlite3_path.trim().is_empty() {
            return Err(ShelfError::MissingConfig("dump.sqlite3_path".to_string()));
        }
        if !is_plain_identifier(&self.restore.reference_table) {
            return Err(ShelfError::Config(format!(
                "restore.reference_table is not a plain identifier: {:?}",
                self.restore.reference_table
            )));
        }
        Ok(())
    }

    /// Database file, resolved against `root` when relative.
    #[must_use]
    pub fn database_path(&self, root: &Path) -> PathBuf {
        resolve(root, &self.database.path)
    }

    /// Backup directory, resolved against `root` when relative.
    #[must_use]
    pub fn backup_dir(&self, root: &Path) -> PathBuf {
        resolve(root, &self.backup.dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl DatabaseConfig {
    fn merge(&mut self, patch: DatabasePatch) {
        if let Some(value) = patch.path {
            self.path = value;
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("shelf.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub dir: PathBuf,
    /// Manual and scheduled artifacts kept by retention
    pub max_kept: usize,
    /// Pre-restore artifacts kept by retention (separate class)
    pub keep_pre_restore: usize,
    pub auto_prune: bool,
    /// How long `create` waits for a concurrent backup before failing
    #[serde(with = "humantime_serde")]
    pub lock_wait: Duration,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("backups"),
            max_kept: 10,
            keep_pre_restore: 3,
            auto_prune: true,
            lock_wait: Duration::ZERO,
        }
    }
}

impl BackupConfig {
    fn merge(&mut self, patch: BackupPatch) {
        if let Some(value) = patch.dir {
            self.dir = value;
        }
        if let Some(value) = patch.max_kept {
            self.max_kept = value;
        }
        if let Some(value) = patch.keep_pre_restore {
            self.keep_pre_restore = value;
        }
        if let Some(value) = patch.auto_prune {
            self.auto_prune = value;
        }
        if let Some(value) = patch.lock_wait {
            self.lock_wait = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    pub sqlite3_path: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Time between the graceful stop request and a forced kill
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            sqlite3_path: "sqlite3".to_string(),
            timeout: Duration::from_secs(300),
            grace_period: Duration::from_secs(10),
        }
    }
}

impl DumpConfig {
    fn merge(&mut self, patch: DumpPatch) {
        if let Some(value) = patch.sqlite3_path {
            self.sqlite3_path = value;
        }
        if let Some(value) = patch.timeout {
            self.timeout = value;
        }
        if let Some(value) = patch.grace_period {
            self.grace_period = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub reference_table: String,
    pub min_reference_rows: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            reference_table: "stores".to_string(),
            min_reference_rows: 0,
        }
    }
}

impl RestoreConfig {
    fn merge(&mut self, patch: RestorePatch) {
        if let Some(value) = patch.reference_table {
            self.reference_table = value;
        }
        if let Some(value) = patch.min_reference_rows {
            self.min_reference_rows = value;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub database: Option<DatabasePatch>,
    pub backup: Option<BackupPatch>,
    pub dump: Option<DumpPatch>,
    pub restore: Option<RestorePatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DatabasePatch {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BackupPatch {
    pub dir: Option<PathBuf>,
    pub max_kept: Option<usize>,
    pub keep_pre_restore: Option<usize>,
    pub auto_prune: Option<bool>,
    #[serde(default, with = "humantime_serde::option")]
    pub lock_wait: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DumpPatch {
    pub sqlite3_path: Option<String>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    pub grace_period: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RestorePatch {
    pub reference_table: Option<String>,
    pub min_reference_rows: Option<u64>,
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, safe to interpolate into a quoted SQL identifier.
pub(crate) fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| ShelfError::Config(format!("invalid {key} value {value}: {err}"))),
        None => Ok(None),
    }
}
