//! Advisory file locks serializing backup, restore and migration runs.
//!
//! Each operation kind owns one lock file under `<dir>/.locks/`. The OS-level
//! `flock` (through fs2) enforces exclusion; the JSON written into the file
//! only describes the holder for error messages and for `prune`, which reads
//! the restore lock to learn which artifact is being restored.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ShelfError};

const LOCK_DIR: &str = ".locks";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Backup,
    Restore,
    Migration,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Migration => "migration",
        }
    }

    fn busy_error(self, holder: Option<&LockHolder>) -> ShelfError {
        match (self, holder) {
            (Self::Restore, Some(holder)) => ShelfError::RestoreInProgress(holder.describe()),
            (Self::Restore, None) => ShelfError::RestoreInProgress("unknown holder".to_string()),
            (kind, holder) => ShelfError::Conflict {
                operation: kind.as_str().to_string(),
                holder: holder.map(LockHolder::describe),
            },
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Information about the current lock holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    pub kind: OperationKind,
    /// What the holder is working on, e.g. the artifact being restored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl LockHolder {
    fn current(kind: OperationKind, subject: Option<&str>) -> Self {
        Self {
            pid: std::process::id(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            acquired_at: Utc::now(),
            kind,
            subject: subject.map(str::to_string),
        }
    }

    fn describe(&self) -> String {
        let mut out = format!(
            "pid {} on {} since {}",
            self.pid,
            self.hostname,
            self.acquired_at.to_rfc3339()
        );
        if let Some(subject) = &self.subject {
            out.push_str(&format!(", working on {subject}"));
        }
        out
    }
}

/// An exclusive lock for one operation kind, released on drop.
#[derive(Debug)]
pub struct OperationLock {
    file: File,
    path: PathBuf,
    kind: OperationKind,
}

impl OperationLock {
    pub fn lock_path(dir: &Path, kind: OperationKind) -> PathBuf {
        dir.join(LOCK_DIR).join(format!("{}.lock", kind.as_str()))
    }

    /// Acquire without waiting. A held lock yields `Conflict` (or
    /// `RestoreInProgress` for the restore lock).
    pub fn try_acquire(dir: &Path, kind: OperationKind, subject: Option<&str>) -> Result<Self> {
        match Self::try_lock(dir, kind, subject)? {
            Some(lock) => Ok(lock),
            None => Err(kind.busy_error(Self::holder(dir, kind)?.as_ref())),
        }
    }

    /// Poll for the lock until `timeout` elapses. A zero timeout behaves like
    /// [`OperationLock::try_acquire`].
    pub fn acquire_timeout(
        dir: &Path,
        kind: OperationKind,
        subject: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let start = Instant::now();
        loop {
            if let Some(lock) = Self::try_lock(dir, kind, subject)? {
                return Ok(lock);
            }
            if start.elapsed() >= timeout {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        if !timeout.is_zero() {
            warn!(kind = %kind, waited = ?start.elapsed(), "timed out waiting for lock");
        }
        Err(kind.busy_error(Self::holder(dir, kind)?.as_ref()))
    }

    /// Current holder as recorded in the lock file, if the lock is held.
    ///
    /// The holder record is cleared on release; a record left behind by a
    /// process that no longer exists is treated as stale.
    pub fn holder(dir: &Path, kind: OperationKind) -> Result<Option<LockHolder>> {
        let path = Self::lock_path(dir, kind);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        let holder: LockHolder = match serde_json::from_str(&content) {
            Ok(holder) => holder,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "unreadable lock holder");
                return Ok(None);
            }
        };

        #[cfg(target_os = "linux")]
        {
            if !Path::new(&format!("/proc/{}", holder.pid)).exists() {
                return Ok(None);
            }
        }

        Ok(Some(holder))
    }

    /// Whether any handle holds the lock, whatever the holder record says.
    pub fn is_held(dir: &Path, kind: OperationKind) -> Result<bool> {
        let path = Self::lock_path(dir, kind);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        match FileExt::try_lock_shared(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                Ok(false)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(true),
            Err(e) => Err(ShelfError::LockFailed(format!("checking {}: {e}", path.display()))),
        }
    }

    /// Like [`OperationLock::holder`], but a lock that is held before its
    /// record is written is waited on for up to `timeout`. A record that
    /// never appears yields the busy error for `kind`.
    pub fn wait_for_holder(
        dir: &Path,
        kind: OperationKind,
        timeout: Duration,
    ) -> Result<Option<LockHolder>> {
        let start = Instant::now();
        loop {
            if let Some(holder) = Self::holder(dir, kind)? {
                return Ok(Some(holder));
            }
            if !Self::is_held(dir, kind)? {
                return Ok(None);
            }
            if start.elapsed() >= timeout {
                return Err(kind.busy_error(None));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_lock(dir: &Path, kind: OperationKind, subject: Option<&str>) -> Result<Option<Self>> {
        let path = Self::lock_path(dir, kind);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ShelfError::LockFailed(format!("open {}: {e}", path.display())))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!(kind = %kind, "lock held elsewhere");
                return Ok(None);
            }
            Err(e) => {
                return Err(ShelfError::LockFailed(format!(
                    "lock {}: {e}",
                    path.display()
                )));
            }
        }

        let holder = LockHolder::current(kind, subject);
        let holder_json = serde_json::to_vec(&holder)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&holder_json)?;
        file.flush()?;

        debug!(kind = %kind, path = %path.display(), "acquired lock");
        Ok(Some(Self { file, path, kind }))
    }
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("failed to release {} lock: {}", self.kind, e);
        }
        debug!("released {} lock", self.kind);
    }
}
