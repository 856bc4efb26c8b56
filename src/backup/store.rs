//! Filesystem catalog of backup artifacts.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Result, ShelfError};
use crate::storage::{OperationKind, OperationLock};

use super::artifact::{
    BackupArtifact, BackupReason, parse_filename, sidecar_name, validate_filename,
};

const TEMP_DIR: &str = ".tmp";
/// How long to wait for a freshly locked restore to name its artifact.
const PIN_WAIT: Duration = Duration::from_secs(1);

/// Which retention class a prune pass applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    /// Manual and scheduled artifacts
    Regular,
    PreRestore,
}

impl RetentionClass {
    fn includes(self, reason: BackupReason) -> bool {
        match self {
            Self::Regular => !reason.is_pre_restore(),
            Self::PreRestore => reason.is_pre_restore(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub kept: usize,
    /// Artifact spared because a restore is reading it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<String>,
}

impl PruneReport {
    pub fn merge(&mut self, other: Self) {
        self.deleted.extend(other.deleted);
        self.kept += other.kept;
        if self.pinned.is_none() {
            self.pinned = other.pinned;
        }
    }
}

/// Catalog over one backup directory.
///
/// An artifact is listed only once its sidecar exists and agrees with the
/// file on disk, so a half-written dump is never visible.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(TEMP_DIR))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scratch directory on the same filesystem as the artifacts.
    pub fn temp_dir(&self) -> PathBuf {
        self.dir.join(TEMP_DIR)
    }

    pub fn artifact_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Registered artifacts, newest first.
    pub fn list(&self) -> Result<Vec<BackupArtifact>> {
        let mut artifacts = Vec::new();
        for filename in self.artifact_names()? {
            match self.load(&filename) {
                Ok(artifact) => artifacts.push(artifact),
                Err(reason) => {
                    warn!(filename = %filename, reason = %reason, "excluding backup from catalog");
                }
            }
        }
        artifacts.sort_by(|a, b| b.filename.cmp(&a.filename));
        Ok(artifacts)
    }

    /// One registered artifact by filename.
    pub fn get(&self, filename: &str) -> Result<BackupArtifact> {
        validate_filename(filename)?;
        self.load(filename).map_err(|reason| {
            debug!(filename, reason = %reason, "artifact lookup failed");
            ShelfError::ArtifactNotFound(filename.to_string())
        })
    }

    /// Creation time of the newest artifact-named file, registered or not.
    pub fn newest_stamp(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .artifact_names()?
            .iter()
            .filter_map(|name| parse_filename(name))
            .map(|(stamp, _)| stamp)
            .max())
    }

    /// Record `artifact` as complete by writing its sidecar. The artifact
    /// file must already be in place with the recorded size.
    pub fn register(&self, artifact: &BackupArtifact) -> Result<()> {
        validate_filename(&artifact.filename)?;
        let path = self.artifact_path(&artifact.filename);
        let size = fs::metadata(&path)
            .map_err(|_| ShelfError::ArtifactNotFound(artifact.filename.clone()))?
            .len();
        if size != artifact.size_bytes {
            return Err(ShelfError::ValidationFailed(format!(
                "{} is {size} bytes on disk, {} recorded",
                artifact.filename, artifact.size_bytes
            )));
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".sidecar-")
            .suffix(".json")
            .tempfile_in(self.temp_dir())?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), artifact)?;
        tmp.as_file_mut().write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(artifact.sidecar_name()))
            .map_err(|err| ShelfError::Io(err.error))?;

        debug!(filename = %artifact.filename, "registered backup");
        Ok(())
    }

    /// Recompute the checksum and compare it with the registration.
    pub fn verify(&self, artifact: &BackupArtifact) -> Result<()> {
        let (actual, _) = checksum_file(&self.artifact_path(&artifact.filename))?;
        if actual == artifact.checksum {
            Ok(())
        } else {
            Err(ShelfError::ArtifactCorrupted {
                filename: artifact.filename.clone(),
                expected: artifact.checksum.clone(),
                actual,
            })
        }
    }

    /// Keep the `max_kept` newest manual and scheduled artifacts and delete
    /// the rest.
    pub fn prune(&self, max_kept: usize) -> Result<PruneReport> {
        self.prune_class(RetentionClass::Regular, max_kept)
    }

    /// Retention for one class. The artifact an in-flight restore is reading
    /// is never deleted.
    pub fn prune_class(&self, class: RetentionClass, keep: usize) -> Result<PruneReport> {
        let pinned = self.pinned_artifact()?;
        let mut report = PruneReport::default();

        let candidates = self
            .list()?
            .into_iter()
            .filter(|artifact| class.includes(artifact.reason));
        for (idx, artifact) in candidates.enumerate() {
            if idx < keep {
                report.kept += 1;
                continue;
            }
            if pinned.as_deref() == Some(artifact.filename.as_str()) {
                info!(filename = %artifact.filename, "keeping backup pinned by running restore");
                report.kept += 1;
                report.pinned = Some(artifact.filename);
                continue;
            }
            self.remove(&artifact.filename)?;
            info!(filename = %artifact.filename, "pruned backup");
            report.deleted.push(artifact.filename);
        }
        Ok(report)
    }

    /// Prune both retention classes in one pass.
    pub fn apply_retention(&self, max_kept: usize, keep_pre_restore: usize) -> Result<PruneReport> {
        let mut report = self.prune(max_kept)?;
        report.merge(self.prune_class(RetentionClass::PreRestore, keep_pre_restore)?);
        Ok(report)
    }

    /// Explicitly delete one artifact and its registration.
    pub fn delete(&self, filename: &str) -> Result<BackupArtifact> {
        let artifact = self.get(filename)?;
        if self.pinned_artifact()?.as_deref() == Some(filename) {
            return Err(ShelfError::RestoreInProgress(format!(
                "{filename} is being restored"
            )));
        }
        self.remove(filename)?;
        info!(filename, "deleted backup");
        Ok(artifact)
    }

    /// Artifact named by the restore lock. A restore that has locked but not
    /// yet recorded its artifact is waited on briefly; if it stays silent
    /// the caller gets `RestoreInProgress` rather than an empty pin.
    fn pinned_artifact(&self) -> Result<Option<String>> {
        Ok(
            OperationLock::wait_for_holder(&self.dir, OperationKind::Restore, PIN_WAIT)?
                .and_then(|holder| holder.subject),
        )
    }

    /// Unregister first so listing drops the artifact before the file goes.
    fn remove(&self, filename: &str) -> Result<()> {
        remove_if_exists(&self.dir.join(sidecar_name(filename)))?;
        remove_if_exists(&self.artifact_path(filename))
    }

    fn artifact_names(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if parse_filename(&name).is_some() {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Load and cross-check one artifact; the error string says why it is
    /// not usable.
    fn load(&self, filename: &str) -> std::result::Result<BackupArtifact, String> {
        let (stamp, reason) =
            parse_filename(filename).ok_or_else(|| "name does not follow the scheme".to_string())?;
        let size = fs::metadata(self.artifact_path(filename))
            .map_err(|err| format!("artifact unreadable: {err}"))?
            .len();
        if size == 0 {
            return Err("artifact is empty".to_string());
        }

        let raw = fs::read_to_string(self.dir.join(sidecar_name(filename)))
            .map_err(|err| format!("not registered: {err}"))?;
        let artifact: BackupArtifact =
            serde_json::from_str(&raw).map_err(|err| format!("sidecar unreadable: {err}"))?;

        if artifact.filename != filename
            || artifact.reason != reason
            || artifact.created_at != stamp
        {
            return Err("sidecar describes a different artifact".to_string());
        }
        if artifact.size_bytes != size {
            return Err(format!(
                "size mismatch: {size} bytes on disk, {} registered",
                artifact.size_bytes
            ));
        }
        Ok(artifact)
    }
}

/// SHA-256 (lowercase hex) and length of a file.
pub fn checksum_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
