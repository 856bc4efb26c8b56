//! Backup artifact naming and metadata.
//!
//! An artifact is a single SQL text dump named
//! `backup-<YYYY-MM-DDTHH-MM-SS-mmmZ>-<reason>.sql`. The stamp is fixed width,
//! so sorting filenames sorts artifacts by creation time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShelfError};

const PREFIX: &str = "backup-";
const EXTENSION: &str = ".sql";
const SIDECAR_EXTENSION: &str = ".json";
const STAMP_LEN: usize = "2026-01-01T00-00-00-000Z".len();
const STAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupReason {
    Manual,
    Scheduled,
    PreRestore,
}

impl BackupReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::PreRestore => "pre-restore",
        }
    }

    /// Pre-restore snapshots have their own retention count.
    pub const fn is_pre_restore(self) -> bool {
        matches!(self, Self::PreRestore)
    }
}

impl fmt::Display for BackupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupReason {
    type Err = ShelfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(Self::Manual),
            "scheduled" => Ok(Self::Scheduled),
            "pre-restore" => Ok(Self::PreRestore),
            other => Err(ShelfError::ValidationFailed(format!(
                "unknown backup reason: {other}"
            ))),
        }
    }
}

/// A registered backup. Serialized as-is into the `<filename>.json` sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub reason: BackupReason,
    /// Lowercase hex SHA-256 of the artifact bytes
    pub checksum: String,
}

impl BackupArtifact {
    pub fn sidecar_name(&self) -> String {
        sidecar_name(&self.filename)
    }
}

pub fn sidecar_name(filename: &str) -> String {
    format!("{filename}{SIDECAR_EXTENSION}")
}

/// Build the artifact filename for a creation time and reason.
pub fn artifact_filename(created_at: DateTime<Utc>, reason: BackupReason) -> String {
    format!("{PREFIX}{}-{reason}{EXTENSION}", format_stamp(created_at))
}

fn format_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

/// Parse an artifact filename back into its stamp and reason. Returns `None`
/// for anything that does not follow the naming scheme.
pub fn parse_filename(filename: &str) -> Option<(DateTime<Utc>, BackupReason)> {
    let body = filename.strip_prefix(PREFIX)?.strip_suffix(EXTENSION)?;
    if body.len() <= STAMP_LEN || !body.is_char_boundary(STAMP_LEN) {
        return None;
    }
    let (stamp, rest) = body.split_at(STAMP_LEN);
    let reason = rest.strip_prefix('-')?.parse().ok()?;
    Some((parse_stamp(stamp)?, reason))
}

fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    // "YYYY-MM-DDTHH-MM-SS" "-mmm" "Z"
    let (seconds, millis) = stamp.split_at(STAMP_LEN - 5);
    let millis = millis.strip_prefix('-')?.strip_suffix('Z')?;
    if millis.len() != 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(seconds, STAMP_FORMAT).ok()?;
    let millis: i64 = millis.parse().ok()?;
    Some(Utc.from_utc_datetime(&naive) + ChronoDuration::milliseconds(millis))
}

/// Reject names that could escape the backup directory or that are not
/// artifact names at all.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty()
        || filename.contains(['/', '\\'])
        || filename.contains("..")
        || filename.starts_with('.')
    {
        return Err(ShelfError::ValidationFailed(format!(
            "invalid artifact name: {filename:?}"
        )));
    }
    if parse_filename(filename).is_none() {
        return Err(ShelfError::ArtifactNotFound(filename.to_string()));
    }
    Ok(())
}

/// Creation time for the next artifact: now at millisecond precision, but
/// always strictly after `newest` so names never collide and listing order
/// follows creation order even if the clock stalls or steps back.
pub fn next_stamp(now: DateTime<Utc>, newest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(3);
    match newest {
        Some(newest) if now <= newest => newest.trunc_subsecs(3) + ChronoDuration::milliseconds(1),
        _ => now,
    }
}
