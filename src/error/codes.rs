//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 1xx: Backup errors
//! - 2xx: Restore errors
//! - 3xx: Config errors
//! - 4xx: Migration errors
//! - 5xx: Lock errors
//! - 6xx: Storage errors
//! - 8xx: Validation errors
//! - 9xx: Internal errors

use serde::{Deserialize, Serialize};

/// Standardized error codes for the JSON envelope.
///
/// Each variant maps to a numeric code (e.g., `ArtifactNotFound` -> E201).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Backup errors (1xx)
    // ========================================
    /// E101: The dump utility exited with a non-zero status
    ExternalToolFailed,
    /// E102: The dump utility could not be started
    ExternalToolUnavailable,
    /// E103: The dump utility exceeded its deadline
    ExternalToolTimeout,

    // ========================================
    // Restore errors (2xx)
    // ========================================
    /// E201: Requested artifact is missing, empty or unregistered
    ArtifactNotFound,
    /// E202: Artifact bytes no longer match the registered checksum
    ArtifactCorrupted,
    /// E203: Restored database failed post-condition checks
    RestoreVerificationFailed,

    // ========================================
    // Config errors (3xx)
    // ========================================
    /// E302: Config file has invalid syntax or values
    ConfigInvalid,
    /// E304: Required config value is missing
    ConfigMissingRequired,

    // ========================================
    // Migration errors (4xx)
    // ========================================
    /// E401: Migration aborted because the database became unreachable
    MigrationAborted,
    /// E402: A single legacy record could not be migrated
    MalformedRecord,
    /// E403: The legacy document could not be read at all
    SourceUnreadable,

    // ========================================
    // Lock errors (5xx)
    // ========================================
    /// E501: Another operation of the same kind is running
    OperationConflict,
    /// E502: A restore is already running
    RestoreInProgress,
    /// E503: The lock file could not be opened or locked
    LockFailed,

    // ========================================
    // Storage errors (6xx)
    // ========================================
    /// E604: Database operation failed
    DatabaseError,
    /// E605: Serialization/deserialization failed
    SerializationError,
    /// E606: IO operation failed
    IoError,

    // ========================================
    // Validation errors (8xx)
    // ========================================
    /// E801: Input failed validation
    ValidationFailed,
    /// E802: Operation requires explicit approval
    ApprovalRequired,

    // ========================================
    // Internal errors (9xx)
    // ========================================
    /// E904: Internal assertion failed
    AssertionFailed,
    /// E905: Generic not found (catch-all)
    NotFound,
}

impl ErrorCode {
    /// Get the numeric error code (e.g., `ArtifactNotFound` -> 201).
    #[must_use]
    pub const fn numeric(&self) -> u16 {
        match self {
            Self::ExternalToolFailed => 101,
            Self::ExternalToolUnavailable => 102,
            Self::ExternalToolTimeout => 103,

            Self::ArtifactNotFound => 201,
            Self::ArtifactCorrupted => 202,
            Self::RestoreVerificationFailed => 203,

            Self::ConfigInvalid => 302,
            Self::ConfigMissingRequired => 304,

            Self::MigrationAborted => 401,
            Self::MalformedRecord => 402,
            Self::SourceUnreadable => 403,

            Self::OperationConflict => 501,
            Self::RestoreInProgress => 502,
            Self::LockFailed => 503,

            Self::DatabaseError => 604,
            Self::SerializationError => 605,
            Self::IoError => 606,

            Self::ValidationFailed => 801,
            Self::ApprovalRequired => 802,

            Self::AssertionFailed => 904,
            Self::NotFound => 905,
        }
    }

    /// Get the error code as a formatted string (e.g., "E201").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("E{}", self.numeric())
    }

    /// Get the default suggestion for this error code.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::ExternalToolFailed => "Inspect the stderr tail in the error context; the dump utility rejected the database or artifact",
            Self::ExternalToolUnavailable => "Install the sqlite3 command-line shell or set [dump] sqlite3_path in config",
            Self::ExternalToolTimeout => "Retry the operation, or raise [dump] timeout for large databases",

            Self::ArtifactNotFound => "Run `shelf backup list` to see registered artifacts",
            Self::ArtifactCorrupted => "The artifact changed on disk after it was registered. Pick an older artifact",
            Self::RestoreVerificationFailed => "The live database was not replaced. The pre-restore artifact named in the error context is available for manual recovery",

            Self::ConfigInvalid => "Check TOML syntax and values in the config file",
            Self::ConfigMissingRequired => "Set the required config value in config.toml or the environment",

            Self::MigrationAborted => "Check that the database file is reachable and writable, then re-run; already migrated rows are skipped",
            Self::MalformedRecord => "Fix the record in the legacy file and re-run the migration",
            Self::SourceUnreadable => "Check that the legacy file exists and contains a JSON object",

            Self::OperationConflict => "Another operation of the same kind is running. Wait for it to finish and retry",
            Self::RestoreInProgress => "A restore is already running. Restores are not queued; retry once it finishes",
            Self::LockFailed => "Check permissions on the lock directory",

            Self::DatabaseError => "Check database health with `sqlite3 <db> 'PRAGMA integrity_check'`",
            Self::SerializationError => "The data format may be corrupted. Check input data for validity",
            Self::IoError => "File operation failed. Check path exists and permissions are correct",

            Self::ValidationFailed => "Review the validation message and correct the input",
            Self::ApprovalRequired => "Re-run with --approve to confirm the destructive operation",

            Self::AssertionFailed => "Internal assertion failed. This is a bug. Please report with full context",
            Self::NotFound => "The requested resource was not found. Check the path or identifier",
        }
    }

    /// Whether retrying the same call may succeed without operator action.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ExternalToolTimeout
            | Self::OperationConflict
            | Self::RestoreInProgress
            | Self::MigrationAborted => true,

            Self::ExternalToolFailed
            | Self::ExternalToolUnavailable
            | Self::ArtifactNotFound
            | Self::ArtifactCorrupted
            | Self::RestoreVerificationFailed
            | Self::ConfigInvalid
            | Self::ConfigMissingRequired
            | Self::MalformedRecord
            | Self::SourceUnreadable
            | Self::LockFailed
            | Self::DatabaseError
            | Self::SerializationError
            | Self::IoError
            | Self::ValidationFailed
            | Self::ApprovalRequired
            | Self::AssertionFailed
            | Self::NotFound => false,
        }
    }

    /// Get the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self.numeric() / 100 {
            1 => "backup",
            2 => "restore",
            3 => "config",
            4 => "migration",
            5 => "lock",
            6 => "storage",
            8 => "validation",
            9 => "internal",
            _ => "unknown",
        }
    }

    /// Iterate over all error codes.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::ExternalToolFailed,
            Self::ExternalToolUnavailable,
            Self::ExternalToolTimeout,
            Self::ArtifactNotFound,
            Self::ArtifactCorrupted,
            Self::RestoreVerificationFailed,
            Self::ConfigInvalid,
            Self::ConfigMissingRequired,
            Self::MigrationAborted,
            Self::MalformedRecord,
            Self::SourceUnreadable,
            Self::OperationConflict,
            Self::RestoreInProgress,
            Self::LockFailed,
            Self::DatabaseError,
            Self::SerializationError,
            Self::IoError,
            Self::ValidationFailed,
            Self::ApprovalRequired,
            Self::AssertionFailed,
            Self::NotFound,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_string())
    }
}
