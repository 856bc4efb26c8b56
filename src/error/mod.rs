//! Error handling for shelfkeeper.
//!
//! This module provides:
//! - [`ShelfError`]: The main error enum for all shelfkeeper operations
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//! - [`StructuredError`]: Envelope payload with suggestion and context

mod codes;

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use codes::ErrorCode;

/// Main error type for shelfkeeper operations.
#[derive(Error, Debug)]
pub enum ShelfError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing required config: {0}")]
    MissingConfig(String),

    #[error("{program} could not be started: {reason}")]
    ExternalToolUnavailable { program: String, reason: String },

    #[error(
        "{program} exited with {} after {}ms: {stderr_tail}",
        exit_label(.exit_code.as_ref()),
        .elapsed.as_millis()
    )]
    ExternalTool {
        program: String,
        exit_code: Option<i32>,
        stderr_tail: String,
        elapsed: Duration,
    },

    #[error("{program} timed out after {}ms", .elapsed.as_millis())]
    Timeout { program: String, elapsed: Duration },

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Artifact {filename} checksum mismatch (registered {expected}, found {actual})")]
    ArtifactCorrupted {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("Restore verification failed: {0}")]
    RestoreVerification(String),

    #[error("Restore failed during {phase}: {source}")]
    RestoreFailed {
        phase: String,
        pre_restore: Option<String>,
        #[source]
        source: Box<ShelfError>,
    },

    #[error("{operation} already running{}", holder_suffix(.holder.as_deref()))]
    Conflict {
        operation: String,
        holder: Option<String>,
    },

    #[error("Restore already in progress: {0}")]
    RestoreInProgress(String),

    #[error("Migration aborted: {0}")]
    MigrationAborted(String),

    #[error("Malformed {kind} record '{key}': {reason}")]
    MalformedRecord {
        kind: String,
        key: String,
        reason: String,
    },

    #[error("Legacy source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("Lock failed: {0}")]
    LockFailed(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Operation requires approval: {0}")]
    ApprovalRequired(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

fn exit_label(code: Option<&i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |code| format!("status {code}"))
}

fn holder_suffix(holder: Option<&str>) -> String {
    holder.map(|h| format!(" (held by {h})")).unwrap_or_default()
}

impl ShelfError {
    /// Get the error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::SerializationError,
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::MissingConfig(_) => ErrorCode::ConfigMissingRequired,
            Self::ExternalToolUnavailable { .. } => ErrorCode::ExternalToolUnavailable,
            Self::ExternalTool { .. } => ErrorCode::ExternalToolFailed,
            Self::Timeout { .. } => ErrorCode::ExternalToolTimeout,
            Self::ArtifactNotFound(_) => ErrorCode::ArtifactNotFound,
            Self::ArtifactCorrupted { .. } => ErrorCode::ArtifactCorrupted,
            Self::RestoreVerification(_) => ErrorCode::RestoreVerificationFailed,
            Self::RestoreFailed { source, .. } => source.code(),
            Self::Conflict { .. } => ErrorCode::OperationConflict,
            Self::RestoreInProgress(_) => ErrorCode::RestoreInProgress,
            Self::MigrationAborted(_) => ErrorCode::MigrationAborted,
            Self::MalformedRecord { .. } => ErrorCode::MalformedRecord,
            Self::SourceUnreadable(_) => ErrorCode::SourceUnreadable,
            Self::LockFailed(_) => ErrorCode::LockFailed,
            Self::ValidationFailed(_) => ErrorCode::ValidationFailed,
            Self::ApprovalRequired(_) => ErrorCode::ApprovalRequired,
            Self::AssertionFailed(_) => ErrorCode::AssertionFailed,
            Self::NotFound(_) => ErrorCode::NotFound,
        }
    }

    /// Whether the failure is transient (retry may succeed) rather than
    /// needing operator intervention.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Innermost error, unwrapping restore phase context.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::RestoreFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::ExternalTool {
                program,
                exit_code,
                stderr_tail,
                elapsed,
            } => Some(serde_json::json!({
                "program": program,
                "exit_code": exit_code,
                "stderr_tail": stderr_tail,
                "elapsed_ms": duration_ms(*elapsed),
            })),
            Self::Timeout { program, elapsed } => Some(serde_json::json!({
                "program": program,
                "elapsed_ms": duration_ms(*elapsed),
            })),
            Self::ArtifactNotFound(filename) => Some(serde_json::json!({ "filename": filename })),
            Self::ArtifactCorrupted {
                filename,
                expected,
                actual,
            } => Some(serde_json::json!({
                "filename": filename,
                "expected": expected,
                "actual": actual,
            })),
            Self::RestoreFailed {
                phase,
                pre_restore,
                source,
            } => {
                let mut ctx = serde_json::json!({
                    "phase": phase,
                    "pre_restore": pre_restore,
                });
                if let (Some(inner), Some(obj)) = (source.context(), ctx.as_object_mut()) {
                    obj.insert("cause".to_string(), inner);
                }
                Some(ctx)
            }
            Self::Conflict { operation, holder } => Some(serde_json::json!({
                "operation": operation,
                "holder": holder,
            })),
            Self::MalformedRecord { kind, key, reason } => Some(serde_json::json!({
                "kind": kind,
                "key": key,
                "reason": reason,
            })),
            Self::MissingConfig(key) => Some(serde_json::json!({ "config_key": key })),
            _ => None,
        }
    }

    /// Convert this error to a structured error.
    #[must_use]
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::from_shelf_error(self)
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// A structured error with machine-readable code, suggestion, and context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// The error code (e.g., "ARTIFACT_NOT_FOUND")
    pub code: ErrorCode,

    /// The numeric error code (e.g., 201)
    pub numeric_code: u16,

    /// Human-readable error message
    pub message: String,

    /// Actionable suggestion for recovery
    pub suggestion: String,

    /// Additional context for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Transient failure that may succeed on retry
    pub retryable: bool,

    /// Error category (e.g., "backup", "restore", "migration")
    pub category: String,
}

impl StructuredError {
    /// Create a new structured error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            numeric_code: code.numeric(),
            suggestion: code.suggestion().to_string(),
            context: None,
            retryable: code.is_retryable(),
            category: code.category().to_string(),
            code,
            message: message.into(),
        }
    }

    /// Create a structured error from a `ShelfError`.
    #[must_use]
    pub fn from_shelf_error(err: &ShelfError) -> Self {
        let code = err.code();
        let suggestion = match err {
            ShelfError::RestoreFailed {
                pre_restore: Some(pre),
                ..
            } => format!(
                "The pre-restore artifact {pre} holds the state before this attempt; \
                 run `shelf backup restore {pre} --approve` to return to it"
            ),
            _ => code.suggestion().to_string(),
        };

        Self {
            code,
            numeric_code: code.numeric(),
            message: err.to_string(),
            suggestion,
            context: err.context(),
            retryable: code.is_retryable(),
            category: code.category().to_string(),
        }
    }

    /// Add context to this error.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<ShelfError> for StructuredError {
    fn from(err: ShelfError) -> Self {
        Self::from_shelf_error(&err)
    }
}

impl From<&ShelfError> for StructuredError {
    fn from(err: &ShelfError) -> Self {
        Self::from_shelf_error(err)
    }
}

/// Result type alias using `ShelfError`.
pub type Result<T> = std::result::Result<T, ShelfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            ShelfError::ArtifactNotFound("x.sql".into()).code(),
            ErrorCode::ArtifactNotFound
        );
        assert_eq!(
            ShelfError::Config("bad".into()).code(),
            ErrorCode::ConfigInvalid
        );
        assert_eq!(
            ShelfError::Timeout {
                program: "sqlite3".into(),
                elapsed: Duration::from_secs(3),
            }
            .code(),
            ErrorCode::ExternalToolTimeout
        );
    }

    #[test]
    fn test_external_tool_message_includes_exit_and_stderr() {
        let err = ShelfError::ExternalTool {
            program: "sqlite3".into(),
            exit_code: Some(1),
            stderr_tail: "Error: file is not a database".into(),
            elapsed: Duration::from_millis(42),
        };
        let msg = err.to_string();
        assert!(msg.contains("status 1"));
        assert!(msg.contains("42ms"));
        assert!(msg.contains("not a database"));

        let killed = ShelfError::ExternalTool {
            program: "sqlite3".into(),
            exit_code: None,
            stderr_tail: String::new(),
            elapsed: Duration::ZERO,
        };
        assert!(killed.to_string().contains("signal"));
    }

    #[test]
    fn test_restore_failed_delegates_code_and_root() {
        let err = ShelfError::RestoreFailed {
            phase: "verifying".into(),
            pre_restore: Some("backup-2026-01-01T00-00-00-000Z-pre-restore.sql".into()),
            source: Box::new(ShelfError::RestoreVerification("no stores table".into())),
        };
        assert_eq!(err.code(), ErrorCode::RestoreVerificationFailed);
        assert!(matches!(err.root(), ShelfError::RestoreVerification(_)));
        assert!(!err.is_retryable());

        let ctx = err.context().unwrap();
        assert_eq!(ctx["phase"], "verifying");
        assert!(ctx["pre_restore"].as_str().unwrap().ends_with("pre-restore.sql"));
    }

    #[test]
    fn test_structured_error_mentions_pre_restore_artifact() {
        let err = ShelfError::RestoreFailed {
            phase: "restoring".into(),
            pre_restore: Some("backup-pre.sql".into()),
            source: Box::new(ShelfError::Timeout {
                program: "sqlite3".into(),
                elapsed: Duration::from_secs(1),
            }),
        };
        let structured = err.to_structured();
        assert_eq!(structured.code, ErrorCode::ExternalToolTimeout);
        assert!(structured.retryable);
        assert!(structured.suggestion.contains("backup-pre.sql"));
        assert_eq!(structured.context.unwrap()["cause"]["program"], "sqlite3");
    }

    #[test]
    fn test_conflict_message_names_holder() {
        let err = ShelfError::Conflict {
            operation: "backup".into(),
            holder: Some("pid 42 on host".into()),
        };
        assert_eq!(err.to_string(), "backup already running (held by pid 42 on host)");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_structured_error_serialization() {
        let err = StructuredError::new(ErrorCode::ArtifactNotFound, "missing");
        let json = serde_json::to_string(&err).unwrap();

        assert!(json.contains("ARTIFACT_NOT_FOUND"));
        assert!(json.contains("\"numeric_code\":201"));
        assert!(json.contains("\"retryable\":false"));
        assert!(json.contains("\"category\":\"restore\""));
        assert!(!json.contains("context"));
    }

    #[test]
    fn test_structured_error_display() {
        let err = StructuredError::new(ErrorCode::MigrationAborted, "database gone");
        assert_eq!(err.to_string(), "[E401] database gone");
    }
}
