//! Error types for the songlib core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// Mirror (VCS subprocess) errors
// ---------------------------------------------------------------------------

/// Errors from VCS subprocess operations on a mirror.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The VCS binary was not found on `$PATH`.
    #[error("{0} binary not found")]
    BinaryNotFound(String),

    /// A VCS command exited with a non-zero status.
    #[error("{command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A VCS command did not finish within its time budget.
    #[error("{command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// Generic I/O wrapper (spawning, preparing directories).
    #[error("mirror I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Normalization errors
// ---------------------------------------------------------------------------

/// Errors from converting one document into canonical form.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The source file could not be read.
    #[error("cannot read file: {0}")]
    Unreadable(#[from] std::io::Error),

    /// The content is not in any accepted format.
    #[error("{0}")]
    Invalid(String),
}

/// A single file that failed to publish, tagged with its mirror-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

// ---------------------------------------------------------------------------
// Publish errors
// ---------------------------------------------------------------------------

/// Fatal filesystem errors while publishing. Per-file normalization failures
/// are not represented here; they are collected as [`FileError`]s.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("filesystem error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk '{}': {detail}", path.display())]
    Walk { path: PathBuf, detail: String },

    #[error("failed to serialize publish manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PublishError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading, validation and mutation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// JSON or TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// A source with the same id is already configured.
    #[error("library source '{0}' already exists")]
    DuplicateSource(String),

    /// No source with the given id is configured.
    #[error("library source '{0}' not found")]
    SourceNotFound(String),

    /// The platform data directory could not be determined.
    #[error("cannot determine application data directory")]
    NoDataDir,

    /// Generic I/O error reading or writing the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Sync state errors
// ---------------------------------------------------------------------------

/// Errors from persisting [`crate::state::SyncState`].
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize sync state: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Sync service errors
// ---------------------------------------------------------------------------

/// Errors that abort a single sync attempt.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The requested source id is not configured.
    #[error("Source {0} not found")]
    SourceNotFound(String),

    /// Another sync of the same source is in flight.
    #[error("Sync already in progress for {0}")]
    AlreadyRunning(String),

    /// The VCS binary is not installed; carries a user-facing hint.
    #[error("{0}")]
    MirrorUnavailable(String),

    /// A publish call reported per-file errors.
    #[error("{}", join_file_errors(.0))]
    PublishRejected(Vec<FileError>),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    /// The blocking publish task panicked or was cancelled.
    #[error("publish task failed: {0}")]
    TaskFailed(String),
}

fn join_file_errors(errors: &[FileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = MirrorError::CommandFailed {
            command: "git fetch".into(),
            exit_code: 128,
            stderr: "fatal: not a git repository".into(),
        };
        assert_eq!(
            err.to_string(),
            "git fetch failed (exit 128): fatal: not a git repository"
        );

        let err = MirrorError::Timeout {
            command: "git clone".into(),
            secs: 120,
        };
        assert!(err.to_string().contains("timed out after 120s"));

        let err = SyncError::SourceNotFound("gh_deadbeef".into());
        assert_eq!(err.to_string(), "Source gh_deadbeef not found");
    }

    #[test]
    fn test_publish_rejected_joins_lines() {
        let err = SyncError::PublishRejected(vec![
            FileError {
                path: "a.pro".into(),
                reason: "bad directive".into(),
            },
            FileError {
                path: "dir/b.txt".into(),
                reason: "missing artist".into(),
            },
        ]);
        assert_eq!(err.to_string(), "a.pro: bad directive\ndir/b.txt: missing artist");
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let err: CoreError = MirrorError::BinaryNotFound("git".into()).into();
        assert!(matches!(err, CoreError::Mirror(_)));

        let err: CoreError = ConfigError::SourceNotFound("x".into()).into();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
