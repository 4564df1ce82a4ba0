//! Durable per-source sync state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a source: `idle → syncing → (idle | error)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome of the most recent sync of one source, persisted as `state.json`.
///
/// `last_commit` is the commit the published tree reflects. It only moves
/// after a publish fully succeeds, so a failed sync keeps the diff baseline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_commit: Option<String>,
    #[serde(default)]
    pub files_indexed: u64,
}

impl SyncState {
    /// Enter `syncing` and stamp the attempt time.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.status = SyncStatus::Syncing;
        self.last_sync_at = Some(now);
    }

    /// Enter `error`, leaving `last_commit` and `files_indexed` untouched.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = SyncStatus::Error;
        self.last_error = Some(message.into());
    }

    /// Enter `idle` after a successful publish (or a no-op) at `commit`.
    pub fn succeed(&mut self, now: DateTime<Utc>, commit: &str) {
        self.status = SyncStatus::Idle;
        self.last_success_at = Some(now);
        self.last_error = None;
        self.last_commit = Some(commit.to_string());
    }
}
