//! Mirror of a remote repository, driven through an external VCS binary.
//!
//! The mirror is a disposable read-only cache of upstream: it is only ever
//! cloned, fetched and hard-reset, never edited. [`MirrorClient`] is the
//! narrow seam the sync service depends on; [`GitCli`] implements it by
//! shelling out to `git`.

pub mod git;

use std::path::Path;

use async_trait::async_trait;

use crate::errors::MirrorError;

pub use git::GitCli;

/// Operations the sync pipeline needs from a version-control tool.
#[async_trait]
pub trait MirrorClient: Send + Sync {
    /// Probe the VCS binary. Sync refuses to proceed when this is `false`.
    async fn is_available(&self) -> bool;

    /// Clone `repo_url` at `branch` into `dest`, which has no VCS metadata yet.
    async fn clone_repo(&self, repo_url: &str, branch: &str, dest: &Path)
        -> Result<(), MirrorError>;

    /// Update remote-tracking refs without touching the working tree.
    async fn fetch(&self, dir: &Path) -> Result<(), MirrorError>;

    /// Switch the working tree's active branch.
    async fn checkout(&self, dir: &Path, branch: &str) -> Result<(), MirrorError>;

    /// Make the working tree identical to `origin/<branch>` and drop
    /// untracked files.
    async fn hard_reset_to_remote(&self, dir: &Path, branch: &str) -> Result<(), MirrorError>;

    /// Resolve `reference` (e.g. `HEAD`, `origin/main`) to a commit id.
    async fn head_commit(&self, dir: &Path, reference: &str) -> Result<String, MirrorError>;

    /// Changed paths between two commits, each tagged with its change kind.
    async fn diff_by_path_status(
        &self,
        dir: &Path,
        from: &str,
        to: &str,
    ) -> Result<Vec<DiffEntry>, MirrorError>;
}

/// `true` once `dir` holds a working copy (a `.git` entry exists).
pub fn has_vcs_metadata(dir: &Path) -> bool {
    dir.join(".git").exists()
}

/// How a path changed between two commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    TypeChanged,
    Renamed,
    Copied,
    Unmerged,
    Unknown(String),
}

impl ChangeKind {
    /// Map a `--name-status` letter (possibly with a score, e.g. `R100`).
    pub fn from_status(status: &str) -> Self {
        match status.chars().next() {
            Some('A') => Self::Added,
            Some('M') => Self::Modified,
            Some('D') => Self::Deleted,
            Some('T') => Self::TypeChanged,
            Some('R') => Self::Renamed,
            Some('C') => Self::Copied,
            Some('U') => Self::Unmerged,
            _ => Self::Unknown(status.to_string()),
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Deleted => write!(f, "deleted"),
            Self::TypeChanged => write!(f, "type_changed"),
            Self::Renamed => write!(f, "renamed"),
            Self::Copied => write!(f, "copied"),
            Self::Unmerged => write!(f, "unmerged"),
            Self::Unknown(s) => write!(f, "unknown({s})"),
        }
    }
}

/// One changed path, relative to the mirror root with forward slashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub kind: ChangeKind,
    pub path: String,
}

impl DiffEntry {
    pub fn new(kind: ChangeKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}
