//! Sync orchestration for library sources.
//!
//! [`SyncService::sync`] drives one source through a state machine:
//!
//! 1. Load the source and its prior [`SyncState`]; persist `syncing`.
//! 2. Bring the mirror to the remote tip (clone or fetch, checkout, hard reset).
//! 3. Pick a path:
//!    - **no-op** when the tip equals `last_commit` and a published tree exists;
//!    - **incremental** when a baseline is known and a published tree exists;
//!    - **full** otherwise.
//! 4. Publish, then persist `idle` with the new `last_commit`, or `error`
//!    with `last_commit` untouched so a retry diffs from the same baseline.
//!
//! A source is never synced concurrently with itself: a second call for an
//! id that is already in flight returns immediately without touching state.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::LibrarySource;
use crate::errors::{PublishError, SyncError};
use crate::mirror::{has_vcs_metadata, MirrorClient};
use crate::normalize::Normalizer;
use crate::paths::AppPaths;
use crate::publish::{
    count_published_files, is_supported_path, write_manifest, FileFilter, PublishReport, Publisher,
};
use crate::state::SyncState;
use crate::store::{LibraryStore, StateStore};

/// Shown when the VCS binary cannot be run.
pub const GIT_MISSING_MESSAGE: &str = "Git not found. Install Git to sync GitHub libraries.";

// ---------------------------------------------------------------------------
// Progress and results
// ---------------------------------------------------------------------------

/// Coarse-grained milestones reported while a sync runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncProgress {
    Cloning { repo_url: String },
    Fetching,
    CheckingOut { branch: String },
    Resetting,
    CalculatingChanges,
    Scanning,
    Publishing { files: usize, incremental: bool },
    WritingManifest,
}

impl std::fmt::Display for SyncProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cloning { repo_url } => write!(f, "Cloning {repo_url}"),
            Self::Fetching => write!(f, "Fetching updates"),
            Self::CheckingOut { branch } => write!(f, "Checking out {branch}"),
            Self::Resetting => write!(f, "Resetting to remote"),
            Self::CalculatingChanges => write!(f, "Calculating changes"),
            Self::Scanning => write!(f, "Scanning files"),
            Self::Publishing {
                files,
                incremental: true,
            } => write!(f, "Publishing {files} updated files"),
            Self::Publishing { files, .. } => write!(f, "Publishing {files} files"),
            Self::WritingManifest => write!(f, "Writing publish manifest"),
        }
    }
}

/// Progress callback, invoked synchronously from the syncing task.
pub type ProgressFn<'a> = dyn Fn(&SyncProgress) + Send + Sync + 'a;

/// Structured outcome of [`SyncService::sync`]. Failures are reported here,
/// never as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub success: bool,
    pub message: String,
    pub files_indexed: u64,
    pub last_commit: Option<String>,
}

impl SyncResult {
    fn failed(message: impl Into<String>, state: Option<&SyncState>) -> Self {
        Self {
            success: false,
            message: message.into(),
            files_indexed: state.map_or(0, |s| s.files_indexed),
            last_commit: state.and_then(|s| s.last_commit.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight lock
// ---------------------------------------------------------------------------

type InFlight = Arc<Mutex<HashSet<String>>>;

fn lock_set(set: &InFlight) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Releases a source's in-flight slot on drop, on every exit path.
struct InFlightGuard {
    set: InFlight,
    source_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_set(&self.set).remove(&self.source_id);
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Syncs library sources from their remotes into published trees.
pub struct SyncService {
    mirror: Arc<dyn MirrorClient>,
    libraries: Arc<dyn LibraryStore>,
    states: Arc<dyn StateStore>,
    publisher: Publisher,
    paths: AppPaths,
    in_flight: InFlight,
}

/// Which publish strategy a sync took.
enum Plan {
    Incremental { changed: Vec<String>, deleted: Vec<String> },
    Full,
}

impl SyncService {
    pub fn new(
        mirror: Arc<dyn MirrorClient>,
        libraries: Arc<dyn LibraryStore>,
        states: Arc<dyn StateStore>,
        normalizer: Arc<dyn Normalizer>,
        paths: AppPaths,
    ) -> Self {
        Self {
            mirror,
            libraries,
            states,
            publisher: Publisher::new(normalizer),
            paths,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// `true` while a sync of `source_id` is running.
    pub fn is_syncing(&self, source_id: &str) -> bool {
        lock_set(&self.in_flight).contains(source_id)
    }

    fn try_acquire(&self, source_id: &str) -> Option<InFlightGuard> {
        if !lock_set(&self.in_flight).insert(source_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: self.in_flight.clone(),
            source_id: source_id.to_string(),
        })
    }

    /// Sync one source and report the outcome.
    pub async fn sync(&self, source_id: &str, progress: &ProgressFn<'_>) -> SyncResult {
        let Some(_guard) = self.try_acquire(source_id) else {
            warn!(source_id, "sync already in progress, refusing to start another");
            let err = SyncError::AlreadyRunning(source_id.to_string());
            return SyncResult::failed(err.to_string(), None);
        };

        let source = match self.load_source(source_id) {
            Ok(source) => source,
            Err(e) => {
                warn!(source_id, error = %e, "cannot start sync");
                return SyncResult::failed(e.to_string(), None);
            }
        };

        let mut state = self.states.load(source_id);
        state.begin(Utc::now());
        if let Err(e) = self.states.save(source_id, &state) {
            error!(source_id, error = %e, "failed to persist syncing state");
            return SyncResult::failed(e.to_string(), Some(&state));
        }
        info!(source_id, repo = %source.repo_url, "sync started");

        match self.run(&source, &mut state, progress).await {
            Ok(message) => {
                if let Err(e) = self.states.save(source_id, &state) {
                    error!(source_id, error = %e, "failed to persist sync state");
                    return SyncResult::failed(e.to_string(), Some(&state));
                }
                info!(
                    source_id,
                    commit = state.last_commit.as_deref().unwrap_or(""),
                    files = state.files_indexed,
                    "{message}"
                );
                SyncResult {
                    success: true,
                    message,
                    files_indexed: state.files_indexed,
                    last_commit: state.last_commit.clone(),
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(source_id, error = %message, "sync failed");
                state.fail(message.clone());
                if let Err(save_err) = self.states.save(source_id, &state) {
                    error!(source_id, error = %save_err, "failed to persist error state");
                }
                SyncResult::failed(message, Some(&state))
            }
        }
    }

    fn load_source(&self, source_id: &str) -> Result<LibrarySource, SyncError> {
        let config = self.libraries.load()?;
        let source = config
            .find(source_id)
            .cloned()
            .ok_or_else(|| SyncError::SourceNotFound(source_id.to_string()))?;
        source.validate()?;
        Ok(source)
    }

    /// Steps after `syncing` is persisted. On success `state` is moved to
    /// `idle` and the result message is returned; the caller persists it.
    async fn run(
        &self,
        source: &LibrarySource,
        state: &mut SyncState,
        progress: &ProgressFn<'_>,
    ) -> Result<String, SyncError> {
        let source_id = source.source_id.as_str();
        if !self.mirror.is_available().await {
            return Err(SyncError::MirrorUnavailable(GIT_MISSING_MESSAGE.to_string()));
        }

        let mirror_dir = source.mirror_dir(&self.paths);
        let published_dir = source.published_dir(&self.paths);
        let branch = source.default_branch.as_str();

        if !has_vcs_metadata(&mirror_dir) {
            // A mirror without metadata is a leftover from an interrupted clone.
            if mirror_dir.exists() {
                debug!(path = %mirror_dir.display(), "removing incomplete mirror");
                tokio::fs::remove_dir_all(&mirror_dir)
                    .await
                    .map_err(|e| PublishError::io(&mirror_dir, e))?;
            }
            report(progress, SyncProgress::Cloning {
                repo_url: source.repo_url.clone(),
            });
            self.mirror
                .clone_repo(&source.repo_url, branch, &mirror_dir)
                .await?;
        }
        report(progress, SyncProgress::Fetching);
        self.mirror.fetch(&mirror_dir).await?;
        report(progress, SyncProgress::CheckingOut {
            branch: branch.to_string(),
        });
        self.mirror.checkout(&mirror_dir, branch).await?;

        let head_before = state.last_commit.clone();
        let head_remote = self
            .mirror
            .head_commit(&mirror_dir, &format!("origin/{branch}"))
            .await?;

        report(progress, SyncProgress::Resetting);
        self.mirror.hard_reset_to_remote(&mirror_dir, branch).await?;
        let head_after = self.mirror.head_commit(&mirror_dir, "HEAD").await?;
        debug!(
            source_id,
            before = head_before.as_deref().unwrap_or("none"),
            after = %head_after,
            "mirror updated"
        );

        let published_exists = published_dir.is_dir();
        if head_before.as_deref() == Some(head_after.as_str()) && published_exists {
            state.succeed(Utc::now(), &head_after);
            return Ok("No updates".to_string());
        }

        let filter = FileFilter::for_source(source);
        let plan = match head_before {
            Some(before) if published_exists => {
                report(progress, SyncProgress::CalculatingChanges);
                let diff = self
                    .mirror
                    .diff_by_path_status(&mirror_dir, &before, &head_remote)
                    .await?;
                let mut changed = Vec::new();
                let mut deleted = Vec::new();
                for entry in diff {
                    if entry.kind.is_deletion() {
                        if is_supported_path(Path::new(&entry.path)) {
                            deleted.push(entry.path);
                        }
                    } else if mirror_dir.join(&entry.path).is_file() && filter.accepts(&entry.path)
                    {
                        changed.push(entry.path);
                    }
                }
                Plan::Incremental { changed, deleted }
            }
            _ => Plan::Full,
        };

        let publish_report = match plan {
            Plan::Incremental { changed, deleted } => {
                report(progress, SyncProgress::Publishing {
                    files: changed.len(),
                    incremental: true,
                });
                info!(source_id, changed = changed.len(), deleted = deleted.len(), "incremental publish");
                let publisher = self.publisher.clone();
                let (mirror, published) = (mirror_dir.clone(), published_dir.clone());
                blocking(move || {
                    publisher.publish_incremental(&mirror, &published, &changed, &deleted)
                })
                .await?
            }
            Plan::Full => {
                report(progress, SyncProgress::Scanning);
                let publisher = self.publisher.clone();
                let mirror = mirror_dir.clone();
                let files = blocking(move || publisher.scan_files(&mirror, &filter)).await?;

                report(progress, SyncProgress::Publishing {
                    files: files.len(),
                    incremental: false,
                });
                info!(source_id, files = files.len(), "full publish");
                let publisher = self.publisher.clone();
                let id = source_id.to_string();
                let (mirror, published) = (mirror_dir.clone(), published_dir.clone());
                blocking(move || publisher.publish_full(&id, &mirror, &published, &files)).await?
            }
        };

        if !publish_report.success() {
            return Err(SyncError::PublishRejected(publish_report.errors));
        }

        report(progress, SyncProgress::WritingManifest);
        let files_indexed = finish_publish(
            source_id.to_string(),
            published_dir,
            head_after.clone(),
            publish_report,
        )
        .await?;

        state.succeed(Utc::now(), &head_after);
        state.files_indexed = files_indexed;
        Ok("Sync complete".to_string())
    }
}

fn report(progress: &ProgressFn<'_>, step: SyncProgress) {
    info!(step = %step, "sync progress");
    progress(&step);
}

/// Run blocking publish work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T, SyncError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PublishError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SyncError::TaskFailed(e.to_string()))?
        .map_err(SyncError::from)
}

/// Write the manifest and count what the published tree now holds.
async fn finish_publish(
    source_id: String,
    published_dir: PathBuf,
    head_commit: String,
    publish_report: PublishReport,
) -> Result<u64, SyncError> {
    blocking(move || {
        write_manifest(
            &source_id,
            &published_dir,
            &head_commit,
            publish_report.files_written,
        )?;
        Ok(count_published_files(&published_dir))
    })
    .await
}
