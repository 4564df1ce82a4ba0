//! Library management: adding, removing and toggling sources.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LibrarySource;
use crate::errors::{ConfigError, CoreError};
use crate::mirror::{has_vcs_metadata, MirrorClient};
use crate::paths::{ensure_dir, AppPaths};
use crate::publish::sibling;
use crate::state::SyncState;
use crate::store::{LibraryStore, StateStore};

/// A configured source together with its last recorded sync state.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source: LibrarySource,
    pub state: SyncState,
}

/// Whether upstream has commits that are not yet published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingUpdates {
    /// No mirror yet, or the VCS binary is unavailable.
    Unknown,
    UpToDate,
    Available,
}

impl std::fmt::Display for PendingUpdates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "-"),
            Self::UpToDate => write!(f, "up to date"),
            Self::Available => write!(f, "updates"),
        }
    }
}

/// Mutations of the libraries configuration and the on-disk trees it owns.
pub struct LibraryManager {
    libraries: Arc<dyn LibraryStore>,
    states: Arc<dyn StateStore>,
    paths: AppPaths,
}

impl LibraryManager {
    pub fn new(libraries: Arc<dyn LibraryStore>, states: Arc<dyn StateStore>, paths: AppPaths) -> Self {
        Self {
            libraries,
            states,
            paths,
        }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// Subscribe to `repo_url`. The id is derived from the URL, so adding
    /// the same repository twice fails with [`ConfigError::DuplicateSource`].
    pub fn add_source(
        &self,
        repo_url: &str,
        branch: Option<&str>,
        name: Option<&str>,
    ) -> Result<LibrarySource, CoreError> {
        let source = LibrarySource::new(repo_url, branch, name);
        source.validate()?;

        let mut config = self.libraries.load()?;
        config.add(source.clone())?;
        self.libraries.save(&config)?;
        self.states.save(&source.source_id, &SyncState::default())?;
        for dir in [source.source_root(&self.paths), source.overrides_dir(&self.paths)] {
            ensure_dir(&dir).map_err(ConfigError::from)?;
        }

        info!(source_id = %source.source_id, repo = %source.repo_url, "library source added");
        Ok(source)
    }

    /// Drop a source, its state and its local trees. Overrides are kept.
    pub fn remove_source(&self, source_id: &str) -> Result<LibrarySource, CoreError> {
        let mut config = self.libraries.load()?;
        let source = config.remove(source_id)?;
        self.libraries.save(&config)?;
        self.states.remove(source_id)?;

        let published = source.published_dir(&self.paths);
        let doomed = [
            source.mirror_dir(&self.paths),
            source.source_root(&self.paths),
            sibling(&published, ".tmp"),
            sibling(&published, ".old"),
            published,
        ];
        for dir in &doomed {
            remove_tree(dir);
        }

        info!(source_id, "library source removed");
        Ok(source)
    }

    /// Enable or disable a source. Returns the updated source.
    pub fn set_enabled(&self, source_id: &str, enabled: bool) -> Result<LibrarySource, CoreError> {
        let mut config = self.libraries.load()?;
        let source = config
            .find_mut(source_id)
            .ok_or_else(|| ConfigError::SourceNotFound(source_id.to_string()))?;
        source.enabled = enabled;
        let updated = source.clone();
        self.libraries.save(&config)?;
        info!(source_id, enabled, "library source updated");
        Ok(updated)
    }

    /// All sources with their current state, in configuration order.
    pub fn list(&self) -> Result<Vec<SourceStatus>, CoreError> {
        let config = self.libraries.load()?;
        Ok(config
            .library_sources
            .into_iter()
            .map(|source| {
                let state = self.states.load(&source.source_id);
                SourceStatus { source, state }
            })
            .collect())
    }

    /// One source with its current state.
    pub fn status(&self, source_id: &str) -> Result<SourceStatus, CoreError> {
        let config = self.libraries.load()?;
        let source = config
            .find(source_id)
            .cloned()
            .ok_or_else(|| ConfigError::SourceNotFound(source_id.to_string()))?;
        let state = self.states.load(source_id);
        Ok(SourceStatus { source, state })
    }

    /// Compare the mirror's remote-tracking tip with the published commit.
    /// Does not fetch, so this reflects what the last sync saw upstream.
    pub async fn pending_updates(
        &self,
        mirror: &dyn MirrorClient,
        status: &SourceStatus,
    ) -> PendingUpdates {
        let mirror_dir = status.source.mirror_dir(&self.paths);
        if !has_vcs_metadata(&mirror_dir) || !mirror.is_available().await {
            return PendingUpdates::Unknown;
        }
        let remote_ref = format!("origin/{}", status.source.default_branch);
        match mirror.head_commit(&mirror_dir, &remote_ref).await {
            Ok(remote) => match status.state.last_commit.as_deref() {
                Some(published) if published != remote => PendingUpdates::Available,
                _ => PendingUpdates::UpToDate,
            },
            Err(e) => {
                debug!(source_id = %status.source.source_id, error = %e, "cannot resolve remote tip");
                PendingUpdates::Unknown
            }
        }
    }
}

/// Best-effort recursive delete; a missing directory is not an error.
fn remove_tree(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => debug!(path = %dir.display(), "removed directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), error = %e, "failed to remove directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonLibraryStore, JsonStateStore, MemoryLibraryStore, MemoryStateStore};

    const URL: &str = "https://github.com/acme/charts.git";

    fn memory_manager(base: &Path) -> LibraryManager {
        LibraryManager::new(
            Arc::new(MemoryLibraryStore::default()),
            Arc::new(MemoryStateStore::new()),
            AppPaths::new(base),
        )
    }

    #[test]
    fn test_add_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let manager = memory_manager(dir.path());

        let source = manager.add_source(URL, Some("trunk"), None).unwrap();
        assert_eq!(source.name, "charts");
        assert_eq!(source.default_branch, "trunk");

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].source.source_id, source.source_id);
        assert_eq!(listed[0].state, SyncState::default());
    }

    #[test]
    fn test_add_duplicate_and_empty_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = memory_manager(dir.path());
        manager.add_source(URL, None, None).unwrap();

        let err = manager.add_source(URL, None, Some("again")).unwrap_err();
        assert!(matches!(err, CoreError::Config(ConfigError::DuplicateSource(_))));

        let err = manager.add_source("   ", None, None).unwrap_err();
        assert!(matches!(err, CoreError::Config(ConfigError::InvalidValue { .. })));
        assert_eq!(manager.list().unwrap().len(), 1);
    }

    #[test]
    fn test_set_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let manager = memory_manager(dir.path());
        let source = manager.add_source(URL, None, None).unwrap();

        let updated = manager.set_enabled(&source.source_id, false).unwrap();
        assert!(!updated.enabled);
        assert!(!manager.status(&source.source_id).unwrap().source.enabled);

        let err = manager.set_enabled("gh_nope", true).unwrap_err();
        assert!(matches!(err, CoreError::Config(ConfigError::SourceNotFound(_))));
    }

    #[test]
    fn test_remove_deletes_local_trees_but_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        let manager = LibraryManager::new(
            Arc::new(JsonLibraryStore::for_paths(&paths)),
            Arc::new(JsonStateStore::new(paths.clone())),
            paths.clone(),
        );
        let source = manager.add_source(URL, None, None).unwrap();
        let id = source.source_id.clone();
        assert!(paths.state_path(&id).exists());
        assert!(source.overrides_dir(&paths).is_dir());

        let mirror = source.mirror_dir(&paths);
        let published = source.published_dir(&paths);
        let overrides = source.overrides_dir(&paths);
        for d in [&mirror, &published, &overrides, &sibling(&published, ".tmp")] {
            std::fs::create_dir_all(d).unwrap();
            std::fs::write(d.join("song.pro"), "x").unwrap();
        }

        manager.remove_source(&id).unwrap();
        assert!(!source.source_root(&paths).exists());
        assert!(!published.exists());
        assert!(!sibling(&published, ".tmp").exists());
        assert!(overrides.join("song.pro").exists());
        assert!(manager.list().unwrap().is_empty());

        let err = manager.remove_source(&id).unwrap_err();
        assert!(matches!(err, CoreError::Config(ConfigError::SourceNotFound(_))));
    }

    #[test]
    fn test_add_after_corrupt_config_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(dir.path());
        let config_path = paths.libraries_config_path();
        std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        let damaged = r#"{"library_sources": [{"id": "gh_keep", "repo_url": "x""#;
        std::fs::write(&config_path, damaged).unwrap();

        let manager = LibraryManager::new(
            Arc::new(JsonLibraryStore::for_paths(&paths)),
            Arc::new(JsonStateStore::new(paths.clone())),
            paths.clone(),
        );
        manager.add_source(URL, None, None).unwrap();
        assert_eq!(manager.list().unwrap().len(), 1);

        let parent = config_path.parent().unwrap();
        let backup = std::fs::read_dir(parent)
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.to_string_lossy().contains("libraries.json.corrupt-"))
            .expect("corrupt config should be preserved");
        assert_eq!(std::fs::read_to_string(backup).unwrap(), damaged);
    }

    #[tokio::test]
    async fn test_pending_updates_unknown_without_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let manager = memory_manager(dir.path());
        let source = manager.add_source(URL, None, None).unwrap();
        let status = manager.status(&source.source_id).unwrap();

        let git = crate::mirror::GitCli::default();
        assert_eq!(manager.pending_updates(&git, &status).await, PendingUpdates::Unknown);
    }
}
