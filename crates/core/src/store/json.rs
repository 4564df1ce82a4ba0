//! File-backed stores under the application data directory.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{LibraryStore, StateStore};
use crate::config::LibrariesConfig;
use crate::errors::{ConfigError, StateError};
use crate::paths::AppPaths;
use crate::state::SyncState;

/// `libraries.json` at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonLibraryStore {
    path: PathBuf,
}

impl JsonLibraryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_paths(paths: &AppPaths) -> Self {
        Self::new(paths.libraries_config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LibraryStore for JsonLibraryStore {
    fn load(&self) -> Result<LibrariesConfig, ConfigError> {
        LibrariesConfig::load_or_init(&self.path)
    }

    fn save(&self, config: &LibrariesConfig) -> Result<(), ConfigError> {
        config.save(&self.path)
    }
}

/// One `state.json` per source under `libraries/sources/<id>/`.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    paths: AppPaths,
}

impl JsonStateStore {
    pub fn new(paths: AppPaths) -> Self {
        Self { paths }
    }
}

impl StateStore for JsonStateStore {
    fn load(&self, source_id: &str) -> SyncState {
        let path = self.paths.state_path(source_id);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SyncState::default(),
            Err(e) => {
                warn!(source_id, path = %path.display(), error = %e, "cannot read sync state, starting fresh");
                return SyncState::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(e) => {
                warn!(source_id, path = %path.display(), error = %e, "corrupt sync state, starting fresh");
                SyncState::default()
            }
        }
    }

    fn save(&self, source_id: &str, state: &SyncState) -> Result<(), StateError> {
        let path = self.paths.state_path(source_id);
        let json = serde_json::to_string_pretty(state)?;
        write_atomic(&path, json.as_bytes())?;
        debug!(source_id, status = %state.status, "sync state saved");
        Ok(())
    }

    fn remove(&self, source_id: &str) -> Result<(), StateError> {
        let path = self.paths.state_path(source_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Io { path, source }),
        }
    }
}

/// Write `contents` to a sibling temp file and rename it over `path`.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StateError> {
    let io_err = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}
