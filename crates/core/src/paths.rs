//! Application data directory and library directory layout.
//!
//! ```text
//! <app-data>/libraries.json
//! <app-data>/libraries/sources/<source_id>/state.json
//! <app-data>/libraries/sources/<source_id>/mirror
//! <app-data>/libraries/published/<source_id>
//! <app-data>/songs/overrides/<source_id>
//! ```

use std::path::{Path, PathBuf};

use crate::errors::ConfigError;

/// Directory name used under the platform data directory.
pub const APP_DIR_NAME: &str = "songlib";

/// Name of the libraries configuration file at the app-data root.
pub const LIBRARIES_CONFIG_FILE: &str = "libraries.json";

/// Name of the per-source sync state file.
pub const STATE_FILE: &str = "state.json";

/// Root of all application data. Every library path is derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    base: PathBuf,
}

impl AppPaths {
    /// Use an explicit base directory.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Platform-appropriate default (`$XDG_DATA_HOME/songlib` on Linux).
    pub fn platform_default() -> Result<Self, ConfigError> {
        dirs::data_dir()
            .map(|dir| Self::new(dir.join(APP_DIR_NAME)))
            .ok_or(ConfigError::NoDataDir)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn libraries_config_path(&self) -> PathBuf {
        self.base.join(LIBRARIES_CONFIG_FILE)
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.base.join("libraries")
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.libraries_dir().join("sources")
    }

    pub fn published_root(&self) -> PathBuf {
        self.libraries_dir().join("published")
    }

    pub fn overrides_root(&self) -> PathBuf {
        self.base.join("songs").join("overrides")
    }

    /// Location of `state.json` for one source.
    pub fn state_path(&self, source_id: &str) -> PathBuf {
        self.sources_dir().join(source_id).join(STATE_FILE)
    }

    /// Resolve a configured path: empty means the base itself, `~/` expands
    /// to the home directory, relative paths hang off the base.
    pub fn resolve(&self, raw: &str) -> PathBuf {
        let raw = raw.trim();
        if raw.is_empty() {
            return self.base.clone();
        }
        let expanded = expand_tilde(raw);
        if expanded.is_absolute() {
            expanded
        } else {
            self.base.join(expanded)
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Create `path` and its parents if missing, returning it.
pub fn ensure_dir(path: &Path) -> std::io::Result<&Path> {
    std::fs::create_dir_all(path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = AppPaths::new("/data/songlib");
        assert_eq!(
            paths.libraries_config_path(),
            PathBuf::from("/data/songlib/libraries.json")
        );
        assert_eq!(
            paths.state_path("gh_1234abcd"),
            PathBuf::from("/data/songlib/libraries/sources/gh_1234abcd/state.json")
        );
        assert_eq!(
            paths.overrides_root(),
            PathBuf::from("/data/songlib/songs/overrides")
        );
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let paths = AppPaths::new("/data/songlib");
        assert_eq!(
            paths.resolve("libraries/published/x"),
            PathBuf::from("/data/songlib/libraries/published/x")
        );
        assert_eq!(paths.resolve("/srv/mirror"), PathBuf::from("/srv/mirror"));
        assert_eq!(paths.resolve("  "), PathBuf::from("/data/songlib"));
    }

    #[test]
    fn test_ensure_dir_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
