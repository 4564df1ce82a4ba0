//! JSON configuration of subscribed library sources.
//!
//! The on-disk `libraries.json` is loosely structured: any field may be
//! missing or `null`. It is read into [`SourceEntry`] records where every
//! field is optional, and [`LibrarySource::from_entry`] applies all defaults
//! exactly once. The rest of the crate only ever sees fully populated
//! [`LibrarySource`] values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::paths::AppPaths;

/// Current `libraries.json` schema version.
pub const CONFIG_VERSION: u32 = 1;

/// Include globs given to newly added sources and used when a source has none.
pub const DEFAULT_INCLUDE_GLOBS: &[&str] = &["**/*.cho", "**/*.chopro", "**/*.pro", "**/*.txt"];

/// Exclude globs given to newly added sources and used when a source has none.
pub const DEFAULT_EXCLUDE_GLOBS: &[&str] = &["**/.git/**"];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// The full set of configured library sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibrariesConfig {
    pub version: u32,
    pub library_sources: Vec<LibrarySource>,
}

impl Default for LibrariesConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            library_sources: Vec::new(),
        }
    }
}

/// Raw shape of `libraries.json` before defaults are applied.
#[derive(Debug, Default, Deserialize)]
struct LibrariesFile {
    version: Option<u32>,
    library_sources: Option<Vec<SourceEntry>>,
}

impl LibrariesConfig {
    /// Parse `libraries.json` contents. Entries without an id are dropped.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw: LibrariesFile =
            serde_json::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let entries = raw.library_sources.unwrap_or_default();
        let total = entries.len();
        let library_sources: Vec<LibrarySource> =
            entries.into_iter().filter_map(LibrarySource::from_entry).collect();
        if library_sources.len() < total {
            warn!(
                dropped = total - library_sources.len(),
                "ignoring library entries without an id"
            );
        }

        Ok(Self {
            version: raw.version.filter(|v| *v > 0).unwrap_or(CONFIG_VERSION),
            library_sources,
        })
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load from `path`. A missing file is created holding an empty config.
    /// A corrupt file is moved aside to `<path>.corrupt-<timestamp>` before
    /// an empty config replaces it, so a later save cannot destroy it.
    pub fn load_or_init<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading libraries configuration");

        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path)?;
        match Self::from_json(&contents) {
            Ok(config) => {
                debug!(sources = config.library_sources.len(), "libraries configuration parsed");
                Ok(config)
            }
            Err(e) => {
                let backup = quarantine(path)?;
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "corrupt libraries configuration moved aside, starting empty"
                );
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
        }
    }

    /// Write to `path`, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        debug!(path = %path.display(), "libraries configuration saved");
        Ok(())
    }

    pub fn find(&self, source_id: &str) -> Option<&LibrarySource> {
        self.library_sources.iter().find(|s| s.source_id == source_id)
    }

    pub fn find_mut(&mut self, source_id: &str) -> Option<&mut LibrarySource> {
        self.library_sources
            .iter_mut()
            .find(|s| s.source_id == source_id)
    }

    /// Append a source, rejecting a duplicate id.
    pub fn add(&mut self, source: LibrarySource) -> Result<(), ConfigError> {
        if self.find(&source.source_id).is_some() {
            return Err(ConfigError::DuplicateSource(source.source_id));
        }
        self.library_sources.push(source);
        Ok(())
    }

    /// Remove and return the source with `source_id`.
    pub fn remove(&mut self, source_id: &str) -> Result<LibrarySource, ConfigError> {
        let idx = self
            .library_sources
            .iter()
            .position(|s| s.source_id == source_id)
            .ok_or_else(|| ConfigError::SourceNotFound(source_id.to_string()))?;
        Ok(self.library_sources.remove(idx))
    }
}

// ---------------------------------------------------------------------------
// Library source
// ---------------------------------------------------------------------------

/// One subscribed repository and its local directory layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibrarySource {
    #[serde(rename = "id")]
    pub source_id: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub name: String,
    pub enabled: bool,
    pub repo_url: String,
    pub default_branch: String,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub sync: SyncSettings,
    pub auth: AuthSettings,
    pub local: LocalPaths,
}

/// A `library_sources` entry as written on disk, every field optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceEntry {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub source_type: Option<String>,
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub repo_url: Option<String>,
    pub default_branch: Option<String>,
    pub include_globs: Option<Vec<String>>,
    pub exclude_globs: Option<Vec<String>>,
    pub sync: Option<SyncSettings>,
    pub auth: Option<AuthSettings>,
    pub local: Option<LocalEntry>,
}

/// Raw `local` block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalEntry {
    pub source_root: Option<String>,
    pub mirror_dir: Option<String>,
    pub published_dir: Option<String>,
    pub overrides_dir: Option<String>,
}

/// Directory roots of a source, relative to the app-data base unless absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPaths {
    pub source_root: String,
    pub mirror_dir: String,
    pub published_dir: String,
    pub overrides_dir: String,
}

impl LocalPaths {
    /// Fill any missing root with the layout convention for `source_id`.
    fn with_defaults(source_id: &str, raw: LocalEntry) -> Self {
        let source_root = non_empty(raw.source_root)
            .unwrap_or_else(|| format!("libraries/sources/{source_id}"));
        let mirror_dir = non_empty(raw.mirror_dir)
            .unwrap_or_else(|| format!("libraries/sources/{source_id}/mirror"));
        Self {
            source_root,
            mirror_dir,
            published_dir: non_empty(raw.published_dir)
                .unwrap_or_else(|| format!("libraries/published/{source_id}")),
            overrides_dir: non_empty(raw.overrides_dir)
                .unwrap_or_else(|| format!("songs/overrides/{source_id}")),
        }
    }
}

/// How and when a source is synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_sync_mode")]
    pub mode: String,
    #[serde(default)]
    pub pin: PinSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            mode: default_sync_mode(),
            pin: PinSettings::default(),
        }
    }
}

/// Optional pin of a source to a fixed ref.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

/// Credentials lookup for private repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_auth_mode")]
    pub mode: String,
    #[serde(default)]
    pub token_keychain_id: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
            token_keychain_id: None,
        }
    }
}

fn default_source_type() -> String {
    "github".into()
}
fn default_branch() -> String {
    "main".into()
}
fn default_sync_mode() -> String {
    "manual".into()
}
fn default_auth_mode() -> String {
    "none".into()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl LibrarySource {
    /// Build a new source for `repo_url` with the default globs and layout.
    pub fn new(repo_url: &str, branch: Option<&str>, name: Option<&str>) -> Self {
        let repo_url = repo_url.trim();
        let name = non_empty(name.map(str::to_string))
            .unwrap_or_else(|| default_name_for_url(repo_url));
        Self::with_id(
            source_id_for_url(repo_url),
            SourceEntry {
                name: Some(name),
                repo_url: Some(repo_url.to_string()),
                default_branch: branch.map(str::to_string),
                include_globs: Some(globs_or_default(&[], DEFAULT_INCLUDE_GLOBS)),
                exclude_globs: Some(globs_or_default(&[], DEFAULT_EXCLUDE_GLOBS)),
                ..Default::default()
            },
        )
    }

    /// Apply defaults to a raw entry. Returns `None` when the entry has no id.
    pub fn from_entry(mut entry: SourceEntry) -> Option<Self> {
        let source_id = non_empty(entry.id.take())?;
        Some(Self::with_id(source_id, entry))
    }

    fn with_id(source_id: String, entry: SourceEntry) -> Self {
        Self {
            source_type: non_empty(entry.source_type).unwrap_or_else(default_source_type),
            name: non_empty(entry.name).unwrap_or_else(|| source_id.clone()),
            enabled: entry.enabled.unwrap_or(true),
            repo_url: entry.repo_url.unwrap_or_default().trim().to_string(),
            default_branch: non_empty(entry.default_branch).unwrap_or_else(default_branch),
            include_globs: entry.include_globs.unwrap_or_default(),
            exclude_globs: entry.exclude_globs.unwrap_or_default(),
            sync: entry.sync.unwrap_or_default(),
            auth: entry.auth.unwrap_or_default(),
            local: LocalPaths::with_defaults(&source_id, entry.local.unwrap_or_default()),
            source_id,
        }
    }

    /// Check the fields a sync cannot do without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repo_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repo_url".into(),
                detail: "repository URL must not be empty".into(),
            });
        }
        if self.default_branch.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                field: "default_branch".into(),
                detail: "branch name must not contain whitespace".into(),
            });
        }
        Ok(())
    }

    pub fn source_root(&self, paths: &AppPaths) -> PathBuf {
        paths.resolve(&self.local.source_root)
    }

    pub fn mirror_dir(&self, paths: &AppPaths) -> PathBuf {
        paths.resolve(&self.local.mirror_dir)
    }

    pub fn published_dir(&self, paths: &AppPaths) -> PathBuf {
        paths.resolve(&self.local.published_dir)
    }

    pub fn overrides_dir(&self, paths: &AppPaths) -> PathBuf {
        paths.resolve(&self.local.overrides_dir)
    }

    /// Include globs, falling back to [`DEFAULT_INCLUDE_GLOBS`] when unset.
    pub fn effective_include_globs(&self) -> Vec<String> {
        globs_or_default(&self.include_globs, DEFAULT_INCLUDE_GLOBS)
    }

    /// Exclude globs, falling back to [`DEFAULT_EXCLUDE_GLOBS`] when unset.
    pub fn effective_exclude_globs(&self) -> Vec<String> {
        globs_or_default(&self.exclude_globs, DEFAULT_EXCLUDE_GLOBS)
    }
}

fn globs_or_default(globs: &[String], defaults: &[&str]) -> Vec<String> {
    if globs.is_empty() {
        defaults.iter().map(|g| g.to_string()).collect()
    } else {
        globs.to_vec()
    }
}

/// Rename a corrupt file to a timestamped sibling and return the new path.
fn quarantine(path: &Path) -> Result<PathBuf, ConfigError> {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(
        ".corrupt-{}",
        chrono::Utc::now().format("%Y%m%d%H%M%S%3f")
    ));
    let backup = path.with_file_name(name);
    std::fs::rename(path, &backup)?;
    Ok(backup)
}

/// Stable source id for a repository URL: `gh_` plus 8 hex digits of its SHA-256.
pub fn source_id_for_url(repo_url: &str) -> String {
    let digest = Sha256::digest(repo_url.trim().as_bytes());
    format!("gh_{}", &hex::encode(digest)[..8])
}

/// Last path segment of a repository URL without a `.git` suffix.
fn default_name_for_url(repo_url: &str) -> String {
    let last = repo_url
        .trim_end_matches('/')
        .rsplit(&['/', ':'][..])
        .next()
        .unwrap_or(repo_url);
    last.trim_end_matches(".git").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
  "version": 1,
  "library_sources": [
    {
      "id": "gh_0a1b2c3d",
      "type": "github",
      "name": "Worship Charts",
      "enabled": false,
      "repo_url": "https://github.com/acme/charts.git",
      "default_branch": "trunk",
      "include_globs": ["**/*.pro"],
      "exclude_globs": ["drafts/**"],
      "sync": {"mode": "manual", "pin": {"enabled": true, "ref": "v1.2"}},
      "auth": {"mode": "none", "token_keychain_id": null},
      "local": {"published_dir": "/srv/published/charts"}
    },
    { "name": "no id, dropped" },
    { "id": "gh_minimal", "repo_url": null, "default_branch": null }
  ]
}"#
    }

    #[test]
    fn test_parse_full_config() {
        let config = LibrariesConfig::from_json(sample_json()).expect("failed to parse json");
        assert_eq!(config.version, 1);
        assert_eq!(config.library_sources.len(), 2);

        let source = config.find("gh_0a1b2c3d").unwrap();
        assert_eq!(source.name, "Worship Charts");
        assert!(!source.enabled);
        assert_eq!(source.default_branch, "trunk");
        assert_eq!(source.include_globs, vec!["**/*.pro"]);
        assert!(source.sync.pin.enabled);
        assert_eq!(source.sync.pin.reference.as_deref(), Some("v1.2"));
        assert_eq!(source.local.published_dir, "/srv/published/charts");
        assert_eq!(source.local.mirror_dir, "libraries/sources/gh_0a1b2c3d/mirror");
    }

    #[test]
    fn test_defaults_applied_once() {
        let config = LibrariesConfig::from_json(sample_json()).unwrap();
        let source = config.find("gh_minimal").unwrap();
        assert_eq!(source.source_type, "github");
        assert_eq!(source.name, "gh_minimal");
        assert!(source.enabled);
        assert_eq!(source.default_branch, "main");
        assert_eq!(source.repo_url, "");
        assert_eq!(source.sync.mode, "manual");
        assert_eq!(source.auth.mode, "none");
        assert_eq!(source.local.source_root, "libraries/sources/gh_minimal");
        assert_eq!(source.local.overrides_dir, "songs/overrides/gh_minimal");
    }

    #[test]
    fn test_round_trip_through_json() {
        let config = LibrariesConfig::from_json(sample_json()).unwrap();
        let json = config.to_json().unwrap();
        assert!(json.contains("\"id\": \"gh_0a1b2c3d\""));
        assert!(json.contains("\"ref\": \"v1.2\""));
        let reparsed = LibrariesConfig::from_json(&json).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_source_id_is_deterministic() {
        let a = source_id_for_url("https://github.com/acme/charts.git");
        let b = source_id_for_url("  https://github.com/acme/charts.git ");
        let c = source_id_for_url("https://github.com/acme/other.git");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("gh_"));
        assert_eq!(a.len(), 11);
    }

    #[test]
    fn test_new_source_defaults() {
        let source = LibrarySource::new("https://github.com/acme/charts.git", None, None);
        assert_eq!(source.name, "charts");
        assert_eq!(source.default_branch, "main");
        assert_eq!(source.include_globs.len(), 4);
        assert_eq!(source.exclude_globs, vec!["**/.git/**"]);
        source.validate().unwrap();
    }

    #[test]
    fn test_directory_roots_are_namespaced() {
        let paths = AppPaths::new("/data");
        let a = LibrarySource::new("https://example.com/a.git", None, None);
        let b = LibrarySource::new("https://example.com/b.git", None, None);
        assert_ne!(a.mirror_dir(&paths), b.mirror_dir(&paths));
        assert_ne!(a.published_dir(&paths), b.published_dir(&paths));
        assert_eq!(
            a.published_dir(&paths),
            PathBuf::from(format!("/data/libraries/published/{}", a.source_id))
        );
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut config = LibrariesConfig::default();
        config
            .add(LibrarySource::new("https://example.com/a.git", None, None))
            .unwrap();
        let err = config
            .add(LibrarySource::new("https://example.com/a.git", Some("dev"), None))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSource(_)));
    }

    #[test]
    fn test_load_or_init_creates_and_tolerates_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libraries.json");

        let config = LibrariesConfig::load_or_init(&path).unwrap();
        assert!(config.library_sources.is_empty());
        assert!(path.exists());

        std::fs::write(&path, "{ not json").unwrap();
        let config = LibrariesConfig::load_or_init(&path).unwrap();
        assert_eq!(config, LibrariesConfig::default());

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("libraries.json.corrupt-"))
            })
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::read_to_string(&backups[0]).unwrap(), "{ not json");
        assert_eq!(LibrariesConfig::load_or_init(&path).unwrap(), LibrariesConfig::default());
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let config = LibrariesConfig::from_json(sample_json()).unwrap();
        let result = config.find("gh_minimal").unwrap().validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "repo_url"
        ));
    }
}
