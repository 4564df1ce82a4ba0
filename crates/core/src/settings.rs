//! TOML application settings.
//!
//! Settings are optional: a missing file yields [`Settings::default`]. The
//! libraries themselves live in `libraries.json` (see [`crate::config`]);
//! this file only tunes where data lives and how the VCS binary is driven.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::paths::{expand_tilde, AppPaths, APP_DIR_NAME};

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application data directory. Defaults to the platform data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// VCS subprocess settings.
    #[serde(default)]
    pub git: GitSettings,
}

/// How the external `git` binary is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    /// Binary name or path (default `git`).
    #[serde(default = "default_git_binary")]
    pub binary: String,

    /// Upper bound on a single git invocation (default 120).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_log_level() -> String {
    "warn".into()
}
fn default_git_binary() -> String {
    "git".into()
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: None,
            log_level: default_log_level(),
            git: GitSettings::default(),
        }
    }
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GitSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Settings {
    /// Default location: `<config-dir>/songlib/settings.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("settings.toml"))
    }

    /// Load settings from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading settings");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Settings =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("settings parsed successfully");
        Ok(settings)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load_from_file(path) {
            Err(ConfigError::FileNotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Validate that all values are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.git.binary.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "git.binary".into(),
                detail: "git binary must not be empty".into(),
            });
        }
        if self.git.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "git.timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        Ok(())
    }

    /// Resolve the application data layout.
    pub fn app_paths(&self) -> Result<AppPaths, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(AppPaths::new(expand_tilde(&dir.to_string_lossy()))),
            None => AppPaths::platform_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
data_dir = "/tmp/songlib"
log_level = "debug"

[git]
binary = "/usr/local/bin/git"
timeout_secs = 30
"#
    }

    #[test]
    fn test_parse_full_settings() {
        let settings: Settings = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(settings.data_dir, Some(PathBuf::from("/tmp/songlib")));
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.git.binary, "/usr/local/bin/git");
        assert_eq!(settings.git.timeout(), Duration::from_secs(30));
        assert_eq!(
            settings.app_paths().unwrap().base(),
            Path::new("/tmp/songlib")
        );
    }

    #[test]
    fn test_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.log_level, "warn");
        assert_eq!(settings.git.binary, "git");
        assert_eq!(settings.git.timeout_secs, 120);
        assert!(settings.data_dir.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let settings = Settings::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(settings.git.timeout_secs, 30);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let result = Settings::load_from_file("/nonexistent/settings.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));

        let settings = Settings::load_or_default("/nonexistent/settings.toml").unwrap();
        assert_eq!(settings.git.timeout_secs, 120);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut settings = Settings::default();
        settings.git.timeout_secs = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "git.timeout_secs"
        ));
    }
}
