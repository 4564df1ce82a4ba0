//! Asynchronous git CLI client.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{ChangeKind, DiffEntry, MirrorClient};
use crate::errors::MirrorError;
use crate::settings::GitSettings;

/// Time budget for the `git --version` availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// [`MirrorClient`] that runs the `git` binary as a subprocess.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
    timeout: Duration,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::from_settings(&GitSettings::default())
    }
}

impl GitCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &GitSettings) -> Self {
        Self::new(settings.binary.clone(), settings.timeout())
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `git [-C dir] <args>` and return trimmed stdout.
    async fn run_git(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, MirrorError> {
        self.run_git_with_timeout(dir, args, self.timeout).await
    }

    async fn run_git_with_timeout(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        limit: Duration,
    ) -> Result<String, MirrorError> {
        let stdout = self.run_git_raw(dir, args, limit).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// Run `git [-C dir] <args>` and return stdout bytes untouched.
    async fn run_git_raw(
        &self,
        dir: Option<&Path>,
        args: &[&str],
        limit: Duration,
    ) -> Result<Vec<u8>, MirrorError> {
        let label = match args.first() {
            Some(sub) => format!("git {sub}"),
            None => "git".to_string(),
        };

        let mut cmd = Command::new(&self.binary);
        if let Some(dir) = dir {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Never block on a credential prompt.
        if std::env::var_os("GIT_TERMINAL_PROMPT").is_none() {
            cmd.env("GIT_TERMINAL_PROMPT", "0");
        }
        if std::env::var_os("GIT_ASKPASS").is_none() {
            cmd.env("GIT_ASKPASS", "echo");
        }

        debug!(cmd = %format!("{} {}", self.binary, args.join(" ")), "running git command");
        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(result) => result.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MirrorError::BinaryNotFound(self.binary.clone())
                } else {
                    MirrorError::IoError(e)
                }
            })?,
            Err(_) => {
                warn!(command = %label, secs = limit.as_secs(), "git command timed out");
                return Err(MirrorError::Timeout {
                    command: label,
                    secs: limit.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            let detail = if !stderr.is_empty() {
                stderr
            } else if !stdout.is_empty() {
                stdout
            } else {
                format!("{label} failed")
            };
            warn!(command = %label, exit_code, stderr = %detail, "git command failed");
            return Err(MirrorError::CommandFailed {
                command: label,
                exit_code,
                stderr: detail,
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl MirrorClient for GitCli {
    async fn is_available(&self) -> bool {
        match self
            .run_git_with_timeout(None, &["--version"], PROBE_TIMEOUT)
            .await
        {
            Ok(version) => {
                debug!(%version, "git is available");
                true
            }
            Err(e) => {
                warn!(error = %e, "git is not available");
                false
            }
        }
    }

    #[instrument(skip(self), fields(dest = %dest.display()))]
    async fn clone_repo(
        &self,
        repo_url: &str,
        branch: &str,
        dest: &Path,
    ) -> Result<(), MirrorError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let dest_str = dest.to_string_lossy();
        self.run_git(None, &["clone", "--branch", branch, "--", repo_url, &dest_str])
            .await?;
        info!("clone completed");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn fetch(&self, dir: &Path) -> Result<(), MirrorError> {
        self.run_git(Some(dir), &["fetch", "--prune", "origin"]).await?;
        debug!("fetch completed");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn checkout(&self, dir: &Path, branch: &str) -> Result<(), MirrorError> {
        self.run_git(Some(dir), &["checkout", branch]).await?;
        debug!("checkout completed");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn hard_reset_to_remote(&self, dir: &Path, branch: &str) -> Result<(), MirrorError> {
        let remote_ref = format!("origin/{branch}");
        self.run_git(Some(dir), &["reset", "--hard", &remote_ref])
            .await?;
        self.run_git(Some(dir), &["clean", "-fdx"]).await?;
        debug!(%remote_ref, "working tree reset to remote");
        Ok(())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn head_commit(&self, dir: &Path, reference: &str) -> Result<String, MirrorError> {
        let commit = self
            .run_git(Some(dir), &["rev-parse", "--verify", reference])
            .await?;
        debug!(%commit, "resolved ref");
        Ok(commit)
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn diff_by_path_status(
        &self,
        dir: &Path,
        from: &str,
        to: &str,
    ) -> Result<Vec<DiffEntry>, MirrorError> {
        let output = self
            .run_git_raw(
                Some(dir),
                &["diff", "--name-status", "--no-renames", "-z", from, to],
                self.timeout,
            )
            .await?;
        let entries = parse_name_status_z(&output);
        debug!(count = entries.len(), "computed path-status diff");
        Ok(entries)
    }
}

/// Parse `git diff --name-status -z` output.
///
/// Records are NUL separated: `status\0path\0`, or `status\0old\0new\0` for
/// renames and copies. A rename is reported as a deletion of the old path
/// plus an addition of the new one; a copy as an addition. Paths that are
/// not valid UTF-8 cannot be filtered or published and are skipped.
pub fn parse_name_status_z(output: &[u8]) -> Vec<DiffEntry> {
    let mut entries = Vec::new();
    let mut fields = output.split(|b| *b == 0).filter(|f| !f.is_empty());

    while let Some(status) = fields.next() {
        let status = String::from_utf8_lossy(status);
        let mut push = |kind: ChangeKind, raw: &[u8]| match std::str::from_utf8(raw) {
            Ok(path) => entries.push(DiffEntry::new(kind, path)),
            Err(_) => warn!(
                path = %String::from_utf8_lossy(raw),
                "skipping path that is not valid UTF-8"
            ),
        };
        match ChangeKind::from_status(status.trim()) {
            ChangeKind::Renamed => {
                let (Some(old), Some(new)) = (fields.next(), fields.next()) else {
                    break;
                };
                push(ChangeKind::Deleted, old);
                push(ChangeKind::Added, new);
            }
            ChangeKind::Copied => {
                let (Some(_), Some(new)) = (fields.next(), fields.next()) else {
                    break;
                };
                push(ChangeKind::Added, new);
            }
            kind => {
                let Some(path) = fields.next() else {
                    break;
                };
                push(kind, path);
            }
        }
    }
    entries
}
