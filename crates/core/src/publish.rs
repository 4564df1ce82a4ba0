//! Publishing of normalized song files from a mirror into a published tree.
//!
//! # Strategies
//!
//! | Strategy | Staging | On any per-file error |
//! |----------|---------|-----------------------|
//! | [`Publisher::publish_full`] | `<published>.tmp`, swapped in by rename | previous tree untouched |
//! | [`Publisher::publish_incremental`] | none, writes in place | already-applied files stay |
//!
//! Per-file normalization failures are collected into
//! [`PublishReport::errors`] so every problem file is reported in one pass.
//! Filesystem failures abort with a [`PublishError`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::LibrarySource;
use crate::errors::{FileError, PublishError};
use crate::normalize::Normalizer;

/// Extensions (lowercase, without dot) of documents that are published.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["cho", "chopro", "pro", "txt"];

/// Manifest written at the root of every published tree.
pub const MANIFEST_FILE: &str = "publish_manifest.json";

/// `true` if the path has one of the [`SUPPORTED_EXTENSIONS`].
pub fn is_supported_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Shell-style glob match of a forward-slash relative path.
///
/// See [`GlobPattern`] for the matching rules.
pub fn glob_matches(pattern: &str, rel_path: &str) -> bool {
    GlobPattern::new(pattern).matches(rel_path)
}

/// A compiled fnmatch-style pattern.
///
/// `*` matches any run of characters and `?` any single character, both
/// including `/`, so `*.pro` selects `.pro` files at any depth. `[seq]` and
/// `[!seq]` are character sets. A pattern `**/X` also matches `X` at the root.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    regex: Option<Regex>,
    root: Option<Regex>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        let raw = pattern.replace('\\', "/");
        let regex = compile_glob(&raw);
        let root = raw.strip_prefix("**/").and_then(compile_glob);
        Self { raw, regex, root }
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        let path = rel_path.replace('\\', "/");
        match &self.regex {
            Some(re) => {
                re.is_match(&path) || self.root.as_ref().is_some_and(|re| re.is_match(&path))
            }
            None => self.raw == path,
        }
    }
}

/// Compile a glob into an anchored regex. A pattern the regex engine
/// rejects (e.g. a reversed range) yields `None` and is compared literally.
fn compile_glob(pattern: &str) -> Option<Regex> {
    let source = glob_to_regex(pattern);
    match Regex::new(&source) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern, error = %e, "invalid glob pattern, matching literally");
            None
        }
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^(?s:");
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => {
                while chars.get(i) == Some(&'*') {
                    i += 1;
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    push_class(&mut out, &chars[i..end]);
                    i = end + 1;
                }
                None => out.push_str("\\["),
            },
            _ => out.push_str(&regex_lite::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push_str(")$");
    out
}

/// Index of the `]` closing a set that opens just before `start`. A `]`
/// right after `[` or `[!` is a member, not the terminator.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start;
    if chars.get(j) == Some(&'!') {
        j += 1;
    }
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    (j..chars.len()).find(|&k| chars[k] == ']')
}

fn push_class(out: &mut String, body: &[char]) {
    let (negate, members) = match body.split_first() {
        Some(('!', rest)) => (true, rest),
        _ => (false, body),
    };
    out.push('[');
    if negate {
        out.push('^');
    }
    let last = members.len().saturating_sub(1);
    for (k, &m) in members.iter().enumerate() {
        if m == '-' && k != 0 && k != last {
            out.push('-');
        } else {
            out.push_str(&regex_lite::escape(m.encode_utf8(&mut [0; 4])));
        }
    }
    out.push(']');
}

// ---------------------------------------------------------------------------
// File selection
// ---------------------------------------------------------------------------

/// Include/exclude glob filter over mirror-relative paths.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: Vec<GlobPattern>,
    exclude: Vec<GlobPattern>,
}

impl FileFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        let compile = |globs: Vec<String>| -> Vec<GlobPattern> {
            globs.iter().map(|g| GlobPattern::new(g)).collect()
        };
        Self {
            include: compile(include),
            exclude: compile(exclude),
        }
    }

    /// Filter for a source, using the default globs where it has none.
    pub fn for_source(source: &LibrarySource) -> Self {
        Self::new(
            source.effective_include_globs(),
            source.effective_exclude_globs(),
        )
    }

    /// Exclude first; then keep if there are no includes or one matches.
    pub fn matches(&self, rel_path: &str) -> bool {
        if self.exclude.iter().any(|p| p.matches(rel_path)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches(rel_path))
    }

    /// Supported extension and [`matches`](Self::matches).
    pub fn accepts(&self, rel_path: &str) -> bool {
        is_supported_path(Path::new(rel_path)) && self.matches(rel_path)
    }
}

/// Forward-slash form of `path` relative to `root`, or `None` when it is
/// outside `root` or not valid UTF-8.
fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

// ---------------------------------------------------------------------------
// Reports and manifest
// ---------------------------------------------------------------------------

/// Outcome of one publish call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub files_written: u64,
    pub files_deleted: u64,
    pub errors: Vec<FileError>,
}

impl PublishReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Contents of `publish_manifest.json`. Written for observability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishManifest {
    pub source_id: String,
    pub head_commit: String,
    pub files_written: u64,
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Writes normalized documents into published trees.
#[derive(Clone)]
pub struct Publisher {
    normalizer: Arc<dyn Normalizer>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").finish_non_exhaustive()
    }
}

impl Publisher {
    pub fn new(normalizer: Arc<dyn Normalizer>) -> Self {
        Self { normalizer }
    }

    /// Walk `mirror_dir` and return the sorted relative paths `filter` accepts.
    /// `.git` directories are never descended into.
    pub fn scan_files(
        &self,
        mirror_dir: &Path,
        filter: &FileFilter,
    ) -> Result<Vec<String>, PublishError> {
        let mut files = Vec::new();
        let walker = WalkDir::new(mirror_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == ".git"));

        for entry in walker {
            let entry = entry.map_err(|e| PublishError::Walk {
                path: mirror_dir.to_path_buf(),
                detail: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = relative_slash_path(mirror_dir, entry.path()) else {
                warn!(path = %entry.path().display(), "skipping path that is not valid UTF-8");
                continue;
            };
            if filter.accepts(&rel) {
                files.push(rel);
            }
        }
        debug!(mirror = %mirror_dir.display(), count = files.len(), "scanned mirror");
        Ok(files)
    }

    /// Normalize every file into `<published_dir>.tmp`, then swap it in.
    ///
    /// The swap only happens when no file failed; otherwise the staging
    /// directory is discarded and `published_dir` is left exactly as it was.
    pub fn publish_full(
        &self,
        source_id: &str,
        mirror_dir: &Path,
        published_dir: &Path,
        files: &[String],
    ) -> Result<PublishReport, PublishError> {
        let staging = sibling(published_dir, ".tmp");
        remove_dir_if_exists(&staging)?;
        std::fs::create_dir_all(&staging).map_err(|e| PublishError::io(&staging, e))?;

        let mut report = PublishReport::default();
        for rel in files {
            if self.publish_one(mirror_dir, &staging, rel, &mut report)? {
                report.files_written += 1;
            }
        }

        if !report.success() {
            warn!(
                source_id,
                failed = report.errors.len(),
                "full publish rejected, keeping previous tree"
            );
            if let Err(e) = std::fs::remove_dir_all(&staging) {
                warn!(path = %staging.display(), error = %e, "failed to discard staging directory");
            }
            return Ok(report);
        }

        swap_into_place(&staging, published_dir)?;
        info!(source_id, files = report.files_written, "full publish complete");
        Ok(report)
    }

    /// Apply changed and deleted paths directly to `published_dir`.
    ///
    /// Deleting a file prunes ancestor directories that become empty, up to
    /// but never including `published_dir`. Changes already written stay in
    /// place when a later file fails.
    pub fn publish_incremental(
        &self,
        mirror_dir: &Path,
        published_dir: &Path,
        changed: &[String],
        deleted: &[String],
    ) -> Result<PublishReport, PublishError> {
        let mut report = PublishReport::default();
        for rel in changed {
            if self.publish_one(mirror_dir, published_dir, rel, &mut report)? {
                report.files_written += 1;
            }
        }

        for rel in deleted {
            let dest = published_dir.join(rel);
            if !dest.is_file() {
                continue;
            }
            std::fs::remove_file(&dest).map_err(|e| PublishError::io(&dest, e))?;
            report.files_deleted += 1;
            if let Some(parent) = dest.parent() {
                prune_empty_dirs(parent, published_dir)?;
            }
        }

        info!(
            published = %published_dir.display(),
            written = report.files_written,
            deleted = report.files_deleted,
            failed = report.errors.len(),
            "incremental publish complete"
        );
        Ok(report)
    }

    /// Normalize `rel` from `mirror_dir` into `dest_root`. Returns `false`
    /// when the file was rejected and recorded in `report.errors`.
    fn publish_one(
        &self,
        mirror_dir: &Path,
        dest_root: &Path,
        rel: &str,
        report: &mut PublishReport,
    ) -> Result<bool, PublishError> {
        let text = match self.normalizer.normalize(&mirror_dir.join(rel)) {
            Ok(text) => text,
            Err(e) => {
                debug!(path = rel, error = %e, "normalization failed");
                report.errors.push(FileError {
                    path: rel.to_string(),
                    reason: e.to_string(),
                });
                return Ok(false);
            }
        };
        let dest = dest_root.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PublishError::io(parent, e))?;
        }
        std::fs::write(&dest, text).map_err(|e| PublishError::io(&dest, e))?;
        Ok(true)
    }
}

/// Write `publish_manifest.json` at the root of `published_dir`.
pub fn write_manifest(
    source_id: &str,
    published_dir: &Path,
    head_commit: &str,
    files_written: u64,
) -> Result<(), PublishError> {
    let manifest = PublishManifest {
        source_id: source_id.to_string(),
        head_commit: head_commit.to_string(),
        files_written,
    };
    std::fs::create_dir_all(published_dir).map_err(|e| PublishError::io(published_dir, e))?;
    let path = published_dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&manifest)?;
    std::fs::write(&path, json).map_err(|e| PublishError::io(&path, e))?;
    debug!(path = %path.display(), "publish manifest written");
    Ok(())
}

/// Number of supported documents currently under `published_dir`.
pub fn count_published_files(published_dir: &Path) -> u64 {
    if !published_dir.is_dir() {
        return 0;
    }
    WalkDir::new(published_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_supported_path(e.path()))
        .count() as u64
}

// ---------------------------------------------------------------------------
// Filesystem helpers
// ---------------------------------------------------------------------------

/// `<dir><suffix>` next to `dir`, e.g. `published/gh_x.tmp`.
pub(crate) fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = dir.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    dir.with_file_name(name)
}

fn remove_dir_if_exists(dir: &Path) -> Result<(), PublishError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PublishError::io(dir, e)),
    }
}

/// Replace `target` with the fully populated `staging` directory.
///
/// The old tree is moved aside first and restored if the final rename fails,
/// so readers never observe a half-written tree.
fn swap_into_place(staging: &Path, target: &Path) -> Result<(), PublishError> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PublishError::io(parent, e))?;
    }
    let backup = sibling(target, ".old");
    remove_dir_if_exists(&backup)?;

    let had_previous = target.exists();
    if had_previous {
        std::fs::rename(target, &backup).map_err(|e| PublishError::io(target, e))?;
    }
    if let Err(e) = std::fs::rename(staging, target) {
        if had_previous {
            if let Err(restore) = std::fs::rename(&backup, target) {
                warn!(path = %target.display(), error = %restore, "failed to restore previous published tree");
            }
        }
        return Err(PublishError::io(target, e));
    }
    if had_previous {
        if let Err(e) = std::fs::remove_dir_all(&backup) {
            warn!(path = %backup.display(), error = %e, "failed to remove previous published tree");
        }
    }
    Ok(())
}

/// Remove empty directories from `start` upward, stopping strictly below `stop`.
fn prune_empty_dirs(start: &Path, stop: &Path) -> Result<(), PublishError> {
    let mut current = start.to_path_buf();
    while current != stop && current.starts_with(stop) {
        let mut entries = std::fs::read_dir(&current).map_err(|e| PublishError::io(&current, e))?;
        if entries.next().is_some() {
            break;
        }
        std::fs::remove_dir(&current).map_err(|e| PublishError::io(&current, e))?;
        debug!(path = %current.display(), "pruned empty directory");
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
    Ok(())
}
