//! End-to-end tests against real git repositories.
//!
//! An "upstream" repository is created with `git init` in a temp dir and
//! cloned by path, so no network I/O happens. The tests drive `GitCli`
//! directly and the full `SyncService` pipeline with JSON-backed stores.
//!
//! Tests skip gracefully if `git` is not installed.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use tempfile::TempDir;

use songlib_core::mirror::{ChangeKind, DiffEntry, GitCli, MirrorClient};
use songlib_core::publish::MANIFEST_FILE;
use songlib_core::store::{JsonLibraryStore, JsonStateStore, StateStore};
use songlib_core::{
    AppPaths, ChordProNormalizer, LibraryManager, PendingUpdates, SyncProgress, SyncService,
    SyncStatus,
};

// ===========================================================================
// Helpers
// ===========================================================================

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=Test User",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create an upstream repository on branch `main` with one commit.
fn create_upstream(dir: &Path, files: &[(&str, &str)]) -> String {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    commit_files(dir, files, &[], "initial")
}

/// Write and delete files, commit everything, and return the new HEAD.
fn commit_files(dir: &Path, write: &[(&str, &str)], delete: &[&str], message: &str) -> String {
    for (rel, contents) in write {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
    for rel in delete {
        std::fs::remove_file(dir.join(rel)).unwrap();
    }
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

const SONG_A: &str = "{title: A}\n[C]la la\n";
const SONG_B: &str = "{title: B}\n[G]hey\n";
const PLAIN: &str = "Plain Song\nSomebody\n\nwords and more words\n";

// ===========================================================================
// GitCli
// ===========================================================================

#[tokio::test]
async fn test_git_cli_mirror_operations() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }

    let tmp = TempDir::new().unwrap();
    let upstream = tmp.path().join("upstream");
    let first = create_upstream(&upstream, &[("a.pro", SONG_A), ("dir/b.cho", SONG_B)]);
    let url = upstream.to_string_lossy().to_string();
    let mirror = tmp.path().join("cache").join("mirror");

    let client = GitCli::default();
    assert!(client.is_available().await);
    client.clone_repo(&url, "main", &mirror).await.unwrap();
    assert!(mirror.join(".git").exists());
    assert_eq!(client.head_commit(&mirror, "HEAD").await.unwrap(), first);

    git(&upstream, &["mv", "a.pro", "renamed one.pro"]);
    let second = commit_files(&upstream, &[("dir/b.cho", SONG_A)], &[], "rename and edit");

    client.fetch(&mirror).await.unwrap();
    client.checkout(&mirror, "main").await.unwrap();
    let remote = client.head_commit(&mirror, "origin/main").await.unwrap();
    assert_eq!(remote, second);

    std::fs::write(mirror.join("local-junk.txt"), "untracked").unwrap();
    client.hard_reset_to_remote(&mirror, "main").await.unwrap();
    assert_eq!(client.head_commit(&mirror, "HEAD").await.unwrap(), second);
    assert!(!mirror.join("local-junk.txt").exists());
    assert!(mirror.join("renamed one.pro").exists());

    let mut diff = client
        .diff_by_path_status(&mirror, &first, &second)
        .await
        .unwrap();
    diff.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(
        diff,
        vec![
            DiffEntry::new(ChangeKind::Deleted, "a.pro"),
            DiffEntry::new(ChangeKind::Modified, "dir/b.cho"),
            DiffEntry::new(ChangeKind::Added, "renamed one.pro"),
        ]
    );
}

#[tokio::test]
async fn test_git_cli_reports_command_failure() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }

    let tmp = TempDir::new().unwrap();
    let client = GitCli::default();
    let err = client
        .clone_repo(
            &tmp.path().join("does-not-exist").to_string_lossy(),
            "main",
            &tmp.path().join("mirror"),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("git clone failed"), "{err}");
}

// ===========================================================================
// Full pipeline
// ===========================================================================

#[tokio::test]
async fn test_sync_pipeline_with_real_git() {
    if !git_available() {
        eprintln!("SKIPPED: git not found in PATH");
        return;
    }

    let tmp = TempDir::new().unwrap();
    let upstream = tmp.path().join("upstream");
    let first = create_upstream(
        &upstream,
        &[
            ("a.pro", SONG_A),
            ("y.pro", SONG_A),
            ("old/deep/z.pro", SONG_B),
            ("notes/plain.txt", PLAIN),
            ("README.md", "# songs"),
        ],
    );

    let paths = AppPaths::new(tmp.path().join("data"));
    let libraries = Arc::new(JsonLibraryStore::for_paths(&paths));
    let states = Arc::new(JsonStateStore::new(paths.clone()));
    let manager = LibraryManager::new(libraries.clone(), states.clone(), paths.clone());
    let source = manager
        .add_source(&upstream.to_string_lossy(), None, Some("Upstream"))
        .unwrap();
    let id = source.source_id.clone();

    let git_client = Arc::new(GitCli::default());
    let service = SyncService::new(
        git_client.clone(),
        libraries,
        states.clone(),
        Arc::new(ChordProNormalizer),
        paths.clone(),
    );
    let quiet = |_: &SyncProgress| {};

    // First sync publishes everything.
    let result = service.sync(&id, &quiet).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.message, "Sync complete");
    assert_eq!(result.files_indexed, 4);
    assert_eq!(result.last_commit.as_deref(), Some(first.as_str()));

    let published = source.published_dir(&paths);
    assert!(published.join(MANIFEST_FILE).exists());
    assert!(published.join("old/deep/z.pro").exists());
    assert!(!published.join("README.md").exists());
    let plain = std::fs::read_to_string(published.join("notes/plain.txt")).unwrap();
    assert!(plain.starts_with("{title: Plain Song}\n{artist: Somebody}\n"));

    let status = manager.status(&id).unwrap();
    assert_eq!(
        manager.pending_updates(git_client.as_ref(), &status).await,
        PendingUpdates::UpToDate
    );

    // Nothing changed upstream.
    let result = service.sync(&id, &quiet).await;
    assert!(result.success);
    assert_eq!(result.message, "No updates");
    assert_eq!(result.files_indexed, 4);

    // Add x, modify y, delete z.
    let second = commit_files(
        &upstream,
        &[("x/new.pro", SONG_B), ("y.pro", SONG_B)],
        &["old/deep/z.pro"],
        "add modify delete",
    );
    let result = service.sync(&id, &quiet).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.last_commit.as_deref(), Some(second.as_str()));
    assert_eq!(
        std::fs::read_to_string(published.join("x/new.pro")).unwrap(),
        SONG_B
    );
    assert_eq!(
        std::fs::read_to_string(published.join("y.pro")).unwrap(),
        SONG_B
    );
    assert!(!published.join("old").exists());
    assert_eq!(result.files_indexed, 4);

    // A broken file blocks the publish and keeps the baseline.
    commit_files(&upstream, &[("broken.txt", "just one line")], &[], "broken");
    let result = service.sync(&id, &quiet).await;
    assert!(!result.success);
    assert!(result.message.contains("broken.txt"));
    let state = states.load(&id);
    assert_eq!(state.status, SyncStatus::Error);
    assert_eq!(state.last_commit.as_deref(), Some(second.as_str()));
    assert!(!published.join("broken.txt").exists());

    // Removing the source deletes its local trees.
    manager.remove_source(&id).unwrap();
    assert!(!published.exists());
    assert!(!source.mirror_dir(&paths).exists());
}
