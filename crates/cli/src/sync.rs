//! `songlib sync`: run one sync task per library, each with its own spinner.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::debug;

use songlib_core::store::{JsonLibraryStore, JsonStateStore};
use songlib_core::{
    ChordProNormalizer, GitCli, LibraryManager, SyncProgress, SyncResult, SyncService,
};

use crate::style;

pub async fn cmd_sync(
    manager: &LibraryManager,
    git: Arc<GitCli>,
    ids: Vec<String>,
    all: bool,
) -> Result<()> {
    let targets = select_targets(manager, ids, all)?;
    if targets.is_empty() {
        println!("No enabled libraries to sync.");
        return Ok(());
    }

    let paths = manager.paths().clone();
    let service = Arc::new(SyncService::new(
        git,
        Arc::new(JsonLibraryStore::for_paths(&paths)),
        Arc::new(JsonStateStore::new(paths.clone())),
        Arc::new(ChordProNormalizer),
        paths,
    ));

    let multi = MultiProgress::new();
    let mut tasks = Vec::with_capacity(targets.len());
    for (id, name) in targets {
        let spinner = multi.add(new_spinner(&name));
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let bar = spinner.clone();
            let label = name.clone();
            let on_progress = move |step: &SyncProgress| {
                bar.set_message(format!("{label}: {step}"));
            };
            let result = service.sync(&id, &on_progress).await;
            spinner.finish_and_clear();
            (name, result)
        }));
    }

    let mut failures = 0usize;
    for task in tasks {
        let (name, result) = task.await.context("sync task panicked")?;
        debug!(library = %name, success = result.success, "sync task finished");
        if !result.success {
            failures += 1;
        }
        print_result(&name, &result);
    }

    if failures > 0 {
        bail!("{failures} library sync(s) failed");
    }
    Ok(())
}

/// Resolve the requested ids (or every enabled source) to `(id, name)` pairs.
fn select_targets(
    manager: &LibraryManager,
    ids: Vec<String>,
    all: bool,
) -> Result<Vec<(String, String)>> {
    let sources = manager.list().context("failed to list libraries")?;
    if all {
        return Ok(sources
            .into_iter()
            .filter(|s| s.source.enabled)
            .map(|s| (s.source.source_id, s.source.name))
            .collect());
    }

    let mut targets: Vec<(String, String)> = Vec::with_capacity(ids.len());
    for id in ids {
        if targets.iter().any(|(seen, _)| *seen == id) {
            continue;
        }
        match sources.iter().find(|s| s.source.source_id == id) {
            Some(s) => targets.push((id, s.source.name.clone())),
            None => bail!("library '{}' not found", id),
        }
    }
    Ok(targets)
}

fn new_spinner(name: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message(format!("{name}: starting"));
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn print_result(name: &str, result: &SyncResult) {
    if result.success {
        let commit: String = result
            .last_commit
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(10)
            .collect();
        println!(
            "{}",
            style::success(&format!(
                "{}: {} ({} files @ {})",
                name, result.message, result.files_indexed, commit
            ))
        );
    } else {
        println!("{}", style::error(&format!("{}: sync failed", name)));
        for line in result.message.lines() {
            println!("    {}", style::dim(line));
        }
    }
}
