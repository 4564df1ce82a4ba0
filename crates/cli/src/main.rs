//! songlib command-line tool.
//!
//! Subscribes to git-hosted song libraries and keeps a normalized, published
//! copy of each one on disk. Provides subcommands for adding and removing
//! library sources, toggling them, inspecting their sync state, and running
//! syncs.

mod style;
mod sync;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use dialoguer::Confirm;
use tracing_subscriber::EnvFilter;

use songlib_core::store::{JsonLibraryStore, JsonStateStore};
use songlib_core::{
    AppPaths, GitCli, LibraryManager, PendingUpdates, Settings, SourceStatus, SyncStatus,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// songlib command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "songlib",
    version,
    about = "Manage and sync git-hosted song libraries"
)]
struct Cli {
    /// Path to the TOML settings file.
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Application data directory (overrides the settings file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Subscribe to a library repository.
    Add {
        /// Repository URL.
        repo_url: String,

        /// Branch to track.
        #[arg(short, long)]
        branch: Option<String>,

        /// Display name (defaults to the repository name).
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Remove a library and delete its mirror and published files.
    Remove {
        /// Source ID.
        id: String,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Enable a library for `sync --all`.
    Enable {
        /// Source ID.
        id: String,
    },

    /// Exclude a library from `sync --all`.
    Disable {
        /// Source ID.
        id: String,
    },

    /// List configured libraries.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show the sync state of one library.
    Status {
        /// Source ID.
        id: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Sync libraries from their remotes.
    Sync {
        /// Source IDs to sync.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        ids: Vec<String>,

        /// Sync every enabled library.
        #[arg(short, long)]
        all: bool,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = load_settings(&cli);

    let level = settings
        .as_ref()
        .map(|s| s.log_level.clone())
        .unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let result = match settings {
        Ok(settings) => run(cli, settings).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let paths = settings.app_paths().context("failed to resolve data directory")?;
    let git = Arc::new(GitCli::from_settings(&settings.git));
    let manager = open_manager(&paths);

    match cli.command {
        Commands::Add {
            repo_url,
            branch,
            name,
        } => cmd_add(&manager, &repo_url, branch.as_deref(), name.as_deref()),
        Commands::Remove { id, yes } => cmd_remove(&manager, &id, yes),
        Commands::Enable { id } => cmd_set_enabled(&manager, &id, true),
        Commands::Disable { id } => cmd_set_enabled(&manager, &id, false),
        Commands::List { json } => cmd_list(&manager, git.as_ref(), json).await,
        Commands::Status { id, json } => cmd_status(&manager, git.as_ref(), &id, json).await,
        Commands::Sync { ids, all } => sync::cmd_sync(&manager, git, ids, all).await,
    }
}

// ---------------------------------------------------------------------------
// Setup helpers
// ---------------------------------------------------------------------------

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.settings {
        Some(path) => Settings::load_from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => match Settings::default_path() {
            Some(path) => Settings::load_or_default(&path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => Settings::default(),
        },
    };
    if let Some(dir) = &cli.data_dir {
        settings.data_dir = Some(dir.clone());
    }
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

fn open_manager(paths: &AppPaths) -> LibraryManager {
    LibraryManager::new(
        Arc::new(JsonLibraryStore::for_paths(paths)),
        Arc::new(JsonStateStore::new(paths.clone())),
        paths.clone(),
    )
}

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| {
        t.with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    })
    .unwrap_or_else(|| "never".to_string())
}

fn short_commit(commit: Option<&str>) -> String {
    match commit {
        Some(c) => c.chars().take(10).collect(),
        None => "none".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_add(
    manager: &LibraryManager,
    repo_url: &str,
    branch: Option<&str>,
    name: Option<&str>,
) -> Result<()> {
    let source = manager
        .add_source(repo_url, branch, name)
        .context("failed to add library")?;

    println!(
        "{}",
        style::success(&format!("Added library '{}'", source.name))
    );
    println!("  ID    : {}", source.source_id);
    println!("  Repo  : {}", source.repo_url);
    println!("  Branch: {}", source.default_branch);
    println!();
    println!("Next: run 'songlib sync {}' to fetch it", source.source_id);
    Ok(())
}

fn cmd_remove(manager: &LibraryManager, id: &str, yes: bool) -> Result<()> {
    let status = manager.status(id).context("failed to look up library")?;

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete library '{}'? This removes its local mirror and published files.",
                status.source.name
            ))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    manager.remove_source(id).context("failed to remove library")?;
    println!(
        "{}",
        style::success(&format!("Removed library '{}'", status.source.name))
    );
    Ok(())
}

fn cmd_set_enabled(manager: &LibraryManager, id: &str, enabled: bool) -> Result<()> {
    let source = manager
        .set_enabled(id, enabled)
        .context("failed to update library")?;
    let verb = if enabled { "Enabled" } else { "Disabled" };
    println!(
        "{}",
        style::success(&format!("{} library '{}'", verb, source.name))
    );
    Ok(())
}

async fn cmd_list(manager: &LibraryManager, git: &GitCli, json: bool) -> Result<()> {
    let sources = manager.list().context("failed to list libraries")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    if sources.is_empty() {
        println!("No libraries configured. Add one with 'songlib add <repo-url>'.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "ID", "Name", "Branch", "Enabled", "Status", "Files", "Last Sync", "Updates",
    ]);

    for entry in &sources {
        let status_cell = match entry.state.status {
            SyncStatus::Idle => Cell::new("idle").fg(Color::Green),
            SyncStatus::Syncing => Cell::new("syncing").fg(Color::Yellow),
            SyncStatus::Error => Cell::new("error").fg(Color::Red),
        };
        let updates = manager.pending_updates(git, entry).await;
        let updates_cell = match updates {
            PendingUpdates::Available => Cell::new(updates.to_string()).fg(Color::Yellow),
            _ => Cell::new(updates.to_string()),
        };

        table.add_row(vec![
            Cell::new(&entry.source.source_id),
            Cell::new(&entry.source.name),
            Cell::new(&entry.source.default_branch),
            Cell::new(if entry.source.enabled { "yes" } else { "no" }),
            status_cell,
            Cell::new(entry.state.files_indexed),
            Cell::new(format_time(entry.state.last_sync_at)),
            updates_cell,
        ]);
    }

    println!();
    println!("{}", style::header("Libraries"));
    println!("{}", table);
    println!();
    Ok(())
}

async fn cmd_status(manager: &LibraryManager, git: &GitCli, id: &str, json: bool) -> Result<()> {
    let entry: SourceStatus = manager.status(id).context("failed to look up library")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    let paths = manager.paths();
    let source = &entry.source;
    let state = &entry.state;
    let updates = manager.pending_updates(git, &entry).await;

    println!("{}", style::header(&format!("{} ({})", source.name, source.source_id)));
    println!();
    println!("  Repository     : {}", source.repo_url);
    println!("  Branch         : {}", source.default_branch);
    println!(
        "  Enabled        : {}",
        if source.enabled { "yes" } else { "no" }
    );
    println!("  Status         : {}", style::status(state.status));
    println!("  Last sync      : {}", format_time(state.last_sync_at));
    println!("  Last success   : {}", format_time(state.last_success_at));
    println!(
        "  Published at   : {}",
        short_commit(state.last_commit.as_deref())
    );
    println!("  Files indexed  : {}", state.files_indexed);
    println!("  Upstream       : {}", updates);
    println!(
        "  Mirror dir     : {}",
        style::dim(&source.mirror_dir(paths).display().to_string())
    );
    println!(
        "  Published dir  : {}",
        style::dim(&source.published_dir(paths).display().to_string())
    );
    if let Some(err) = &state.last_error {
        println!();
        println!("{}", style::warn("Last error:"));
        for line in err.lines() {
            println!("    {}", line);
        }
    }
    Ok(())
}
