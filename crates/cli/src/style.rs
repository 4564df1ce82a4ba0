//! Shared styling utilities for terminal output.

use console::Style;

use songlib_core::SyncStatus;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Colored status word: idle green, syncing yellow, error red.
pub fn status(status: SyncStatus) -> String {
    let style = match status {
        SyncStatus::Idle => Style::new().green(),
        SyncStatus::Syncing => Style::new().yellow(),
        SyncStatus::Error => Style::new().red(),
    };
    style.apply_to(status.to_string()).to_string()
}
