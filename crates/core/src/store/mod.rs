//! Persistence seams for the libraries configuration and per-source sync state.
//!
//! [`SyncService`](crate::sync_service::SyncService) and
//! [`LibraryManager`](crate::manager::LibraryManager) only talk to these
//! traits. The JSON implementations back the application; the in-memory ones
//! let tests run without touching the app-data directory.

pub mod json;
pub mod memory;

use crate::config::LibrariesConfig;
use crate::errors::{ConfigError, StateError};
use crate::state::SyncState;

pub use json::{JsonLibraryStore, JsonStateStore};
pub use memory::{MemoryLibraryStore, MemoryStateStore};

/// Load/save of the full set of library sources.
pub trait LibraryStore: Send + Sync {
    fn load(&self) -> Result<LibrariesConfig, ConfigError>;
    fn save(&self, config: &LibrariesConfig) -> Result<(), ConfigError>;
}

/// Load/save of [`SyncState`] keyed by source id.
pub trait StateStore: Send + Sync {
    /// Prior state, or defaults when none exists or it cannot be read.
    fn load(&self, source_id: &str) -> SyncState;
    fn save(&self, source_id: &str, state: &SyncState) -> Result<(), StateError>;
    fn remove(&self, source_id: &str) -> Result<(), StateError>;
}
