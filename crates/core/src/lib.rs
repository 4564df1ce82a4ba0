//! songlib core library.
//!
//! Keeps local, published copies of song libraries hosted in remote git
//! repositories: configuration of library sources, a disposable git mirror
//! per source, normalization of song files, atomic full and incremental
//! publishing, and the sync service that ties them together.

pub mod config;
pub mod errors;
pub mod manager;
pub mod mirror;
pub mod normalize;
pub mod paths;
pub mod publish;
pub mod settings;
pub mod state;
pub mod store;
pub mod sync_service;

// Re-exports for convenience.
pub use config::{LibrariesConfig, LibrarySource};
pub use errors::CoreError;
pub use manager::{LibraryManager, PendingUpdates, SourceStatus};
pub use mirror::{GitCli, MirrorClient};
pub use normalize::{ChordProNormalizer, Normalizer};
pub use paths::AppPaths;
pub use publish::Publisher;
pub use settings::Settings;
pub use state::{SyncState, SyncStatus};
pub use sync_service::{SyncProgress, SyncResult, SyncService};
