//! In-memory stores for tests and embedding.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{LibraryStore, StateStore};
use crate::config::LibrariesConfig;
use crate::errors::{ConfigError, StateError};
use crate::state::SyncState;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct MemoryLibraryStore {
    config: Mutex<LibrariesConfig>,
}

impl MemoryLibraryStore {
    pub fn new(config: LibrariesConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }
}

impl LibraryStore for MemoryLibraryStore {
    fn load(&self) -> Result<LibrariesConfig, ConfigError> {
        Ok(lock(&self.config).clone())
    }

    fn save(&self, config: &LibrariesConfig) -> Result<(), ConfigError> {
        *lock(&self.config) = config.clone();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, SyncState>>,
    /// Every saved state in order, for asserting on transitions.
    history: Mutex<Vec<(String, SyncState)>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All states saved so far, oldest first.
    pub fn history(&self) -> Vec<(String, SyncState)> {
        lock(&self.history).clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, source_id: &str) -> SyncState {
        lock(&self.states).get(source_id).cloned().unwrap_or_default()
    }

    fn save(&self, source_id: &str, state: &SyncState) -> Result<(), StateError> {
        lock(&self.states).insert(source_id.to_string(), state.clone());
        lock(&self.history).push((source_id.to_string(), state.clone()));
        Ok(())
    }

    fn remove(&self, source_id: &str) -> Result<(), StateError> {
        lock(&self.states).remove(source_id);
        Ok(())
    }
}
