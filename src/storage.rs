//! Persistence for the gametype registry and subscriptions
//!
//! Queue entries are ephemeral and never written out. The registry and the
//! subscription sets survive restarts through a `StateStore`.

use crate::error::{PickupError, Result};
use crate::subscription::Subscription;
use crate::types::Gametype;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

/// Everything the engine persists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub gametypes: Vec<Gametype>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// Trait for loading and saving engine state
pub trait StateStore: Send + Sync {
    /// Load the last saved state (empty if nothing was saved yet)
    fn load(&self) -> Result<PersistedState>;

    /// Replace the saved state
    fn save(&self, state: &PersistedState) -> Result<()>;
}

/// Store that keeps state in memory only
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    state: RwLock<PersistedState>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }
}

impl StateStore for InMemoryStateStore {
    fn load(&self) -> Result<PersistedState> {
        let state = self
            .state
            .read()
            .map_err(|_| PickupError::lock_poisoned("state store"))?;
        Ok(state.clone())
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        let mut stored = self
            .state
            .write()
            .map_err(|_| PickupError::lock_poisoned("state store"))?;
        *stored = state.clone();
        Ok(())
    }
}

/// Store backed by a single TOML file
#[derive(Debug, Clone)]
pub struct TomlStateStore {
    path: PathBuf,
}

impl TomlStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for TomlStateStore {
    fn load(&self) -> Result<PersistedState> {
        if !self.path.exists() {
            info!(
                "State file {} does not exist yet, starting empty",
                self.path.display()
            );
            return Ok(PersistedState::default());
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file {}", self.path.display()))?;
        let state: PersistedState = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse state file {}", self.path.display()))?;

        debug!(
            "Loaded {} gametypes and {} subscriptions from {}",
            state.gametypes.len(),
            state.subscriptions.len(),
            self.path.display()
        );
        Ok(state)
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        let raw = toml::to_string_pretty(state).context("Failed to serialize state")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create state directory {}", parent.display())
                })?;
            }
        }

        // Write then rename so a crash never leaves a truncated file
        let temp = self.temp_path();
        fs::write(&temp, raw)
            .with_context(|| format!("Failed to write state file {}", temp.display()))?;
        fs::rename(&temp, &self.path)
            .with_context(|| format!("Failed to replace state file {}", self.path.display()))?;

        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlayerIdentity;

    fn sample_state() -> PersistedState {
        PersistedState {
            gametypes: vec![
                Gametype::new("duel", 2, 2, Some("duel".to_string())).unwrap(),
                Gametype::new("ffa", 6, 1, None).unwrap(),
            ],
            subscriptions: vec![Subscription {
                gametype: "duel".to_string(),
                player: PlayerIdentity::discord("alice"),
            }],
        }
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.load().unwrap(), PersistedState::default());

        store.save(&sample_state()).unwrap();
        assert_eq!(store.load().unwrap(), sample_state());
    }

    #[test]
    fn test_toml_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlStateStore::new(dir.path().join("state.toml"));
        assert_eq!(store.load().unwrap(), PersistedState::default());
    }

    #[test]
    fn test_toml_store_persists_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.toml");
        let store = TomlStateStore::new(&path);

        store.save(&sample_state()).unwrap();
        assert!(path.exists());

        let reopened = TomlStateStore::new(&path);
        assert_eq!(reopened.load().unwrap(), sample_state());
    }

    #[test]
    fn test_toml_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        fs::write(&path, "gametypes = 12").unwrap();

        assert!(TomlStateStore::new(&path).load().is_err());
    }
}
