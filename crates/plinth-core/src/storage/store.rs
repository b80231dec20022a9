use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;

use crate::kernel::error::Result;
use crate::storage::error::StorageSystemError;
use crate::storage::state::PluginPersistentState;

/// Load/save of the persisted delta map.
///
/// The manager always loads a fresh snapshot right before mutating it and
/// saves the full result; there is no optimistic concurrency check, so the
/// last writer wins.
pub trait PluginPersistentStateStore: Send + Sync + Debug {
    fn load(&self) -> Result<PluginPersistentState>;

    fn save(&self, state: &PluginPersistentState) -> Result<()>;
}

/// Keeps the snapshot in memory; the default store for embedded hosts and tests
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<PluginPersistentState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PluginPersistentState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl PluginPersistentStateStore for MemoryStateStore {
    fn load(&self) -> Result<PluginPersistentState> {
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, state: &PluginPersistentState) -> Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        Ok(())
    }
}

/// Stores the snapshot as a flat JSON object in a single file.
///
/// Writes go to a temporary file in the same directory which then atomically
/// replaces the target. A missing file loads as an empty snapshot.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> Result<PathBuf> {
        match self.path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => Ok(PathBuf::from(".")),
            Some(parent) => Ok(parent.to_path_buf()),
            None => Err(StorageSystemError::InvalidPath {
                path: self.path.clone(),
                reason: "state file has no parent directory".to_string(),
            }
            .into()),
        }
    }
}

impl PluginPersistentStateStore for JsonFileStateStore {
    fn load(&self) -> Result<PluginPersistentState> {
        if !self.path.exists() {
            log::debug!("No state file at {}, starting from defaults", self.path.display());
            return Ok(PluginPersistentState::new());
        }
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| StorageSystemError::io(e, "read_state", self.path.clone()))?;
        if contents.trim().is_empty() {
            return Ok(PluginPersistentState::new());
        }
        let map: BTreeMap<String, bool> =
            serde_json::from_str(&contents).map_err(|e| StorageSystemError::DeserializationError {
                format: "json".to_string(),
                source: Box::new(e),
            })?;
        Ok(PluginPersistentState::from_map(map))
    }

    fn save(&self, state: &PluginPersistentState) -> Result<()> {
        let parent = self.parent_dir()?;
        fs::create_dir_all(&parent).map_err(|e| StorageSystemError::io(e, "create_dir_all", parent.clone()))?;

        let contents =
            serde_json::to_string_pretty(state.map()).map_err(|e| StorageSystemError::SerializationError {
                format: "json".to_string(),
                source: Box::new(e),
            })?;

        let mut temp_file = NamedTempFile::new_in(&parent)
            .map_err(|e| StorageSystemError::io(e, "create_temp_file", parent.clone()))?;
        temp_file
            .write_all(contents.as_bytes())
            .map_err(|e| StorageSystemError::io(e, "write_to_temp_file", temp_file.path().to_path_buf()))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| StorageSystemError::io(e.error, "persist_temp_file", self.path.clone()))?;
        Ok(())
    }
}
