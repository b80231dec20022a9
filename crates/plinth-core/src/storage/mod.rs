pub mod config;
pub mod error;
pub mod state;
pub mod store;

/// Re-export key types
pub use config::{ConfigFormat, ManagerConfig};
pub use error::StorageSystemError;
pub use state::{PluginPersistentState, PluginPersistentStateBuilder, RestartState};
pub use store::{JsonFileStateStore, MemoryStateStore, PluginPersistentStateStore};
