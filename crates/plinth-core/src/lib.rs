pub mod event;
pub mod kernel;
pub mod plugin_system;
pub mod storage;

// Re-export key public types/traits for easier use by the binary and by host applications
pub use kernel::error::{Error, Result};
pub use kernel::state::{ManagerState, StateTracker};
pub use plugin_system::{
    DefaultPluginManager, ModuleDescriptor, Plugin, PluginEnabler, PluginLoader, PluginManager,
    PluginRegistry, PluginState,
};
pub use event::{DefaultEventBus, PluginEventBus, PluginLifecycleEvent};
pub use storage::{ManagerConfig, PluginPersistentState, PluginPersistentStateStore, RestartState};
