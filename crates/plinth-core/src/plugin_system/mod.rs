//! # Plinth Core Plugin System
//!
//! Everything needed to load plugins into a running host and move them through
//! their lifecycle without restarting the process.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`traits`]** and **[`module`]**: the [`Plugin`] and [`ModuleDescriptor`]
//!   contracts. Plugins implement a handful of `*_internal` hooks; the provided
//!   `enable`/`disable`/`uninstall` methods drive the state machine.
//! - **[`state`]**: the per-plugin state machine ([`PluginState`]) and its
//!   shared state cell.
//! - **[`registry`]**: the [`PluginRegistry`], the set of loaded plugins.
//! - **[`loader`]**: the [`PluginLoader`] and [`PluginInstaller`] collaborator
//!   contracts, plus an in-memory loader.
//! - **[`enabler`]**: the [`PluginEnabler`], enabling batches of plugins with
//!   dependency expansion and a bounded wait for slow starters.
//! - **[`manager`]**: the [`DefaultPluginManager`] orchestrating install,
//!   upgrade, uninstall, enable/disable and restart-required changes.
//! - **[`version`]**: the tolerant version comparator used to resolve
//!   duplicate plugin keys.
//! - **[`static_plugin`]** and **[`unloadable`]**: a plugin defined in code and
//!   the placeholder standing in for one that failed.
pub mod enabler;
pub mod error;
pub mod loader;
pub mod manager;
pub mod module;
pub mod registry;
pub mod state;
pub mod static_plugin;
pub mod traits;
pub mod unloadable;
pub mod version;

pub use enabler::{EnableReport, PluginEnabler};
pub use error::PluginSystemError;
pub use loader::{PluginArtifact, PluginInstaller, PluginLoader, StaticPluginLoader};
pub use manager::{DefaultPluginManager, PluginManager};
pub use module::{
    DefaultModuleDescriptorFactory, ModuleCapabilities, ModuleDescriptor, ModuleDescriptorFactory,
    ModuleSpec, SimpleModuleDescriptor,
};
pub use registry::PluginRegistry;
pub use state::{PluginLifecycle, PluginState};
pub use static_plugin::{EnableBehavior, StaticPlugin};
pub use traits::{CodeLoader, Plugin};
pub use unloadable::UnloadablePlugin;
pub use version::{PluginVersion, compare_versions};

// Test module declaration
#[cfg(test)]
mod tests;
