use std::fmt;
use std::sync::Arc;

use crate::kernel::error::Result;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::module::ModuleDescriptor;
use crate::plugin_system::state::{PluginLifecycle, PluginState};
use crate::plugin_system::traits::Plugin;

/// Placeholder kept in the registry for a plugin that failed to load or enable.
///
/// It preserves the original key and removal flags so operators can still see,
/// retry or uninstall the plugin, and it exposes the failure text. It can never
/// be enabled.
pub struct UnloadablePlugin {
    key: String,
    name: String,
    version: String,
    uninstallable: bool,
    deletable: bool,
    dynamically_loaded: bool,
    reason: String,
    lifecycle: PluginLifecycle,
}

impl fmt::Debug for UnloadablePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnloadablePlugin")
            .field("key", &self.key)
            .field("reason", &self.reason)
            .finish()
    }
}

impl UnloadablePlugin {
    pub fn new(key: &str, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            name: key.to_string(),
            version: String::new(),
            uninstallable: true,
            deletable: true,
            dynamically_loaded: false,
            reason: reason.into(),
            lifecycle: PluginLifecycle::new(key),
        }
    }

    /// Stand-in for `original`, copying its identity and removal flags
    pub fn replacing(original: &dyn Plugin, reason: impl Into<String>) -> Self {
        Self {
            key: original.key().to_string(),
            name: original.name().to_string(),
            version: original.version().to_string(),
            uninstallable: original.is_uninstallable(),
            deletable: original.is_deletable(),
            dynamically_loaded: original.is_dynamically_loaded(),
            reason: reason.into(),
            lifecycle: PluginLifecycle::new(original.key()),
        }
    }

    pub fn into_arc(self) -> Arc<dyn Plugin> {
        Arc::new(self)
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Plugin for UnloadablePlugin {
    fn key(&self) -> &str {
        &self.key
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn module_descriptors(&self) -> Vec<Arc<dyn ModuleDescriptor>> {
        Vec::new()
    }

    fn is_uninstallable(&self) -> bool {
        self.uninstallable
    }

    fn is_deletable(&self) -> bool {
        self.deletable
    }

    fn is_dynamically_loaded(&self) -> bool {
        self.dynamically_loaded
    }

    fn unloadable_reason(&self) -> Option<String> {
        Some(self.reason.clone())
    }

    fn lifecycle(&self) -> &PluginLifecycle {
        &self.lifecycle
    }

    fn enable_internal(&self) -> Result<PluginState> {
        Err(PluginSystemError::enable_failed(&self.key, format!("plugin is unloadable: {}", self.reason)).into())
    }
}
