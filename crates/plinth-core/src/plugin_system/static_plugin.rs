use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::kernel::error::Result;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::module::{ModuleDescriptor, SimpleModuleDescriptor};
use crate::plugin_system::state::{PluginLifecycle, PluginState};
use crate::plugin_system::traits::{CodeLoader, Plugin};

/// How a [`StaticPlugin`] behaves when enabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnableBehavior {
    /// Enabled as soon as the hook runs
    Immediate,
    /// Stays `Enabling` and reaches `Enabled` after the delay, on its own task
    Deferred(Duration),
    /// Stays `Enabling` forever
    Never,
    /// The hook fails with the message
    Fail(String),
}

/// A plugin defined entirely in code.
///
/// Built with a fluent builder; used by embedding hosts that register plugins
/// without any artifact, and as the workhorse of the manager's tests.
pub struct StaticPlugin {
    key: String,
    name: String,
    version: String,
    enabled_by_default: bool,
    required_plugins: BTreeSet<String>,
    modules: Vec<Arc<dyn ModuleDescriptor>>,
    uninstallable: bool,
    deletable: bool,
    system_plugin: bool,
    dynamically_loaded: bool,
    enable_behavior: EnableBehavior,
    code_loader: Option<Arc<dyn CodeLoader>>,
    lifecycle: PluginLifecycle,
}

impl fmt::Debug for StaticPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPlugin")
            .field("key", &self.key)
            .field("version", &self.version)
            .field("state", &self.lifecycle.state())
            .field("requires", &self.required_plugins)
            .field("modules", &self.modules.len())
            .finish()
    }
}

impl StaticPlugin {
    pub fn new(key: &str, version: &str) -> Self {
        Self {
            key: key.to_string(),
            name: key.to_string(),
            version: version.to_string(),
            enabled_by_default: true,
            required_plugins: BTreeSet::new(),
            modules: Vec::new(),
            uninstallable: true,
            deletable: true,
            system_plugin: false,
            dynamically_loaded: false,
            enable_behavior: EnableBehavior::Immediate,
            code_loader: None,
            lifecycle: PluginLifecycle::new(key),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    pub fn requires(mut self, plugin_key: &str) -> Self {
        self.required_plugins.insert(plugin_key.to_string());
        self
    }

    pub fn with_module(mut self, module: Arc<dyn ModuleDescriptor>) -> Self {
        self.modules.push(module);
        self
    }

    /// Add a [`SimpleModuleDescriptor`] with default settings
    pub fn with_simple_module(self, module_key: &str) -> Self {
        let module = SimpleModuleDescriptor::new(&self.key, module_key);
        self.with_module(Arc::new(module))
    }

    pub fn with_uninstallable(mut self, uninstallable: bool) -> Self {
        self.uninstallable = uninstallable;
        self
    }

    pub fn with_deletable(mut self, deletable: bool) -> Self {
        self.deletable = deletable;
        self
    }

    pub fn as_system_plugin(mut self) -> Self {
        self.system_plugin = true;
        self
    }

    pub fn dynamically_loaded(mut self) -> Self {
        self.dynamically_loaded = true;
        self
    }

    pub fn with_enable_behavior(mut self, behavior: EnableBehavior) -> Self {
        self.enable_behavior = behavior;
        self
    }

    pub fn with_code_loader(mut self, loader: Arc<dyn CodeLoader>) -> Self {
        self.code_loader = Some(loader);
        self
    }

    fn complete_enable_later(&self, delay: Duration) {
        let lifecycle = self.lifecycle.clone();
        let key = self.key.clone();
        let finish = move || {
            // The manager may have given up on us in the meantime
            if lifecycle.state() == PluginState::Enabling {
                if let Err(e) = lifecycle.transition(PluginState::Enabled) {
                    log::debug!("Deferred enable of '{}' abandoned: {}", key, e);
                }
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    finish();
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    finish();
                });
            }
        }
    }
}

impl Plugin for StaticPlugin {
    fn key(&self) -> &str {
        &self.key
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn is_enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }

    fn required_plugins(&self) -> BTreeSet<String> {
        self.required_plugins.clone()
    }

    fn module_descriptors(&self) -> Vec<Arc<dyn ModuleDescriptor>> {
        self.modules.clone()
    }

    fn is_uninstallable(&self) -> bool {
        self.uninstallable
    }

    fn is_deletable(&self) -> bool {
        self.deletable
    }

    fn is_system_plugin(&self) -> bool {
        self.system_plugin
    }

    fn is_dynamically_loaded(&self) -> bool {
        self.dynamically_loaded
    }

    fn code_loader(&self) -> Option<Arc<dyn CodeLoader>> {
        self.code_loader.clone()
    }

    fn lifecycle(&self) -> &PluginLifecycle {
        &self.lifecycle
    }

    fn enable_internal(&self) -> Result<PluginState> {
        match &self.enable_behavior {
            EnableBehavior::Immediate => Ok(PluginState::Enabled),
            EnableBehavior::Deferred(delay) => {
                self.complete_enable_later(*delay);
                Ok(PluginState::Enabling)
            }
            EnableBehavior::Never => Ok(PluginState::Enabling),
            EnableBehavior::Fail(message) => {
                Err(PluginSystemError::enable_failed(&self.key, message.clone()).into())
            }
        }
    }

    fn uninstall_internal(&self) -> Result<()> {
        if let Some(loader) = &self.code_loader {
            loader.invalidate();
        }
        Ok(())
    }
}
