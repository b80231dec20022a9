use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::kernel::error::Result;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::module::ModuleDescriptor;
use crate::plugin_system::state::{PluginLifecycle, PluginState};

/// Opaque per-plugin code loading capability.
///
/// The manager never looks inside; it only invalidates the loader once the
/// plugin has been removed.
pub trait CodeLoader: Send + Sync + fmt::Debug {
    /// Resolve a named symbol or type exported by the plugin
    fn resolve(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>>;

    /// Release everything the loader holds
    fn invalidate(&self);
}

/// Core trait that all plugins must implement.
///
/// Implementors supply identity, modules and the `*_internal` hooks; the
/// provided `install`/`enable`/`disable`/`uninstall` methods drive the state
/// machine around those hooks and are not meant to be overridden.
pub trait Plugin: Send + Sync + fmt::Debug {
    /// Unique key of the plugin
    fn key(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    /// Dot-separated version string, compared with
    /// [`compare_versions`](crate::plugin_system::version::compare_versions)
    fn version(&self) -> &str;

    fn is_enabled_by_default(&self) -> bool {
        true
    }

    /// Keys of plugins this one requires
    fn required_plugins(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Module descriptors in registration order
    fn module_descriptors(&self) -> Vec<Arc<dyn ModuleDescriptor>>;

    fn module_descriptor(&self, key: &str) -> Option<Arc<dyn ModuleDescriptor>> {
        self.module_descriptors().into_iter().find(|m| m.key() == key)
    }

    fn is_uninstallable(&self) -> bool {
        true
    }

    fn is_deletable(&self) -> bool {
        true
    }

    fn is_system_plugin(&self) -> bool {
        false
    }

    fn is_dynamically_loaded(&self) -> bool {
        false
    }

    /// Set on placeholders standing in for a plugin that could not be loaded
    fn unloadable_reason(&self) -> Option<String> {
        None
    }

    fn code_loader(&self) -> Option<Arc<dyn CodeLoader>> {
        None
    }

    /// Whether any module needs a process restart to be added or removed
    fn requires_restart(&self) -> bool {
        self.module_descriptors().iter().any(|m| m.requires_restart())
    }

    /// State cell of this plugin
    fn lifecycle(&self) -> &PluginLifecycle;

    fn plugin_state(&self) -> PluginState {
        self.lifecycle().state()
    }

    /// Hook run when the plugin is added to the registry
    fn install_internal(&self) -> Result<()> {
        Ok(())
    }

    /// Hook run on enable, after the state moved to `Enabling`.
    ///
    /// Return `Enabled` to finish synchronously, or `Enabling` to finish later
    /// through a clone of [`Plugin::lifecycle`]. In the latter case the hook
    /// owns the final transition.
    fn enable_internal(&self) -> Result<PluginState> {
        Ok(PluginState::Enabled)
    }

    /// Hook run on disable, while the state is `Disabling`
    fn disable_internal(&self) -> Result<()> {
        Ok(())
    }

    /// Hook run right before the plugin is closed for good
    fn uninstall_internal(&self) -> Result<()> {
        Ok(())
    }

    fn install(&self) -> Result<()> {
        self.install_internal()
    }

    /// Start enabling the plugin.
    ///
    /// A no-op when already `Enabled` or `Enabling`. If the hook fails the
    /// plugin falls back to `Disabled` and the error is returned.
    fn enable(&self) -> Result<()> {
        match self.plugin_state() {
            PluginState::Enabled | PluginState::Enabling => return Ok(()),
            PluginState::Closed => {
                return Err(PluginSystemError::not_permitted(
                    "enable",
                    self.key(),
                    "plugin is closed",
                )
                .into());
            }
            _ => {}
        }

        self.lifecycle().transition(PluginState::Enabling)?;
        match self.enable_internal() {
            Ok(PluginState::Enabling) => Ok(()),
            Ok(next) => {
                self.lifecycle().transition(next)?;
                Ok(())
            }
            Err(e) => {
                log::error!("Unable to enable plugin '{}': {}", self.key(), e);
                if let Err(rollback) = self.lifecycle().transition(PluginState::Disabled) {
                    log::error!("Rollback of plugin '{}' failed: {}", self.key(), rollback);
                }
                Err(e)
            }
        }
    }

    /// Disable the plugin. Disabling a plugin that is not active is a no-op.
    fn disable(&self) -> Result<()> {
        match self.plugin_state() {
            PluginState::Enabled | PluginState::Enabling => {}
            _ => return Ok(()),
        }

        self.lifecycle().transition(PluginState::Disabling)?;
        let hook_result = self.disable_internal();
        self.lifecycle().transition(PluginState::Disabled)?;
        if let Err(e) = &hook_result {
            log::warn!("Plugin '{}' reported an error while disabling: {}", self.key(), e);
        }
        hook_result
    }

    /// Disable if needed, run the uninstall hook and close the plugin
    fn uninstall(&self) -> Result<()> {
        self.disable()?;
        self.uninstall_internal()?;
        if self.plugin_state() != PluginState::Closed {
            self.lifecycle().transition(PluginState::Closed)?;
        }
        Ok(())
    }
}
