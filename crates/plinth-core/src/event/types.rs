use std::fmt;

use serde::Serialize;

/// Lifecycle events broadcast by the plugin manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PluginLifecycleEvent {
    /// The framework is about to load plugins
    FrameworkStarting,
    /// Initial plugin load finished
    FrameworkStarted,
    /// The framework is shutting down
    FrameworkShutdown,
    /// A plugin finished enabling
    PluginEnabled { plugin_key: String },
    /// A plugin was disabled
    PluginDisabled { plugin_key: String },
    /// A module descriptor was enabled
    ModuleEnabled { complete_key: String },
    /// A module descriptor was disabled
    ModuleDisabled { complete_key: String },
    /// A plugin replaced an older instance with the same key
    PluginUpgraded { plugin_key: String },
    /// A plugin was installed into the registry
    PluginInstalled { plugin_key: String },
    /// A plugin was removed from the registry
    PluginUninstalled { plugin_key: String },
}

impl PluginLifecycleEvent {
    /// Stable name used for listener routing
    pub fn name(&self) -> &'static str {
        match self {
            PluginLifecycleEvent::FrameworkStarting => "framework.starting",
            PluginLifecycleEvent::FrameworkStarted => "framework.started",
            PluginLifecycleEvent::FrameworkShutdown => "framework.shutdown",
            PluginLifecycleEvent::PluginEnabled { .. } => "plugin.enabled",
            PluginLifecycleEvent::PluginDisabled { .. } => "plugin.disabled",
            PluginLifecycleEvent::ModuleEnabled { .. } => "module.enabled",
            PluginLifecycleEvent::ModuleDisabled { .. } => "module.disabled",
            PluginLifecycleEvent::PluginUpgraded { .. } => "plugin.upgraded",
            PluginLifecycleEvent::PluginInstalled { .. } => "plugin.installed",
            PluginLifecycleEvent::PluginUninstalled { .. } => "plugin.uninstalled",
        }
    }

    /// The plugin or complete module key this event is about, if any
    pub fn subject(&self) -> Option<&str> {
        match self {
            PluginLifecycleEvent::FrameworkStarting
            | PluginLifecycleEvent::FrameworkStarted
            | PluginLifecycleEvent::FrameworkShutdown => None,
            PluginLifecycleEvent::PluginEnabled { plugin_key }
            | PluginLifecycleEvent::PluginDisabled { plugin_key }
            | PluginLifecycleEvent::PluginUpgraded { plugin_key }
            | PluginLifecycleEvent::PluginInstalled { plugin_key }
            | PluginLifecycleEvent::PluginUninstalled { plugin_key } => Some(plugin_key),
            PluginLifecycleEvent::ModuleEnabled { complete_key }
            | PluginLifecycleEvent::ModuleDisabled { complete_key } => Some(complete_key),
        }
    }
}

impl fmt::Display for PluginLifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subject() {
            Some(subject) => write!(f, "{}({})", self.name(), subject),
            None => f.write_str(self.name()),
        }
    }
}
