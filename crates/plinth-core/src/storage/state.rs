//! Persisted plugin state as a delta from compiled-in defaults.
//!
//! The map holds two disjoint kinds of keys:
//!
//! - real plugin keys and complete module keys (`plugin:module`) mapped to the
//!   enabled flag the operator chose, present only where it differs from the
//!   entity's default;
//! - synthetic restart markers, `"{plugin_key}\0restart-{install|upgrade|remove}"`,
//!   recording a change that waits for the next process restart.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kernel::constants::{MODULE_KEY_SEPARATOR, RESTART_MARKER_SEPARATOR};
use crate::plugin_system::module::ModuleDescriptor;
use crate::plugin_system::traits::Plugin;

/// Pending change that only takes effect after a restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestartState {
    None,
    Install,
    Upgrade,
    Remove,
}

impl RestartState {
    const MARKED: [RestartState; 3] = [RestartState::Install, RestartState::Upgrade, RestartState::Remove];

    fn suffix(self) -> Option<&'static str> {
        match self {
            RestartState::None => None,
            RestartState::Install => Some("restart-install"),
            RestartState::Upgrade => Some("restart-upgrade"),
            RestartState::Remove => Some("restart-remove"),
        }
    }

    /// The synthetic map key for this marker, `None` for [`RestartState::None`]
    pub fn marker_key(self, plugin_key: &str) -> Option<String> {
        self.suffix()
            .map(|suffix| format!("{}{}{}", plugin_key, RESTART_MARKER_SEPARATOR, suffix))
    }
}

impl fmt::Display for RestartState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RestartState::None => "NONE",
            RestartState::Install => "INSTALL",
            RestartState::Upgrade => "UPGRADE",
            RestartState::Remove => "REMOVE",
        };
        f.write_str(label)
    }
}

/// Whether `key` is a restart marker rather than a plugin or module key
pub fn is_restart_marker(key: &str) -> bool {
    key.contains(RESTART_MARKER_SEPARATOR)
}

/// Whether `key` is the plugin key itself or one of its complete module keys
pub fn belongs_to_plugin(key: &str, plugin_key: &str) -> bool {
    match key.strip_prefix(plugin_key) {
        Some("") => true,
        Some(rest) => rest.starts_with(MODULE_KEY_SEPARATOR),
        None => false,
    }
}

/// Immutable snapshot of the persisted delta map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginPersistentState {
    map: BTreeMap<String, bool>,
}

impl PluginPersistentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, bool>) -> Self {
        Self { map }
    }

    /// The raw delta map, markers included
    pub fn map(&self) -> &BTreeMap<String, bool> {
        &self.map
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Stored flag for the plugin, else its compiled-in default
    pub fn is_enabled(&self, plugin: &dyn Plugin) -> bool {
        self.map
            .get(plugin.key())
            .copied()
            .unwrap_or_else(|| plugin.is_enabled_by_default())
    }

    /// Stored flag for the module, else its compiled-in default
    pub fn is_module_enabled(&self, module: &dyn ModuleDescriptor) -> bool {
        self.map
            .get(&module.complete_key())
            .copied()
            .unwrap_or_else(|| module.is_enabled_by_default())
    }

    /// Entries for the plugin key and its complete module keys, markers excluded.
    ///
    /// Matches `plugin_key` exactly or `plugin_key:` as a prefix, so `foo` never
    /// picks up `fooExtra`.
    pub fn plugin_state_map(&self, plugin_key: &str) -> BTreeMap<String, bool> {
        self.map
            .iter()
            .filter(|(key, _)| belongs_to_plugin(key, plugin_key))
            .map(|(key, enabled)| (key.clone(), *enabled))
            .collect()
    }

    /// The pending restart change for a plugin
    pub fn restart_state(&self, plugin_key: &str) -> RestartState {
        RestartState::MARKED
            .into_iter()
            .find(|state| {
                state
                    .marker_key(plugin_key)
                    .is_some_and(|key| self.map.get(&key).copied().unwrap_or(false))
            })
            .unwrap_or(RestartState::None)
    }

    /// Plugin keys carrying a restart marker
    pub fn plugins_with_restart_state(&self) -> Vec<(String, RestartState)> {
        let mut found = Vec::new();
        for key in self.map.keys() {
            if let Some((plugin_key, _)) = key.split_once(RESTART_MARKER_SEPARATOR) {
                let state = self.restart_state(plugin_key);
                if state != RestartState::None {
                    found.push((plugin_key.to_string(), state));
                }
            }
        }
        found.dedup_by(|a, b| a.0 == b.0);
        found
    }

    /// Start a modified copy of this snapshot
    pub fn builder(&self) -> PluginPersistentStateBuilder {
        PluginPersistentStateBuilder {
            map: self.map.clone(),
        }
    }
}

/// Builds a new [`PluginPersistentState`] keeping the delta minimal
#[derive(Debug, Clone, Default)]
pub struct PluginPersistentStateBuilder {
    map: BTreeMap<String, bool>,
}

impl PluginPersistentStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `enabled` for `key`, dropping the entry when it equals `default`
    pub fn set_key_enabled(&mut self, key: &str, enabled: bool, default: bool) -> &mut Self {
        if enabled == default {
            self.map.remove(key);
        } else {
            self.map.insert(key.to_string(), enabled);
        }
        self
    }

    pub fn set_enabled(&mut self, plugin: &dyn Plugin, enabled: bool) -> &mut Self {
        self.set_key_enabled(plugin.key(), enabled, plugin.is_enabled_by_default())
    }

    pub fn set_module_enabled(&mut self, module: &dyn ModuleDescriptor, enabled: bool) -> &mut Self {
        let complete_key = module.complete_key();
        self.set_key_enabled(&complete_key, enabled, module.is_enabled_by_default())
    }

    /// Remove the entry for `key`, restoring default behaviour
    pub fn remove_state(&mut self, key: &str) -> &mut Self {
        self.map.remove(key);
        self
    }

    /// Replace any restart marker of the plugin with `state`
    pub fn set_restart_state(&mut self, plugin_key: &str, state: RestartState) -> &mut Self {
        for marked in RestartState::MARKED {
            if let Some(key) = marked.marker_key(plugin_key) {
                self.map.remove(&key);
            }
        }
        if let Some(key) = state.marker_key(plugin_key) {
            self.map.insert(key, true);
        }
        self
    }

    pub fn clear_restart_states(&mut self) -> &mut Self {
        self.map.retain(|key, _| !is_restart_marker(key));
        self
    }

    /// Drop every entry of the plugin: its own flag, module flags and markers
    pub fn remove_plugin_state(&mut self, plugin_key: &str) -> &mut Self {
        self.map.retain(|key, _| {
            if belongs_to_plugin(key, plugin_key) {
                return false;
            }
            match key.split_once(RESTART_MARKER_SEPARATOR) {
                Some((owner, _)) => owner != plugin_key,
                None => true,
            }
        });
        self
    }

    pub fn add_state(&mut self, state: BTreeMap<String, bool>) -> &mut Self {
        self.map.extend(state);
        self
    }

    pub fn build(&self) -> PluginPersistentState {
        PluginPersistentState {
            map: self.map.clone(),
        }
    }
}
