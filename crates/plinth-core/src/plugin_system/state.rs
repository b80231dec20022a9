use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::plugin_system::error::PluginSystemError;

/// Lifecycle state of a single plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    Installed,
    Enabling,
    Enabled,
    Disabling,
    Disabled,
    Closed,
}

impl PluginState {
    const ORDER: [PluginState; 6] = [
        PluginState::Installed,
        PluginState::Enabling,
        PluginState::Enabled,
        PluginState::Disabling,
        PluginState::Disabled,
        PluginState::Closed,
    ];

    pub fn ordinal(self) -> usize {
        Self::ORDER.iter().position(|s| *s == self).unwrap_or(0)
    }

    /// Whether `next` is legal from this state.
    ///
    /// The backbone is the ordinal sequence (each state may move to the one
    /// listed after it). On top of it the lifecycle allows:
    /// - `Enabling -> Closed`, closing a plugin that was still starting;
    /// - `Enabling -> Disabling | Disabled`, rolling back a failed or timed-out enable;
    /// - `Disabled -> Enabling`, re-enabling;
    /// - `Installed -> Closed`, uninstalling a plugin that never enabled.
    ///
    /// `Closed` is terminal.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        if next.ordinal() == self.ordinal() + 1 {
            return true;
        }
        matches!(
            (self, next),
            (PluginState::Enabling, PluginState::Closed)
                | (PluginState::Enabling, PluginState::Disabling)
                | (PluginState::Enabling, PluginState::Disabled)
                | (PluginState::Disabled, PluginState::Enabling)
                | (PluginState::Installed, PluginState::Closed)
        )
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PluginState::Installed => "INSTALLED",
            PluginState::Enabling => "ENABLING",
            PluginState::Enabled => "ENABLED",
            PluginState::Disabling => "DISABLING",
            PluginState::Disabled => "DISABLED",
            PluginState::Closed => "CLOSED",
        };
        f.write_str(label)
    }
}

/// Shared, thread-safe state cell of one plugin.
///
/// Cloning yields another handle to the same cell, so a plugin whose enable
/// hook completes later (on another task) can finish the transition itself.
#[derive(Debug, Clone)]
pub struct PluginLifecycle {
    plugin_key: Arc<str>,
    state: Arc<Mutex<PluginState>>,
}

impl PluginLifecycle {
    pub fn new(plugin_key: &str) -> Self {
        Self {
            plugin_key: Arc::from(plugin_key),
            state: Arc::new(Mutex::new(PluginState::Installed)),
        }
    }

    pub fn state(&self) -> PluginState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next`. Returns the previous state.
    pub fn transition(&self, next: PluginState) -> Result<PluginState, PluginSystemError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *guard;
        if !current.can_transition_to(next) {
            log::error!(
                "Illegal state transition for plugin '{}': {} -> {}",
                self.plugin_key,
                current,
                next
            );
            return Err(PluginSystemError::IllegalStateTransition {
                plugin_key: self.plugin_key.to_string(),
                from: current,
                to: next,
            });
        }
        *guard = next;
        Ok(current)
    }
}
