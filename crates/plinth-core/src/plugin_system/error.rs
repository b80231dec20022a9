//! # Plinth Core Plugin System Errors
//!
//! [`PluginSystemError`] covers descriptor/artifact parse failures, refused
//! operations, illegal plugin state transitions and failed plugin hooks.
use crate::plugin_system::state::PluginState;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    /// Malformed descriptor, unknown module type, unrecognised artifact or an
    /// unresolvable duplicate key.
    #[error("Failed to parse plugin '{subject}': {message}")]
    Parse {
        subject: String,
        message: String,
    },

    #[error("Operation '{operation}' not permitted on plugin '{plugin_key}': {reason}")]
    OperationNotPermitted {
        operation: String,
        plugin_key: String,
        reason: String,
    },

    #[error("Illegal state transition for plugin '{plugin_key}': {from} -> {to}")]
    IllegalStateTransition {
        plugin_key: String,
        from: PluginState,
        to: PluginState,
    },

    #[error("Plugin '{plugin_key}' failed to enable: {message}")]
    EnableFailed {
        plugin_key: String,
        message: String,
    },

    #[error("Module '{complete_key}' failed to enable: {message}")]
    ModuleEnableFailed {
        complete_key: String,
        message: String,
    },

    #[error("Plugin installation error for '{plugin_key}': {message}")]
    InstallationError {
        plugin_key: String,
        message: String,
    },

    #[error("Loader '{loader}' failed: {message}")]
    LoaderError {
        loader: String,
        message: String,
    },
}

impl PluginSystemError {
    pub fn parse(subject: impl Into<String>, message: impl Into<String>) -> Self {
        PluginSystemError::Parse {
            subject: subject.into(),
            message: message.into(),
        }
    }

    pub fn not_permitted(
        operation: impl Into<String>,
        plugin_key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        PluginSystemError::OperationNotPermitted {
            operation: operation.into(),
            plugin_key: plugin_key.into(),
            reason: reason.into(),
        }
    }

    pub fn enable_failed(plugin_key: impl Into<String>, message: impl Into<String>) -> Self {
        PluginSystemError::EnableFailed {
            plugin_key: plugin_key.into(),
            message: message.into(),
        }
    }
}
