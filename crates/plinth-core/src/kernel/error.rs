//! # Plinth Core Kernel Errors
//!
//! Defines the top-level [`Error`] type. Each subsystem keeps its own error
//! enum ([`PluginSystemError`], [`EventSystemError`], [`StorageSystemError`])
//! and folds into [`Error`] through `#[from]`, so `?` works across layers.
use std::result::Result as StdResult;

use crate::event::error::EventSystemError;
use crate::kernel::state::ManagerState;
use crate::plugin_system::error::PluginSystemError;
use crate::storage::error::StorageSystemError;
use thiserror::Error as ThisError;

/// Top-level error for every fallible operation in the crate
#[derive(Debug, ThisError)]
pub enum Error {
    /// Specific, typed plugin system error
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Specific, typed storage system error
    #[error("Storage system error: {0}")]
    StorageSystem(#[from] StorageSystemError),

    /// Event system error
    #[error("Event system error: {0}")]
    EventSystem(#[from] EventSystemError),

    /// The plugin manager was used in a state that does not allow the call
    /// (double init, double shutdown, operating before init).
    #[error("Kernel lifecycle error during {phase:?}: {message}")]
    KernelLifecycleError {
        phase: KernelLifecyclePhase,
        current: Option<ManagerState>,
        message: String,
    },

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Represents a specific phase in the manager's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum KernelLifecyclePhase {
    #[error("Initialize")]
    Initialize,
    #[error("Operate")]
    Operate,
    #[error("Shutdown")]
    Shutdown,
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl Error {
    /// Shorthand for the manager-misuse error
    pub fn illegal_state(
        phase: KernelLifecyclePhase,
        current: Option<ManagerState>,
        message: impl Into<String>,
    ) -> Self {
        Error::KernelLifecycleError {
            phase,
            current,
            message: message.into(),
        }
    }

    /// Whether this error is a plugin parse failure
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Error::PluginSystem(PluginSystemError::Parse { .. }))
    }

    /// Whether this error is an operation-not-permitted refusal
    pub fn is_not_permitted(&self) -> bool {
        matches!(
            self,
            Error::PluginSystem(PluginSystemError::OperationNotPermitted { .. })
        )
    }

    /// Whether this error reports manager lifecycle misuse
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Error::KernelLifecycleError { .. })
    }
}
