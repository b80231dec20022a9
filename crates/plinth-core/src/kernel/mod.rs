//! # Plinth Core Kernel
//!
//! The `kernel` module holds the pieces every other subsystem leans on:
//!
//! - **Error Handling**: the top-level [`Error`](error::Error) enum and the
//!   `Result` alias in the `error` submodule. Subsystem errors fold into it.
//! - **Manager Lifecycle**: the [`StateTracker`](state::StateTracker) guarding the
//!   plugin manager's own `NOT_STARTED -> STARTING -> STARTED -> SHUTTING_DOWN -> SHUTDOWN`
//!   machine, found in the `state` submodule.
//! - **Core Constants**: system-wide constants via the `constants` submodule.
pub mod constants;
pub mod error;
pub mod state;

pub use error::{Error, KernelLifecyclePhase, Result};
pub use state::{ManagerState, StateTracker};

// Test module declaration
#[cfg(test)]
mod tests;
