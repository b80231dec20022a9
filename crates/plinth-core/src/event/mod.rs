//! # Plinth Core Event System
//!
//! Lifecycle notifications emitted by the plugin manager. The manager only
//! depends on the [`PluginEventBus`] call contract; [`DefaultEventBus`] is the
//! in-process implementation with name-keyed and catch-all listeners.
pub mod dispatcher;
pub mod error;
pub mod types;

use async_trait::async_trait;

/// Type for listener identifiers
pub type ListenerId = u64;

/// Result of a single listener invocation
pub type ListenerResult = std::result::Result<(), error::EventSystemError>;

/// Broadcast side of the event bus, as seen by the plugin manager
#[async_trait]
pub trait PluginEventBus: Send + Sync + std::fmt::Debug {
    /// Deliver `event` to every interested listener.
    ///
    /// Listener failures are reported through the returned error after every
    /// listener has run; delivery never stops at the first failure.
    async fn broadcast(&self, event: &PluginLifecycleEvent) -> std::result::Result<(), error::EventSystemError>;
}

/// Re-export important types
pub use dispatcher::{DefaultEventBus, Listener};
pub use error::EventSystemError;
pub use types::PluginLifecycleEvent;
