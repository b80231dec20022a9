//! # Plinth Core Event System Errors
use thiserror::Error;

use crate::event::ListenerId;

#[derive(Debug, Error)]
pub enum EventSystemError {
    #[error("Listener failed while handling '{event_name}': {reason}")]
    ListenerFailed {
        event_name: String,
        reason: String,
    },

    #[error("{failed} listener(s) failed while handling '{event_name}', first: {first}")]
    BroadcastFailed {
        event_name: String,
        failed: usize,
        first: String,
    },

    #[error("Failed to unregister listener with ID {id}: {reason}")]
    ListenerUnregistrationFailed {
        id: ListenerId,
        reason: String,
    },
}

impl EventSystemError {
    /// Convenience constructor for listener implementations
    pub fn listener(event_name: impl Into<String>, reason: impl Into<String>) -> Self {
        EventSystemError::ListenerFailed {
            event_name: event_name.into(),
            reason: reason.into(),
        }
    }
}
