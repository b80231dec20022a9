use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::kernel::error::{Error, KernelLifecyclePhase, Result};

/// Lifecycle of the plugin manager itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagerState {
    NotStarted,
    Starting,
    Started,
    ShuttingDown,
    Shutdown,
}

impl ManagerState {
    const ORDER: [ManagerState; 5] = [
        ManagerState::NotStarted,
        ManagerState::Starting,
        ManagerState::Started,
        ManagerState::ShuttingDown,
        ManagerState::Shutdown,
    ];

    /// Position of this state in the lifecycle sequence
    pub fn ordinal(self) -> usize {
        Self::ORDER.iter().position(|s| *s == self).unwrap_or(0)
    }

    /// The only state this one may legally move to.
    ///
    /// `Shutdown` loops back to `Starting` so a manager can be re-initialised.
    pub fn successor(self) -> ManagerState {
        match self {
            ManagerState::Shutdown => ManagerState::Starting,
            other => Self::ORDER[other.ordinal() + 1],
        }
    }

    pub fn can_transition_to(self, next: ManagerState) -> bool {
        self.successor() == next
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ManagerState::NotStarted => "NOT_STARTED",
            ManagerState::Starting => "STARTING",
            ManagerState::Started => "STARTED",
            ManagerState::ShuttingDown => "SHUTTING_DOWN",
            ManagerState::Shutdown => "SHUTDOWN",
        };
        f.write_str(label)
    }
}

/// Guards the manager's lifecycle, rejecting every transition other than the
/// single legal successor of the current state.
#[derive(Debug)]
pub struct StateTracker {
    state: Mutex<ManagerState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManagerState::NotStarted),
        }
    }

    /// Current state
    pub fn get(&self) -> ManagerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next`, failing without any change if the move is illegal.
    /// Returns the previous state.
    pub fn set_state(&self, next: ManagerState) -> Result<ManagerState> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *guard;
        if !current.can_transition_to(next) {
            return Err(Error::illegal_state(
                phase_for(next),
                Some(current),
                format!("Illegal manager state transition from {} to {}", current, next),
            ));
        }
        log::debug!("Plugin manager state {} -> {}", current, next);
        *guard = next;
        Ok(current)
    }

    /// Failed start: `Starting` passes through `ShuttingDown` to `Shutdown`,
    /// from where the manager may be initialised again.
    pub fn abort_start(&self) -> Result<()> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *guard;
        if current != ManagerState::Starting {
            return Err(Error::illegal_state(
                KernelLifecyclePhase::Initialize,
                Some(current),
                format!("Cannot abort a start from {}", current),
            ));
        }
        log::debug!(
            "Plugin manager state {} -> {} -> {} (start failed)",
            current,
            ManagerState::ShuttingDown,
            ManagerState::Shutdown
        );
        *guard = ManagerState::Shutdown;
        Ok(())
    }

    /// Fail unless the manager is in `expected`
    pub fn require(&self, expected: ManagerState, phase: KernelLifecyclePhase) -> Result<()> {
        let current = self.get();
        if current != expected {
            return Err(Error::illegal_state(
                phase,
                Some(current),
                format!("Plugin manager is {} but must be {}", current, expected),
            ));
        }
        Ok(())
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn phase_for(next: ManagerState) -> KernelLifecyclePhase {
    match next {
        ManagerState::Starting | ManagerState::Started => KernelLifecyclePhase::Initialize,
        ManagerState::ShuttingDown | ManagerState::Shutdown => KernelLifecyclePhase::Shutdown,
        ManagerState::NotStarted => KernelLifecyclePhase::Operate,
    }
}
