use crate::kernel::error::{Error, KernelLifecyclePhase};
use crate::kernel::state::{ManagerState, StateTracker};

#[test]
fn test_tracker_starts_not_started() {
    let tracker = StateTracker::new();
    assert_eq!(tracker.get(), ManagerState::NotStarted);
}

#[test]
fn test_full_lifecycle_and_reuse() {
    let tracker = StateTracker::new();
    for next in [
        ManagerState::Starting,
        ManagerState::Started,
        ManagerState::ShuttingDown,
        ManagerState::Shutdown,
        // Re-init of a shut down manager
        ManagerState::Starting,
        ManagerState::Started,
    ] {
        tracker.set_state(next).expect("legal transition rejected");
        assert_eq!(tracker.get(), next);
    }
}

#[test]
fn test_skipping_a_state_is_rejected() {
    let tracker = StateTracker::new();
    let err = tracker.set_state(ManagerState::Started).unwrap_err();
    match err {
        Error::KernelLifecycleError { phase, current, .. } => {
            assert_eq!(phase, KernelLifecyclePhase::Initialize);
            assert_eq!(current, Some(ManagerState::NotStarted));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Rejected transitions leave the state untouched
    assert_eq!(tracker.get(), ManagerState::NotStarted);
}

#[test]
fn test_double_start_and_double_shutdown_rejected() {
    let tracker = StateTracker::new();
    tracker.set_state(ManagerState::Starting).unwrap();
    assert!(tracker.set_state(ManagerState::Starting).is_err());
    tracker.set_state(ManagerState::Started).unwrap();
    tracker.set_state(ManagerState::ShuttingDown).unwrap();
    tracker.set_state(ManagerState::Shutdown).unwrap();
    let err = tracker.set_state(ManagerState::ShuttingDown).unwrap_err();
    assert!(err.is_illegal_state());
}

#[test]
fn test_require() {
    let tracker = StateTracker::new();
    assert!(tracker.require(ManagerState::Started, KernelLifecyclePhase::Operate).is_err());
    tracker.set_state(ManagerState::Starting).unwrap();
    tracker.set_state(ManagerState::Started).unwrap();
    assert!(tracker.require(ManagerState::Started, KernelLifecyclePhase::Operate).is_ok());
}

#[test]
fn test_ordinals_and_successors() {
    assert_eq!(ManagerState::NotStarted.ordinal(), 0);
    assert_eq!(ManagerState::Shutdown.ordinal(), 4);
    assert_eq!(ManagerState::Started.successor(), ManagerState::ShuttingDown);
    assert_eq!(ManagerState::Shutdown.successor(), ManagerState::Starting);
    assert!(!ManagerState::Shutdown.can_transition_to(ManagerState::NotStarted));
}

#[test]
fn test_abort_start_allows_another_start() {
    let tracker = StateTracker::new();
    assert!(tracker.abort_start().unwrap_err().is_illegal_state());

    tracker.set_state(ManagerState::Starting).unwrap();
    tracker.abort_start().unwrap();
    assert_eq!(tracker.get(), ManagerState::Shutdown);

    tracker.set_state(ManagerState::Starting).unwrap();
    tracker.set_state(ManagerState::Started).unwrap();
    assert!(tracker.abort_start().is_err());
    assert_eq!(tracker.get(), ManagerState::Started);
}
