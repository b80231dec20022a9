use crate::kernel::error::Error;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::state::{PluginLifecycle, PluginState};
use crate::plugin_system::static_plugin::{EnableBehavior, StaticPlugin};
use crate::plugin_system::traits::Plugin;

#[test]
fn test_ordinal_successors_are_legal() {
    use PluginState::*;
    assert!(Installed.can_transition_to(Enabling));
    assert!(Enabling.can_transition_to(Enabled));
    assert!(Enabled.can_transition_to(Disabling));
    assert!(Disabling.can_transition_to(Disabled));
    assert!(Disabled.can_transition_to(Closed));
}

#[test]
fn test_extra_lifecycle_paths() {
    use PluginState::*;
    assert!(Enabling.can_transition_to(Closed));
    assert!(Enabling.can_transition_to(Disabled));
    assert!(Disabled.can_transition_to(Enabling));
    assert!(Installed.can_transition_to(Closed));
}

#[test]
fn test_illegal_transitions() {
    use PluginState::*;
    assert!(!Installed.can_transition_to(Enabled));
    assert!(!Enabled.can_transition_to(Installed));
    assert!(!Enabled.can_transition_to(Closed));
    for next in [Installed, Enabling, Enabled, Disabling, Disabled, Closed] {
        assert!(!Closed.can_transition_to(next), "closed must be terminal ({next})");
    }
}

#[test]
fn test_lifecycle_rejects_and_keeps_state() {
    let lifecycle = PluginLifecycle::new("p");
    let err = lifecycle.transition(PluginState::Enabled).unwrap_err();
    assert!(matches!(
        err,
        PluginSystemError::IllegalStateTransition { from: PluginState::Installed, to: PluginState::Enabled, .. }
    ));
    assert_eq!(lifecycle.state(), PluginState::Installed);

    assert_eq!(lifecycle.transition(PluginState::Enabling).unwrap(), PluginState::Installed);
    // Clones share the cell
    let other = lifecycle.clone();
    other.transition(PluginState::Enabled).unwrap();
    assert_eq!(lifecycle.state(), PluginState::Enabled);
}

#[test]
fn test_plugin_enable_disable_is_idempotent() {
    let plugin = StaticPlugin::new("p", "1.0");
    plugin.enable().unwrap();
    plugin.enable().unwrap();
    assert_eq!(plugin.plugin_state(), PluginState::Enabled);

    plugin.disable().unwrap();
    plugin.disable().unwrap();
    assert_eq!(plugin.plugin_state(), PluginState::Disabled);

    plugin.enable().unwrap();
    assert_eq!(plugin.plugin_state(), PluginState::Enabled);
}

#[test]
fn test_failed_enable_falls_back_to_disabled() {
    let plugin = StaticPlugin::new("p", "1.0").with_enable_behavior(EnableBehavior::Fail("no db".into()));
    let err = plugin.enable().unwrap_err();
    assert!(matches!(
        err,
        Error::PluginSystem(PluginSystemError::EnableFailed { ref message, .. }) if message == "no db"
    ));
    assert_eq!(plugin.plugin_state(), PluginState::Disabled);
}

#[test]
fn test_never_finishing_plugin_stays_enabling() {
    let plugin = StaticPlugin::new("p", "1.0").with_enable_behavior(EnableBehavior::Never);
    plugin.enable().unwrap();
    assert_eq!(plugin.plugin_state(), PluginState::Enabling);

    // Uninstall disables a plugin that is still starting
    plugin.uninstall().unwrap();
    assert_eq!(plugin.plugin_state(), PluginState::Closed);
}

#[test]
fn test_closed_plugin_refuses_enable() {
    let plugin = StaticPlugin::new("p", "1.0");
    plugin.uninstall().unwrap();
    assert_eq!(plugin.plugin_state(), PluginState::Closed);
    assert!(plugin.enable().unwrap_err().is_not_permitted());
}
