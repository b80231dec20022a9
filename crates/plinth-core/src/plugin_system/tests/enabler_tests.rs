use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::plugin_system::enabler::PluginEnabler;
use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::state::PluginState;
use crate::plugin_system::static_plugin::{EnableBehavior, StaticPlugin};
use crate::plugin_system::traits::Plugin;
use crate::storage::config::ManagerConfig;

fn config(timeout_secs: u64) -> ManagerConfig {
    ManagerConfig::default().with_enable_timeout(Duration::from_secs(timeout_secs))
}

async fn registry_with(plugins: &[Arc<dyn Plugin>]) -> Arc<PluginRegistry> {
    let registry = Arc::new(PluginRegistry::new());
    for plugin in plugins {
        registry.put(plugin.clone()).await;
    }
    registry
}

fn deferred(key: &str, millis: u64) -> StaticPlugin {
    StaticPlugin::new(key, "1.0").with_enable_behavior(EnableBehavior::Deferred(Duration::from_millis(millis)))
}

#[tokio::test(start_paused = true)]
async fn test_immediate_plugins_need_no_wait() {
    let a: Arc<dyn Plugin> = Arc::new(StaticPlugin::new("a", "1.0"));
    let b: Arc<dyn Plugin> = Arc::new(StaticPlugin::new("b", "1.0"));
    let enabler = PluginEnabler::new(registry_with(&[a.clone(), b.clone()]).await, config(60));

    let started = Instant::now();
    let report = enabler.enable(&[a, b]).await;
    assert!(report.is_success());
    assert_eq!(report.enabled, vec!["a", "b"]);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_deferred_plugins() {
    let slow: Arc<dyn Plugin> = Arc::new(deferred("slow", 1_500));
    let enabler = PluginEnabler::new(registry_with(&[slow.clone()]).await, config(60));

    let started = Instant::now();
    let report = enabler.enable(&[slow.clone()]).await;
    assert_eq!(report.enabled, vec!["slow"]);
    assert_eq!(slow.plugin_state(), PluginState::Enabled);
    // Polls in 200ms steps, so it notices within one step
    assert!(started.elapsed() >= Duration::from_millis(1_500));
    assert!(started.elapsed() <= Duration::from_millis(1_700));
}

#[tokio::test(start_paused = true)]
async fn test_stragglers_are_disabled_at_the_deadline() {
    let stuck: Arc<dyn Plugin> =
        Arc::new(StaticPlugin::new("stuck", "1.0").with_enable_behavior(EnableBehavior::Never));
    let fine: Arc<dyn Plugin> = Arc::new(StaticPlugin::new("fine", "1.0"));
    let enabler = PluginEnabler::new(registry_with(&[stuck.clone(), fine.clone()]).await, config(5));

    let started = Instant::now();
    let report = enabler.enable(&[stuck.clone(), fine.clone()]).await;

    assert_eq!(report.timed_out, vec!["stuck"]);
    assert_eq!(report.enabled, vec!["fine"]);
    assert!(!report.is_success());
    assert_eq!(stuck.plugin_state(), PluginState::Disabled);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_millis(5_100));
}

#[tokio::test(start_paused = true)]
async fn test_failing_plugin_does_not_block_the_batch() {
    let broken: Arc<dyn Plugin> = Arc::new(
        StaticPlugin::new("broken", "1.0").with_enable_behavior(EnableBehavior::Fail("missing config".into())),
    );
    let fine: Arc<dyn Plugin> = Arc::new(StaticPlugin::new("fine", "1.0"));
    let enabler = PluginEnabler::new(registry_with(&[broken.clone(), fine.clone()]).await, config(60));

    let report = enabler.enable(&[broken.clone(), fine]).await;
    assert_eq!(report.failed, vec!["broken"]);
    assert_eq!(report.enabled, vec!["fine"]);
    assert_eq!(broken.plugin_state(), PluginState::Disabled);
}

#[tokio::test(start_paused = true)]
async fn test_wait_respects_an_explicit_deadline() {
    let stuck: Arc<dyn Plugin> =
        Arc::new(StaticPlugin::new("stuck", "1.0").with_enable_behavior(EnableBehavior::Never));
    let enabler = PluginEnabler::new(registry_with(&[stuck.clone()]).await, config(60));
    stuck.enable().unwrap();

    let deadline = Instant::now() + Duration::from_millis(450);
    let pending = enabler.wait_for_enabling(&[stuck.clone()], deadline).await;
    assert_eq!(pending.len(), 1);
    assert!(Instant::now() >= deadline);
    // The wait itself never changes state
    assert_eq!(stuck.plugin_state(), PluginState::Enabling);
}

#[tokio::test(start_paused = true)]
async fn test_recursive_enable_walks_the_chain() {
    let a: Arc<dyn Plugin> = Arc::new(StaticPlugin::new("a", "1.0").requires("b"));
    let b: Arc<dyn Plugin> = Arc::new(StaticPlugin::new("b", "1.0").requires("c"));
    let c: Arc<dyn Plugin> = Arc::new(StaticPlugin::new("c", "1.0"));
    let enabler = PluginEnabler::new(registry_with(&[a.clone(), b.clone(), c.clone()]).await, config(60));

    let batch: Vec<String> = enabler
        .collect_dependencies(&a)
        .await
        .iter()
        .map(|p| p.key().to_string())
        .collect();
    assert_eq!(batch, vec!["a", "b", "c"]);

    let report = enabler.enable_recursively(&a).await;
    assert!(report.is_success());
    for plugin in [&a, &b, &c] {
        assert_eq!(plugin.plugin_state(), PluginState::Enabled);
    }
}

#[tokio::test(start_paused = true)]
async fn test_already_enabled_dependencies_are_left_alone() {
    let a: Arc<dyn Plugin> = Arc::new(StaticPlugin::new("a", "1.0").requires("b").requires("ghost"));
    let b: Arc<dyn Plugin> = Arc::new(StaticPlugin::new("b", "1.0"));
    b.enable().unwrap();
    let enabler = PluginEnabler::new(registry_with(&[a.clone(), b.clone()]).await, config(60));

    let batch = enabler.collect_dependencies(&a).await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].key(), "a");
}

#[tokio::test(start_paused = true)]
async fn test_circular_dependencies_converge() {
    let a: Arc<dyn Plugin> = Arc::new(deferred("a", 300).requires("b"));
    let b: Arc<dyn Plugin> = Arc::new(deferred("b", 500).requires("c"));
    let c: Arc<dyn Plugin> = Arc::new(deferred("c", 700).requires("a"));
    let enabler = PluginEnabler::new(registry_with(&[a.clone(), b.clone(), c.clone()]).await, config(60));

    let report = enabler.enable_recursively(&b).await;
    assert!(report.is_success());
    assert_eq!(report.enabled.len(), 3);
    for plugin in [&a, &b, &c] {
        assert_eq!(plugin.plugin_state(), PluginState::Enabled);
    }
}
