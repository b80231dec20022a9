use std::sync::Arc;

use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::state::PluginState;
use crate::plugin_system::static_plugin::StaticPlugin;
use crate::plugin_system::traits::Plugin;

fn plugin(key: &str, version: &str) -> Arc<dyn Plugin> {
    Arc::new(StaticPlugin::new(key, version).with_simple_module("main"))
}

#[tokio::test]
async fn test_put_get_remove() {
    let registry = PluginRegistry::new();
    assert!(registry.is_empty().await);

    assert!(registry.put(plugin("a", "1.0")).await.is_none());
    let replaced = registry.put(plugin("a", "2.0")).await.expect("previous instance");
    assert_eq!(replaced.version(), "1.0");
    assert_eq!(registry.get("a").await.unwrap().version(), "2.0");
    assert_eq!(registry.len().await, 1);

    assert!(registry.remove("a").await.is_some());
    assert!(registry.get("a").await.is_none());
    assert!(registry.remove("a").await.is_none());
}

#[tokio::test]
async fn test_listing_is_ordered_by_key() {
    let registry = PluginRegistry::new();
    for key in ["c", "a", "b"] {
        registry.put(plugin(key, "1.0")).await;
    }
    assert_eq!(registry.plugin_keys().await, vec!["a", "b", "c"]);
    let keys: Vec<String> = registry.plugins().await.iter().map(|p| p.key().to_string()).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_module_lookup_by_complete_key() {
    let registry = PluginRegistry::new();
    registry.put(plugin("a", "1.0")).await;

    let module = registry.module_descriptor("a:main").await.expect("module");
    assert_eq!(module.plugin_key(), "a");
    assert!(registry.module_descriptor("a:missing").await.is_none());
    assert!(registry.module_descriptor("b:main").await.is_none());
    assert!(registry.module_descriptor("no-separator").await.is_none());
}

#[tokio::test]
async fn test_plugins_in_state_and_clear() {
    let registry = PluginRegistry::new();
    let enabled = plugin("on", "1.0");
    enabled.enable().unwrap();
    registry.put(enabled).await;
    registry.put(plugin("off", "1.0")).await;

    let active = registry.plugins_in_state(PluginState::Enabled).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].key(), "on");

    assert_eq!(registry.clear().await.len(), 2);
    assert!(registry.is_empty().await);
}
