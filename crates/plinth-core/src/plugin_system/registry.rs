use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::kernel::constants::MODULE_KEY_SEPARATOR;
use crate::plugin_system::module::ModuleDescriptor;
use crate::plugin_system::state::PluginState;
use crate::plugin_system::traits::Plugin;

/// The authoritative set of currently loaded plugins, keyed by plugin key.
///
/// Reads may run concurrently; each `put`/`remove` is atomic per key. Two
/// callers racing on the same key are not serialized here.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.plugins.read().await.contains_key(key)
    }

    /// Insert or replace a plugin. Returns the instance it replaced.
    pub async fn put(&self, plugin: Arc<dyn Plugin>) -> Option<Arc<dyn Plugin>> {
        let key = plugin.key().to_string();
        self.plugins.write().await.insert(key, plugin)
    }

    pub async fn remove(&self, key: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.write().await.remove(key)
    }

    /// All plugins, ordered by key
    pub async fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let mut all: Vec<Arc<dyn Plugin>> = self.plugins.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(b.key()));
        all
    }

    pub async fn plugin_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Plugins whose lifecycle state is `state`, ordered by key
    pub async fn plugins_in_state(&self, state: PluginState) -> Vec<Arc<dyn Plugin>> {
        self.plugins()
            .await
            .into_iter()
            .filter(|p| p.plugin_state() == state)
            .collect()
    }

    /// Resolve `plugin:module` to the plugin's descriptor
    pub async fn module_descriptor(&self, complete_key: &str) -> Option<Arc<dyn ModuleDescriptor>> {
        let (plugin_key, module_key) = complete_key.split_once(MODULE_KEY_SEPARATOR)?;
        self.get(plugin_key).await?.module_descriptor(module_key)
    }

    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }

    /// Drop every plugin, returning what was registered
    pub async fn clear(&self) -> Vec<Arc<dyn Plugin>> {
        let mut guard = self.plugins.write().await;
        guard.drain().map(|(_, plugin)| plugin).collect()
    }
}
