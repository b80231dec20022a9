use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::kernel::error::Result;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::module::ModuleDescriptorFactory;
use crate::plugin_system::traits::Plugin;

/// An installable plugin artifact, as handed over by an operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginArtifact {
    /// File name or other identifier of the artifact
    pub name: String,
    pub contents: Vec<u8>,
}

impl PluginArtifact {
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// Source of plugins for the manager.
///
/// A loader that can validate artifacts (`can_load` returns a key for some
/// input) is a dynamic loader and takes part in `install_plugins`.
#[async_trait]
pub trait PluginLoader: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Every plugin the loader can currently see
    async fn load_all(&self, factory: &dyn ModuleDescriptorFactory) -> Result<Vec<Arc<dyn Plugin>>>;

    fn supports_addition(&self) -> bool {
        false
    }

    /// Plugins that appeared since the last `load_all`/`add_found`
    async fn add_found(&self, _factory: &dyn ModuleDescriptorFactory) -> Result<Vec<Arc<dyn Plugin>>> {
        Ok(Vec::new())
    }

    fn supports_removal(&self) -> bool {
        false
    }

    /// Forget a plugin this loader produced, deleting its artifact if any
    async fn remove_plugin(&self, plugin: &dyn Plugin) -> Result<()> {
        Err(PluginSystemError::not_permitted(
            "remove",
            plugin.key(),
            format!("loader '{}' does not support removal", self.name()),
        )
        .into())
    }

    /// Plugin key contained in `artifact`, if this loader recognises it
    fn can_load(&self, _artifact: &PluginArtifact) -> Option<String> {
        None
    }

    fn is_dynamic(&self) -> bool {
        false
    }
}

/// Persists validated artifacts where a loader will find them on the next scan
#[async_trait]
pub trait PluginInstaller: Send + Sync + fmt::Debug {
    async fn install(&self, plugin_key: &str, artifact: &PluginArtifact) -> Result<()>;
}

/// In-memory loader over plugins built in code.
///
/// Plugins passed to [`StaticPluginLoader::push`] are returned by the next
/// `add_found` and stay known to later `load_all` calls, the way files stay in
/// a plugin directory. Artifacts registered with
/// [`StaticPluginLoader::with_artifact`] make it a dynamic loader and installer:
/// installing such an artifact queues its plugin for the next scan.
#[derive(Default)]
pub struct StaticPluginLoader {
    name: String,
    known: Mutex<Vec<Arc<dyn Plugin>>>,
    pending: Mutex<Vec<Arc<dyn Plugin>>>,
    artifacts: Mutex<HashMap<String, Arc<dyn Plugin>>>,
    removed: Mutex<Vec<String>>,
    removal: bool,
}

impl fmt::Debug for StaticPluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPluginLoader")
            .field("name", &self.name)
            .field("known", &lock(&self.known).len())
            .field("pending", &lock(&self.pending).len())
            .field("removal", &self.removal)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StaticPluginLoader {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            removal: true,
            ..Self::default()
        }
    }

    /// Plugins returned by `load_all`
    pub fn with_plugins(self, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        lock(&self.known).extend(plugins);
        self
    }

    pub fn with_removal(mut self, removal: bool) -> Self {
        self.removal = removal;
        self
    }

    /// Make `artifact_name` installable, producing `plugin`
    pub fn with_artifact(self, artifact_name: &str, plugin: Arc<dyn Plugin>) -> Self {
        lock(&self.artifacts).insert(artifact_name.to_string(), plugin);
        self
    }

    /// Queue a plugin for the next `add_found`
    pub fn push(&self, plugin: Arc<dyn Plugin>) {
        lock(&self.pending).push(plugin);
    }

    /// Move queued plugins into the known set, replacing same-key entries
    fn absorb_pending(&self) -> Vec<Arc<dyn Plugin>> {
        let found: Vec<Arc<dyn Plugin>> = lock(&self.pending).drain(..).collect();
        let mut known = lock(&self.known);
        for plugin in &found {
            known.retain(|p| p.key() != plugin.key());
            known.push(plugin.clone());
        }
        found
    }

    /// Keys passed to `remove_plugin`, in call order
    pub fn removed(&self) -> Vec<String> {
        lock(&self.removed).clone()
    }
}

#[async_trait]
impl PluginLoader for StaticPluginLoader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_all(&self, _factory: &dyn ModuleDescriptorFactory) -> Result<Vec<Arc<dyn Plugin>>> {
        self.absorb_pending();
        Ok(lock(&self.known).clone())
    }

    fn supports_addition(&self) -> bool {
        true
    }

    async fn add_found(&self, _factory: &dyn ModuleDescriptorFactory) -> Result<Vec<Arc<dyn Plugin>>> {
        Ok(self.absorb_pending())
    }

    fn supports_removal(&self) -> bool {
        self.removal
    }

    async fn remove_plugin(&self, plugin: &dyn Plugin) -> Result<()> {
        if !self.removal {
            return Err(PluginSystemError::not_permitted(
                "remove",
                plugin.key(),
                format!("loader '{}' does not support removal", self.name),
            )
            .into());
        }
        lock(&self.known).retain(|p| p.key() != plugin.key());
        lock(&self.removed).push(plugin.key().to_string());
        Ok(())
    }

    fn can_load(&self, artifact: &PluginArtifact) -> Option<String> {
        lock(&self.artifacts)
            .get(&artifact.name)
            .map(|plugin| plugin.key().to_string())
    }

    fn is_dynamic(&self) -> bool {
        !lock(&self.artifacts).is_empty()
    }
}

#[async_trait]
impl PluginInstaller for StaticPluginLoader {
    async fn install(&self, plugin_key: &str, artifact: &PluginArtifact) -> Result<()> {
        let plugin = lock(&self.artifacts).get(&artifact.name).cloned();
        match plugin {
            Some(plugin) => {
                self.push(plugin);
                Ok(())
            }
            None => Err(PluginSystemError::InstallationError {
                plugin_key: plugin_key.to_string(),
                message: format!("unknown artifact '{}'", artifact.name),
            }
            .into()),
        }
    }
}
