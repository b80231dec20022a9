use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::event::{DefaultEventBus, PluginEventBus, PluginLifecycleEvent};
use crate::kernel::constants::{APP_NAME, APP_VERSION};
use crate::kernel::error::{KernelLifecyclePhase, Result};
use crate::kernel::state::{ManagerState, StateTracker};
use crate::plugin_system::enabler::{EnableReport, PluginEnabler};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::{PluginArtifact, PluginInstaller, PluginLoader};
use crate::plugin_system::module::{
    DefaultModuleDescriptorFactory, ModuleDescriptor, ModuleDescriptorFactory,
};
use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::state::PluginState;
use crate::plugin_system::traits::Plugin;
use crate::plugin_system::unloadable::UnloadablePlugin;
use crate::plugin_system::version::compare_versions;
use crate::storage::config::ManagerConfig;
use crate::storage::state::{PluginPersistentState, PluginPersistentStateBuilder, RestartState};
use crate::storage::store::{MemoryStateStore, PluginPersistentStateStore};

/// Plugin lifecycle operations exposed to hosts
#[async_trait]
pub trait PluginManager: Send + Sync + Debug {
    /// Load every plugin, enable those whose persisted state says so and clear
    /// pending restart markers. On failure everything enabled so far is
    /// disabled again and the manager ends up `Shutdown`, ready for another
    /// `init`.
    async fn init(&self) -> Result<()>;

    /// Disable all plugins (without persisting) and empty the registry
    async fn shutdown(&self) -> Result<()>;

    /// Validate all artifacts, then persist them and scan. Nothing is
    /// persisted unless every artifact validates.
    async fn install_plugins(&self, artifacts: Vec<PluginArtifact>) -> Result<Vec<String>>;

    /// Pick up plugins the loaders found since the last scan
    async fn scan_for_new_plugins(&self) -> Result<usize>;

    async fn uninstall(&self, plugin_key: &str) -> Result<()>;

    /// Enable the plugins and their disabled dependencies, persisting the choice
    async fn enable_plugins(&self, plugin_keys: &[&str]) -> Result<EnableReport>;

    async fn disable_plugin(&self, plugin_key: &str) -> Result<()>;

    /// Disable for this process lifetime only
    async fn disable_plugin_without_persisting(&self, plugin_key: &str) -> Result<()>;

    async fn enable_plugin_module(&self, complete_key: &str) -> Result<()>;

    async fn disable_plugin_module(&self, complete_key: &str) -> Result<()>;

    async fn get_plugin(&self, plugin_key: &str) -> Option<Arc<dyn Plugin>>;

    async fn get_plugins(&self) -> Vec<Arc<dyn Plugin>>;

    async fn get_enabled_plugins(&self) -> Vec<Arc<dyn Plugin>>;

    async fn get_plugin_module(&self, complete_key: &str) -> Option<Arc<dyn ModuleDescriptor>>;

    async fn is_plugin_enabled(&self, plugin_key: &str) -> bool;

    /// True when the owning plugin is enabled and the module's effective flag is on
    async fn is_plugin_module_enabled(&self, complete_key: &str) -> bool;

    async fn restart_state(&self, plugin_key: &str) -> Result<RestartState>;

    /// Drop a pending restart change. A pending install is rolled back entirely.
    async fn revert_restart_required_change(&self, plugin_key: &str) -> Result<()>;
}

/// Default implementation of the plugin manager.
///
/// Owns the registry and coordinates loaders, the persisted state store, the
/// installer, the event bus and the enabler. Concurrent calls on different
/// plugin keys are safe; callers racing on the same key must synchronise
/// themselves.
pub struct DefaultPluginManager {
    registry: Arc<PluginRegistry>,
    loaders: Vec<Arc<dyn PluginLoader>>,
    module_factory: Arc<dyn ModuleDescriptorFactory>,
    store: Arc<dyn PluginPersistentStateStore>,
    /// Serialises load-modify-save cycles on the store
    store_guard: Mutex<()>,
    installer: Option<Arc<dyn PluginInstaller>>,
    event_bus: Arc<dyn PluginEventBus>,
    enabler: PluginEnabler,
    tracker: StateTracker,
    plugin_to_loader: RwLock<HashMap<String, Arc<dyn PluginLoader>>>,
}

impl Debug for DefaultPluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultPluginManager")
            .field("state", &self.tracker.get())
            .field("loaders", &self.loaders.len())
            .field("config", self.enabler.config())
            .finish_non_exhaustive()
    }
}

impl Default for DefaultPluginManager {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStateStore::new()))
    }
}

fn same_instance<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl DefaultPluginManager {
    pub fn new(store: Arc<dyn PluginPersistentStateStore>) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        Self {
            enabler: PluginEnabler::new(registry.clone(), ManagerConfig::default()),
            registry,
            loaders: Vec::new(),
            module_factory: Arc::new(DefaultModuleDescriptorFactory::new()),
            store,
            store_guard: Mutex::new(()),
            installer: None,
            event_bus: Arc::new(DefaultEventBus::new()),
            tracker: StateTracker::new(),
            plugin_to_loader: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn PluginInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<dyn PluginEventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_module_factory(mut self, factory: Arc<dyn ModuleDescriptorFactory>) -> Self {
        self.module_factory = factory;
        self
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.enabler = PluginEnabler::new(self.registry.clone(), config);
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn enabler(&self) -> &PluginEnabler {
        &self.enabler
    }

    /// Current lifecycle state of the manager itself
    pub fn state(&self) -> ManagerState {
        self.tracker.get()
    }

    /// Install a single artifact, returning its plugin key
    pub async fn install_plugin(&self, artifact: PluginArtifact) -> Result<String> {
        let mut keys = self.install_plugins(vec![artifact]).await?;
        keys.pop().ok_or_else(|| PluginSystemError::parse("artifact", "no plugin key was produced").into())
    }

    /// Enable one plugin together with its disabled dependencies
    pub async fn enable_plugin(&self, plugin_key: &str) -> Result<EnableReport> {
        if !self.registry.contains(plugin_key).await {
            return Err(PluginSystemError::not_permitted("enable", plugin_key, "plugin is not installed").into());
        }
        self.enable_plugins(&[plugin_key]).await
    }

    /// Persisted entries of the plugin and its modules
    pub fn plugin_state_map(&self, plugin_key: &str) -> Result<BTreeMap<String, bool>> {
        Ok(self.store.load()?.plugin_state_map(plugin_key))
    }

    /// Every plugin with a change waiting for the next restart
    pub fn plugins_requiring_restart(&self) -> Result<Vec<(String, RestartState)>> {
        Ok(self.store.load()?.plugins_with_restart_state())
    }

    fn require_started(&self) -> Result<()> {
        self.tracker.require(ManagerState::Started, KernelLifecyclePhase::Operate)
    }

    /// Load a fresh snapshot, apply `edit` and save the result
    fn update_state<F>(&self, edit: F) -> Result<PluginPersistentState>
    where
        F: FnOnce(&mut PluginPersistentStateBuilder),
    {
        let _guard = self.store_guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut builder = self.store.load()?.builder();
        edit(&mut builder);
        let next = builder.build();
        self.store.save(&next)?;
        Ok(next)
    }

    fn state_or_default(&self) -> PluginPersistentState {
        self.store.load().unwrap_or_else(|e| {
            log::error!("Unable to load persisted plugin state, using defaults: {}", e);
            PluginPersistentState::new()
        })
    }

    async fn broadcast(&self, event: PluginLifecycleEvent) {
        if let Err(e) = self.event_bus.broadcast(&event).await {
            log::warn!("Listener failure while broadcasting {}: {}", event, e);
        }
    }

    async fn register(&self, plugin: Arc<dyn Plugin>, loader: &Arc<dyn PluginLoader>) {
        let key = plugin.key().to_string();
        self.registry.put(plugin).await;
        self.plugin_to_loader.write().await.insert(key, loader.clone());
    }

    /// Key of the first dynamic loader that recognises the artifact
    fn validate_artifact(&self, artifact: &PluginArtifact) -> Result<String> {
        self.loaders
            .iter()
            .filter(|loader| loader.is_dynamic())
            .find_map(|loader| loader.can_load(artifact))
            .ok_or_else(|| {
                PluginSystemError::parse(&artifact.name, "no loader recognises this artifact").into()
            })
    }

    /// Fire `enabled` on each module whose effective flag is on, in order.
    ///
    /// On a module failure the plugin is disabled and replaced in the registry
    /// by an unloadable placeholder; returns false in that case.
    async fn enable_plugin_modules(&self, plugin: &Arc<dyn Plugin>, state: &PluginPersistentState) -> bool {
        for module in plugin.module_descriptors() {
            if !state.is_module_enabled(module.as_ref()) {
                log::debug!("Module '{}' is disabled, not enabling it", module.complete_key());
                continue;
            }
            if let Err(e) = module.enabled() {
                log::error!(
                    "Module '{}' failed to enable, plugin '{}' becomes unloadable: {}",
                    module.complete_key(),
                    plugin.key(),
                    e
                );
                if let Err(disable_err) = self.disable_plugin_internal(plugin, false).await {
                    log::error!("Unable to disable plugin '{}': {}", plugin.key(), disable_err);
                }
                let placeholder = UnloadablePlugin::replacing(plugin.as_ref(), e.to_string()).into_arc();
                self.registry.put(placeholder).await;
                return false;
            }
            self.broadcast(PluginLifecycleEvent::ModuleEnabled {
                complete_key: module.complete_key(),
            })
            .await;
        }
        true
    }

    /// Fire `disabled` on each active module, last registered first
    async fn disable_plugin_modules(&self, plugin: &Arc<dyn Plugin>) {
        for module in plugin.module_descriptors().into_iter().rev() {
            if !module.is_active() {
                continue;
            }
            module.disabled();
            self.broadcast(PluginLifecycleEvent::ModuleDisabled {
                complete_key: module.complete_key(),
            })
            .await;
        }
    }

    async fn disable_plugin_internal(&self, plugin: &Arc<dyn Plugin>, persist: bool) -> Result<()> {
        if persist {
            self.update_state(|b| {
                b.set_enabled(plugin.as_ref(), false);
            })?;
        }
        if !matches!(plugin.plugin_state(), PluginState::Enabled | PluginState::Enabling) {
            return Ok(());
        }

        log::info!("Disabling plugin '{}'", plugin.key());
        self.disable_plugin_modules(plugin).await;
        if let Err(e) = plugin.disable() {
            log::warn!("Plugin '{}' did not disable cleanly: {}", plugin.key(), e);
        }
        self.broadcast(PluginLifecycleEvent::PluginDisabled {
            plugin_key: plugin.key().to_string(),
        })
        .await;
        Ok(())
    }

    async fn remove_from_loader(&self, plugin: &dyn Plugin, loader: &Arc<dyn PluginLoader>) {
        if !loader.supports_removal() {
            log::warn!(
                "Loader '{}' cannot remove plugin '{}', leaving its artifact in place",
                loader.name(),
                plugin.key()
            );
            return;
        }
        if let Err(e) = loader.remove_plugin(plugin).await {
            log::error!("Loader '{}' failed to remove plugin '{}': {}", loader.name(), plugin.key(), e);
        }
    }

    /// Swap `old` for `new`, keeping the persisted entries that still apply.
    ///
    /// The old instance is fully disabled and uninstalled before this returns,
    /// so the two are never active together.
    async fn replace_plugin(
        &self,
        old: &Arc<dyn Plugin>,
        new: &Arc<dyn Plugin>,
        new_loader: &Arc<dyn PluginLoader>,
    ) -> Result<()> {
        let key = old.key().to_string();
        log::info!("Upgrading plugin '{}' from {} to {}", key, old.version(), new.version());

        let live_keys: HashSet<String> = std::iter::once(new.key().to_string())
            .chain(new.module_descriptors().iter().map(|m| m.complete_key()))
            .collect();
        let old_state = self.store.load()?.plugin_state_map(&key);
        let preserved: BTreeMap<String, bool> = old_state
            .iter()
            .filter(|(k, _)| live_keys.contains(*k))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        for stale in old_state.keys().filter(|k| !live_keys.contains(*k)) {
            log::debug!("Dropping persisted state '{}', gone from the new version", stale);
        }

        self.disable_plugin_internal(old, false).await?;
        if let Err(e) = old.uninstall() {
            log::warn!("Old version of plugin '{}' did not uninstall cleanly: {}", key, e);
        }
        self.registry.remove(&key).await;
        let old_loader = self.plugin_to_loader.write().await.remove(&key);
        if let Some(old_loader) = old_loader {
            if !same_instance(&old_loader, new_loader) && old.is_deletable() {
                self.remove_from_loader(old.as_ref(), &old_loader).await;
            }
        }

        self.update_state(|b| {
            for k in old_state.keys() {
                b.remove_state(k);
            }
            b.add_state(preserved);
        })?;
        Ok(())
    }

    /// Add a batch of plugins, resolving duplicate keys by version, then
    /// enable the ones whose persisted state says so.
    ///
    /// Returns how many plugins were added. A same-or-older duplicate of an
    /// unloadable plugin is a parse error, reported after the rest of the
    /// batch has been processed.
    async fn add_plugins(
        &self,
        mut candidates: Vec<(Arc<dyn Plugin>, Arc<dyn PluginLoader>)>,
        announce: bool,
    ) -> Result<usize> {
        candidates.sort_by(|a, b| a.0.key().cmp(b.0.key()));

        let mut to_enable: Vec<Arc<dyn Plugin>> = Vec::new();
        let mut unresolved = None;
        let mut added = 0;

        for (plugin, loader) in candidates {
            let key = plugin.key().to_string();
            let mut upgraded = false;

            if let Some(existing) = self.registry.get(&key).await {
                if same_instance(&existing, &plugin) {
                    log::debug!("Plugin '{}' is already registered", key);
                    continue;
                }
                let ordering = compare_versions(plugin.version(), existing.version());
                if existing.unloadable_reason().is_some() && ordering != Ordering::Greater {
                    log::error!(
                        "Plugin '{}' {} cannot replace the unloadable version {}",
                        key,
                        plugin.version(),
                        existing.version()
                    );
                    if unresolved.is_none() {
                        unresolved = Some(PluginSystemError::parse(
                            &key,
                            format!(
                                "duplicate key: version {} cannot replace unloadable version {}",
                                plugin.version(),
                                existing.version()
                            ),
                        ));
                    }
                    continue;
                }
                if ordering == Ordering::Less {
                    log::warn!(
                        "Skipping plugin '{}' {}: newer version {} is already installed",
                        key,
                        plugin.version(),
                        existing.version()
                    );
                    continue;
                }
                self.replace_plugin(&existing, &plugin, &loader).await?;
                upgraded = true;
            }

            if let Err(e) = plugin.install() {
                log::error!("Plugin '{}' failed to install: {}", key, e);
                let placeholder = UnloadablePlugin::replacing(plugin.as_ref(), e.to_string()).into_arc();
                self.register(placeholder, &loader).await;
                continue;
            }
            self.register(plugin.clone(), &loader).await;
            added += 1;
            log::info!("Added plugin '{}' {}", key, plugin.version());

            if upgraded {
                self.broadcast(PluginLifecycleEvent::PluginUpgraded { plugin_key: key.clone() }).await;
            } else if announce {
                self.broadcast(PluginLifecycleEvent::PluginInstalled { plugin_key: key.clone() }).await;
            }

            if self.store.load()?.is_enabled(plugin.as_ref()) {
                to_enable.push(plugin);
            }
        }

        if !to_enable.is_empty() {
            let report = self.enabler.enable(&to_enable).await;
            if !report.is_success() {
                log::error!(
                    "Some plugins failed to start: failed={:?} timed_out={:?}",
                    report.failed,
                    report.timed_out
                );
            }
            let state = self.store.load()?;
            for plugin in &to_enable {
                if plugin.plugin_state() != PluginState::Enabled {
                    continue;
                }
                if self.enable_plugin_modules(plugin, &state).await {
                    self.broadcast(PluginLifecycleEvent::PluginEnabled {
                        plugin_key: plugin.key().to_string(),
                    })
                    .await;
                }
            }
        }

        match unresolved {
            Some(e) => Err(e.into()),
            None => Ok(added),
        }
    }

    /// Record a restart-required addition instead of applying it
    async fn defer_until_restart(&self, plugin: &Arc<dyn Plugin>, loader: &Arc<dyn PluginLoader>) -> Result<()> {
        let key = plugin.key();
        let pending = self.store.load()?.restart_state(key);
        let existing = self.registry.get(key).await;

        if existing.is_some() && pending != RestartState::Install {
            log::warn!(
                "Plugin '{}' {} requires a restart to upgrade; the running version stays in use",
                key,
                plugin.version()
            );
            self.update_state(|b| {
                b.set_restart_state(key, RestartState::Upgrade);
            })?;
            return Ok(());
        }

        log::warn!("Plugin '{}' {} requires a restart to install", key, plugin.version());
        self.update_state(|b| {
            b.set_restart_state(key, RestartState::Install);
        })?;
        let placeholder =
            UnloadablePlugin::replacing(plugin.as_ref(), "a restart is required to finish installing").into_arc();
        self.register(placeholder, loader).await;
        Ok(())
    }

    async fn uninstall_now(&self, plugin: &Arc<dyn Plugin>, loader: Option<&Arc<dyn PluginLoader>>) -> Result<()> {
        let key = plugin.key().to_string();
        log::info!("Uninstalling plugin '{}'", key);

        self.disable_plugin_internal(plugin, false).await?;
        plugin.uninstall()?;
        self.registry.remove(&key).await;
        self.plugin_to_loader.write().await.remove(&key);
        self.update_state(|b| {
            b.remove_plugin_state(&key);
        })?;
        if let Some(loader) = loader {
            loader.remove_plugin(plugin.as_ref()).await?;
        }

        self.broadcast(PluginLifecycleEvent::PluginUninstalled { plugin_key: key }).await;
        Ok(())
    }

    /// Load every plugin and enable the ones whose persisted state says so.
    /// Returns how many plugins were added.
    async fn start(&self) -> Result<usize> {
        let pending_removal: HashSet<String> = self
            .store
            .load()?
            .plugins_with_restart_state()
            .into_iter()
            .filter(|(_, state)| *state == RestartState::Remove)
            .map(|(key, _)| key)
            .collect();

        let mut found = Vec::new();
        for loader in &self.loaders {
            let plugins = loader.load_all(self.module_factory.as_ref()).await?;
            log::debug!("Loader '{}' found {} plugin(s)", loader.name(), plugins.len());
            for plugin in plugins {
                if pending_removal.contains(plugin.key()) {
                    log::info!("Removing plugin '{}' marked for removal on restart", plugin.key());
                    self.remove_from_loader(plugin.as_ref(), loader).await;
                    continue;
                }
                found.push((plugin, loader.clone()));
            }
        }
        if !pending_removal.is_empty() {
            self.update_state(|b| {
                for key in &pending_removal {
                    b.remove_plugin_state(key);
                }
            })?;
        }

        let added = self.add_plugins(found, false).await?;

        if !self.store.load()?.plugins_with_restart_state().is_empty() {
            self.update_state(|b| {
                b.clear_restart_states();
            })?;
        }
        Ok(added)
    }

    /// Disable every plugin without persisting, last added first, and empty
    /// the registry
    async fn disable_all(&self) {
        let mut plugins = self.registry.plugins().await;
        plugins.reverse();
        for plugin in &plugins {
            if let Err(e) = self.disable_plugin_internal(plugin, false).await {
                log::warn!("Error disabling plugin '{}': {}", plugin.key(), e);
            }
        }
        self.registry.clear().await;
        self.plugin_to_loader.write().await.clear();
    }

    async fn lookup_plugin(&self, operation: &str, plugin_key: &str) -> Result<Arc<dyn Plugin>> {
        self.registry
            .get(plugin_key)
            .await
            .ok_or_else(|| PluginSystemError::not_permitted(operation, plugin_key, "plugin is not installed").into())
    }

    async fn lookup_module(&self, operation: &str, complete_key: &str) -> Result<Arc<dyn ModuleDescriptor>> {
        self.registry
            .module_descriptor(complete_key)
            .await
            .ok_or_else(|| PluginSystemError::not_permitted(operation, complete_key, "module is not installed").into())
    }
}

#[async_trait]
impl PluginManager for DefaultPluginManager {
    async fn init(&self) -> Result<()> {
        self.tracker.set_state(ManagerState::Starting)?;
        log::info!(
            "Initializing {} {} plugin manager with {} loader(s)",
            APP_NAME,
            APP_VERSION,
            self.loaders.len()
        );
        self.broadcast(PluginLifecycleEvent::FrameworkStarting).await;

        match self.start().await {
            Ok(added) => {
                self.tracker.set_state(ManagerState::Started)?;
                log::info!("Plugin manager started with {} plugin(s)", added);
                self.broadcast(PluginLifecycleEvent::FrameworkStarted).await;
                Ok(())
            }
            Err(e) => {
                log::error!("Plugin manager failed to start: {}", e);
                self.disable_all().await;
                self.tracker.abort_start()?;
                Err(e)
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.tracker.set_state(ManagerState::ShuttingDown)?;
        log::info!("Shutting down plugin manager");
        self.broadcast(PluginLifecycleEvent::FrameworkShutdown).await;
        self.disable_all().await;
        self.tracker.set_state(ManagerState::Shutdown)?;
        Ok(())
    }

    async fn install_plugins(&self, artifacts: Vec<PluginArtifact>) -> Result<Vec<String>> {
        self.require_started()?;

        let mut validated = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            let key = self.validate_artifact(artifact)?;
            validated.push((key, artifact));
        }

        let installer = self.installer.as_ref().ok_or_else(|| {
            let subject = validated.first().map(|(key, _)| key.as_str()).unwrap_or("");
            PluginSystemError::not_permitted("install", subject, "no plugin installer is configured")
        })?;
        for (key, artifact) in &validated {
            log::info!("Installing plugin '{}' from '{}'", key, artifact.name);
            installer.install(key, artifact).await?;
        }

        self.scan_for_new_plugins().await?;
        Ok(validated.into_iter().map(|(key, _)| key).collect())
    }

    async fn scan_for_new_plugins(&self) -> Result<usize> {
        self.require_started()?;

        let mut candidates = Vec::new();
        let mut deferred = 0;
        for loader in self.loaders.iter().filter(|l| l.supports_addition()) {
            for plugin in loader.add_found(self.module_factory.as_ref()).await? {
                if plugin.requires_restart() {
                    self.defer_until_restart(&plugin, loader).await?;
                    deferred += 1;
                } else {
                    candidates.push((plugin, loader.clone()));
                }
            }
        }

        let added = self.add_plugins(candidates, true).await?;
        Ok(added + deferred)
    }

    async fn uninstall(&self, plugin_key: &str) -> Result<()> {
        self.require_started()?;
        let plugin = self.lookup_plugin("uninstall", plugin_key).await?;

        if !plugin.is_uninstallable() {
            return Err(
                PluginSystemError::not_permitted("uninstall", plugin_key, "plugin is not uninstallable").into(),
            );
        }
        let loader = self.plugin_to_loader.read().await.get(plugin_key).cloned();
        if let Some(loader) = &loader {
            if !loader.supports_removal() {
                return Err(PluginSystemError::not_permitted(
                    "uninstall",
                    plugin_key,
                    format!("loader '{}' does not support removal", loader.name()),
                )
                .into());
            }
        }

        if self.store.load()?.restart_state(plugin_key) == RestartState::Install {
            return self.revert_restart_required_change(plugin_key).await;
        }
        if plugin.requires_restart() {
            log::warn!("Plugin '{}' requires a restart to be removed", plugin_key);
            self.update_state(|b| {
                b.set_restart_state(plugin_key, RestartState::Remove);
            })?;
            return Ok(());
        }

        self.uninstall_now(&plugin, loader.as_ref()).await
    }

    async fn enable_plugins(&self, plugin_keys: &[&str]) -> Result<EnableReport> {
        self.require_started()?;

        let mut seen = HashSet::new();
        let mut batch: Vec<Arc<dyn Plugin>> = Vec::new();
        for key in plugin_keys {
            let Some(plugin) = self.registry.get(key).await else {
                log::warn!("Cannot enable '{}': no such plugin", key);
                continue;
            };
            for candidate in self.enabler.collect_dependencies(&plugin).await {
                if seen.insert(candidate.key().to_string()) {
                    batch.push(candidate);
                }
            }
        }
        if batch.is_empty() {
            return Ok(EnableReport::default());
        }

        let state = self.update_state(|b| {
            for plugin in &batch {
                b.set_enabled(plugin.as_ref(), true);
            }
        })?;

        let report = self.enabler.enable(&batch).await;
        for plugin in &batch {
            if plugin.plugin_state() != PluginState::Enabled {
                continue;
            }
            if self.enable_plugin_modules(plugin, &state).await {
                self.broadcast(PluginLifecycleEvent::PluginEnabled {
                    plugin_key: plugin.key().to_string(),
                })
                .await;
            }
        }
        Ok(report)
    }

    async fn disable_plugin(&self, plugin_key: &str) -> Result<()> {
        self.require_started()?;
        let plugin = self.lookup_plugin("disable", plugin_key).await?;
        self.disable_plugin_internal(&plugin, true).await
    }

    async fn disable_plugin_without_persisting(&self, plugin_key: &str) -> Result<()> {
        self.require_started()?;
        let plugin = self.lookup_plugin("disable", plugin_key).await?;
        self.disable_plugin_internal(&plugin, false).await
    }

    async fn enable_plugin_module(&self, complete_key: &str) -> Result<()> {
        self.require_started()?;
        let module = self.lookup_module("enable module", complete_key).await?;

        self.update_state(|b| {
            b.set_module_enabled(module.as_ref(), true);
        })?;
        if self.is_plugin_enabled(module.plugin_key()).await && !module.is_active() {
            if let Err(e) = module.enabled() {
                log::error!("Module '{}' failed to enable: {}", complete_key, e);
                return Err(e);
            }
            self.broadcast(PluginLifecycleEvent::ModuleEnabled {
                complete_key: complete_key.to_string(),
            })
            .await;
        }
        Ok(())
    }

    async fn disable_plugin_module(&self, complete_key: &str) -> Result<()> {
        self.require_started()?;
        let module = self.lookup_module("disable module", complete_key).await?;

        if !module.can_disable() {
            log::info!("Module '{}' cannot be disabled on its own, ignoring", complete_key);
            return Ok(());
        }
        self.update_state(|b| {
            b.set_module_enabled(module.as_ref(), false);
        })?;
        if module.is_active() {
            module.disabled();
            self.broadcast(PluginLifecycleEvent::ModuleDisabled {
                complete_key: complete_key.to_string(),
            })
            .await;
        }
        Ok(())
    }

    async fn get_plugin(&self, plugin_key: &str) -> Option<Arc<dyn Plugin>> {
        self.registry.get(plugin_key).await
    }

    async fn get_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.registry.plugins().await
    }

    async fn get_enabled_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.registry.plugins_in_state(PluginState::Enabled).await
    }

    async fn get_plugin_module(&self, complete_key: &str) -> Option<Arc<dyn ModuleDescriptor>> {
        self.registry.module_descriptor(complete_key).await
    }

    async fn is_plugin_enabled(&self, plugin_key: &str) -> bool {
        self.registry
            .get(plugin_key)
            .await
            .is_some_and(|p| p.plugin_state() == PluginState::Enabled)
    }

    async fn is_plugin_module_enabled(&self, complete_key: &str) -> bool {
        let Some(module) = self.registry.module_descriptor(complete_key).await else {
            return false;
        };
        self.is_plugin_enabled(module.plugin_key()).await
            && self.state_or_default().is_module_enabled(module.as_ref())
    }

    async fn restart_state(&self, plugin_key: &str) -> Result<RestartState> {
        Ok(self.store.load()?.restart_state(plugin_key))
    }

    async fn revert_restart_required_change(&self, plugin_key: &str) -> Result<()> {
        self.require_started()?;
        match self.store.load()?.restart_state(plugin_key) {
            RestartState::None => Ok(()),
            RestartState::Upgrade | RestartState::Remove => {
                log::info!("Reverting pending restart change of plugin '{}'", plugin_key);
                self.update_state(|b| {
                    b.set_restart_state(plugin_key, RestartState::None);
                })?;
                Ok(())
            }
            RestartState::Install => {
                log::info!("Reverting pending install of plugin '{}'", plugin_key);
                self.update_state(|b| {
                    b.remove_plugin_state(plugin_key);
                })?;
                let placeholder = self.registry.remove(plugin_key).await;
                let loader = self.plugin_to_loader.write().await.remove(plugin_key);
                if let (Some(placeholder), Some(loader)) = (placeholder, loader) {
                    self.remove_from_loader(placeholder.as_ref(), &loader).await;
                }
                self.broadcast(PluginLifecycleEvent::PluginUninstalled {
                    plugin_key: plugin_key.to_string(),
                })
                .await;
                Ok(())
            }
        }
    }
}
