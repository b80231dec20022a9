use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::Instant;

use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::state::PluginState;
use crate::plugin_system::traits::Plugin;
use crate::storage::config::ManagerConfig;

/// Outcome of one enable batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnableReport {
    /// Plugins that ended the batch `Enabled`
    pub enabled: Vec<String>,
    /// Plugins whose enable hook failed
    pub failed: Vec<String>,
    /// Plugins still `Enabling` at the deadline, since force-disabled
    pub timed_out: Vec<String>,
}

impl EnableReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

/// Enables batches of plugins and waits, bounded, for slow ones to settle
#[derive(Debug, Clone)]
pub struct PluginEnabler {
    registry: Arc<PluginRegistry>,
    config: ManagerConfig,
}

impl PluginEnabler {
    pub fn new(registry: Arc<PluginRegistry>, config: ManagerConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Enable `plugins` with the configured timeout
    pub async fn enable(&self, plugins: &[Arc<dyn Plugin>]) -> EnableReport {
        let deadline = Instant::now() + self.config.enable_timeout();
        self.enable_until(plugins, deadline).await
    }

    /// Enable every plugin in one pass, then wait until `deadline` for the
    /// ones left `Enabling`.
    ///
    /// Hook failures are logged and reported per plugin; they never stop the
    /// rest of the batch. Stragglers are disabled once the deadline passes.
    pub async fn enable_until(&self, plugins: &[Arc<dyn Plugin>], deadline: Instant) -> EnableReport {
        let mut report = EnableReport::default();

        for plugin in plugins {
            if let Err(e) = plugin.enable() {
                log::error!("Plugin '{}' failed to enable: {}", plugin.key(), e);
                report.failed.push(plugin.key().to_string());
            }
        }

        let enabling: Vec<Arc<dyn Plugin>> = plugins
            .iter()
            .filter(|p| p.plugin_state() == PluginState::Enabling)
            .cloned()
            .collect();

        if !enabling.is_empty() {
            log::debug!("Waiting for {} plugin(s) still enabling", enabling.len());
            let stragglers = self.wait_for_enabling(&enabling, deadline).await;
            if !stragglers.is_empty() {
                let keys: Vec<&str> = stragglers.iter().map(|p| p.key()).collect();
                log::error!(
                    "Plugins did not finish enabling within {:?} and will be disabled: {}",
                    self.config.enable_timeout(),
                    keys.join(", ")
                );
            }
            for plugin in stragglers {
                if let Err(e) = plugin.disable() {
                    log::error!("Unable to disable timed out plugin '{}': {}", plugin.key(), e);
                }
                report.timed_out.push(plugin.key().to_string());
            }
        }

        report.enabled = plugins
            .iter()
            .filter(|p| p.plugin_state() == PluginState::Enabled)
            .map(|p| p.key().to_string())
            .collect();
        report
    }

    /// Poll until none of `plugins` is `Enabling` or `deadline` passes.
    ///
    /// Returns the plugins still `Enabling`. Holds no lock while sleeping and
    /// never sleeps past the deadline; dropping the future cancels the wait.
    pub async fn wait_for_enabling(
        &self,
        plugins: &[Arc<dyn Plugin>],
        deadline: Instant,
    ) -> Vec<Arc<dyn Plugin>> {
        let poll = self.config.enable_poll_interval();
        loop {
            let pending: Vec<Arc<dyn Plugin>> = plugins
                .iter()
                .filter(|p| p.plugin_state() == PluginState::Enabling)
                .cloned()
                .collect();
            if pending.is_empty() {
                return pending;
            }

            let now = Instant::now();
            if now >= deadline {
                return pending;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// `plugin` plus every transitive dependency that is not yet enabled.
    ///
    /// Cycles are cut by a visited set; missing dependencies are logged and
    /// skipped. The target comes first, dependencies in discovery order.
    pub async fn collect_dependencies(&self, plugin: &Arc<dyn Plugin>) -> Vec<Arc<dyn Plugin>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut collected = Vec::new();
        let mut stack = vec![plugin.clone()];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.key().to_string()) {
                continue;
            }
            for dependency_key in current.required_plugins() {
                if visited.contains(&dependency_key) {
                    continue;
                }
                match self.registry.get(&dependency_key).await {
                    Some(dependency) => stack.push(dependency),
                    None => log::warn!(
                        "Plugin '{}' requires '{}', which is not installed",
                        current.key(),
                        dependency_key
                    ),
                }
            }
            if current.plugin_state() != PluginState::Enabled {
                collected.push(current);
            }
        }
        collected
    }

    /// Enable `plugin` together with its disabled dependencies, as one batch
    pub async fn enable_recursively(&self, plugin: &Arc<dyn Plugin>) -> EnableReport {
        let batch = self.collect_dependencies(plugin).await;
        self.enable(&batch).await
    }
}
