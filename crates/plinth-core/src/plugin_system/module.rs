use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::kernel::constants::MODULE_KEY_SEPARATOR;
use crate::kernel::error::Result;
use crate::plugin_system::error::PluginSystemError;

/// Static capability flags of a module descriptor type.
///
/// A descriptor type derived from another composes its flags with
/// [`ModuleCapabilities::inherit`] once, when the descriptor is built, so a
/// restart requirement declared on a base type reaches every descendant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleCapabilities {
    /// Adding, upgrading or removing the module needs a process restart
    #[serde(default)]
    pub requires_restart: bool,
    /// The module ignores disable requests aimed at it alone
    #[serde(default)]
    pub cannot_disable: bool,
}

impl ModuleCapabilities {
    pub const NONE: ModuleCapabilities = ModuleCapabilities {
        requires_restart: false,
        cannot_disable: false,
    };

    pub const fn requiring_restart(mut self) -> Self {
        self.requires_restart = true;
        self
    }

    pub const fn not_disableable(mut self) -> Self {
        self.cannot_disable = true;
        self
    }

    /// Union with the capabilities of a base type
    pub const fn inherit(self, base: ModuleCapabilities) -> Self {
        ModuleCapabilities {
            requires_restart: self.requires_restart || base.requires_restart,
            cannot_disable: self.cannot_disable || base.cannot_disable,
        }
    }
}

/// One unit of functionality inside a plugin
pub trait ModuleDescriptor: Send + Sync + fmt::Debug {
    /// Key unique within the owning plugin
    fn key(&self) -> &str;

    /// Key of the owning plugin
    fn plugin_key(&self) -> &str;

    /// `plugin_key:key`, unique across the whole system
    fn complete_key(&self) -> String {
        format!("{}{}{}", self.plugin_key(), MODULE_KEY_SEPARATOR, self.key())
    }

    fn name(&self) -> &str {
        self.key()
    }

    /// Type name the descriptor was created for
    fn module_type(&self) -> &str;

    fn is_enabled_by_default(&self) -> bool {
        true
    }

    fn capabilities(&self) -> ModuleCapabilities {
        ModuleCapabilities::NONE
    }

    fn requires_restart(&self) -> bool {
        self.capabilities().requires_restart
    }

    /// False for modules that can only go down together with their plugin
    fn can_disable(&self) -> bool {
        !self.capabilities().cannot_disable
    }

    /// Whether the `enabled` hook has run more recently than `disabled`
    fn is_active(&self) -> bool;

    /// Called when the module becomes available
    fn enabled(&self) -> Result<()>;

    /// Called when the module stops being available
    fn disabled(&self);
}

/// Hook run by [`SimpleModuleDescriptor::enabled`], given the complete key
pub type ModuleEnableHook = Arc<dyn Fn(&str) -> std::result::Result<(), String> + Send + Sync>;

/// General purpose descriptor with no domain behaviour of its own
pub struct SimpleModuleDescriptor {
    key: String,
    plugin_key: String,
    name: String,
    module_type: String,
    enabled_by_default: bool,
    capabilities: ModuleCapabilities,
    active: AtomicBool,
    on_enable: Option<ModuleEnableHook>,
}

impl fmt::Debug for SimpleModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleModuleDescriptor")
            .field("complete_key", &self.complete_key())
            .field("module_type", &self.module_type)
            .field("capabilities", &self.capabilities)
            .field("active", &self.is_active())
            .finish()
    }
}

impl SimpleModuleDescriptor {
    pub fn new(plugin_key: &str, key: &str) -> Self {
        Self {
            key: key.to_string(),
            plugin_key: plugin_key.to_string(),
            name: key.to_string(),
            module_type: "simple".to_string(),
            enabled_by_default: true,
            capabilities: ModuleCapabilities::NONE,
            active: AtomicBool::new(false),
            on_enable: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_module_type(mut self, module_type: &str) -> Self {
        self.module_type = module_type.to_string();
        self
    }

    pub fn with_enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    pub fn with_capabilities(mut self, capabilities: ModuleCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn requiring_restart(mut self) -> Self {
        self.capabilities = self.capabilities.requiring_restart();
        self
    }

    pub fn not_disableable(mut self) -> Self {
        self.capabilities = self.capabilities.not_disableable();
        self
    }

    pub fn with_enable_hook(mut self, hook: ModuleEnableHook) -> Self {
        self.on_enable = Some(hook);
        self
    }
}

impl ModuleDescriptor for SimpleModuleDescriptor {
    fn key(&self) -> &str {
        &self.key
    }

    fn plugin_key(&self) -> &str {
        &self.plugin_key
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn module_type(&self) -> &str {
        &self.module_type
    }

    fn is_enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }

    fn capabilities(&self) -> ModuleCapabilities {
        self.capabilities
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn enabled(&self) -> Result<()> {
        if let Some(hook) = &self.on_enable {
            let complete_key = self.complete_key();
            hook(&complete_key).map_err(|message| PluginSystemError::ModuleEnableFailed {
                complete_key,
                message,
            })?;
        }
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disabled(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Parsed form of one module element of a plugin descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub key: String,
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    #[serde(flatten)]
    pub capabilities: ModuleCapabilities,
}

fn default_true() -> bool {
    true
}

impl ModuleSpec {
    pub fn new(key: &str, module_type: &str) -> Self {
        Self {
            key: key.to_string(),
            module_type: module_type.to_string(),
            name: None,
            enabled_by_default: true,
            capabilities: ModuleCapabilities::NONE,
        }
    }
}

/// Turns parsed module elements into descriptors
pub trait ModuleDescriptorFactory: Send + Sync + fmt::Debug {
    fn has_module_type(&self, module_type: &str) -> bool;

    fn create(&self, plugin_key: &str, spec: &ModuleSpec) -> Result<Arc<dyn ModuleDescriptor>>;
}

/// Factory mapping type names to base capabilities.
///
/// Unknown types produce plain descriptors, unless the factory is restricted,
/// in which case they are a parse error.
#[derive(Debug, Default)]
pub struct DefaultModuleDescriptorFactory {
    types: HashMap<String, ModuleCapabilities>,
    restricted: bool,
}

impl DefaultModuleDescriptorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only registered module types are accepted
    pub fn restricted() -> Self {
        Self {
            types: HashMap::new(),
            restricted: true,
        }
    }

    pub fn register_type(&mut self, module_type: &str, base: ModuleCapabilities) -> &mut Self {
        self.types.insert(module_type.to_string(), base);
        self
    }

    /// Register `module_type` as a descendant of an already registered `parent`
    pub fn register_subtype(
        &mut self,
        module_type: &str,
        parent: &str,
        own: ModuleCapabilities,
    ) -> &mut Self {
        let base = self.types.get(parent).copied().unwrap_or_default();
        self.types.insert(module_type.to_string(), own.inherit(base));
        self
    }
}

impl ModuleDescriptorFactory for DefaultModuleDescriptorFactory {
    fn has_module_type(&self, module_type: &str) -> bool {
        self.types.contains_key(module_type)
    }

    fn create(&self, plugin_key: &str, spec: &ModuleSpec) -> Result<Arc<dyn ModuleDescriptor>> {
        let base = match self.types.get(&spec.module_type) {
            Some(base) => *base,
            None if self.restricted => {
                return Err(PluginSystemError::parse(
                    plugin_key,
                    format!("unknown module type '{}' for module '{}'", spec.module_type, spec.key),
                )
                .into());
            }
            None => ModuleCapabilities::NONE,
        };

        let descriptor = SimpleModuleDescriptor::new(plugin_key, &spec.key)
            .with_name(spec.name.as_deref().unwrap_or(&spec.key))
            .with_module_type(&spec.module_type)
            .with_enabled_by_default(spec.enabled_by_default)
            .with_capabilities(spec.capabilities.inherit(base));
        Ok(Arc::new(descriptor))
    }
}
