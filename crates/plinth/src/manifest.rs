//! Plugins described by JSON manifests in a directory.
//!
//! Each `*.json` file holds one plugin:
//!
//! ```json
//! {
//!   "key": "greeter",
//!   "name": "Greeter",
//!   "version": "1.2",
//!   "requires": ["base"],
//!   "modules": [{ "key": "hello", "type": "web-item" }]
//! }
//! ```
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;

use plinth_core::Result;
use plinth_core::plugin_system::{
    ModuleDescriptorFactory, ModuleSpec, Plugin, PluginArtifact, PluginInstaller, PluginLoader,
    PluginSystemError, StaticPlugin, UnloadablePlugin, compare_versions,
};
use plinth_core::storage::StorageSystemError;

const MANIFEST_EXTENSION: &str = "json";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    pub version: String,
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    #[serde(default = "default_true")]
    pub uninstallable: bool,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

fn default_true() -> bool {
    true
}

impl PluginManifest {
    pub fn parse(subject: &str, contents: &[u8]) -> Result<Self> {
        let manifest: PluginManifest = serde_json::from_slice(contents)
            .map_err(|e| PluginSystemError::parse(subject, format!("invalid manifest: {e}")))?;
        if manifest.key.is_empty() || manifest.key.contains([':', '\0']) {
            return Err(PluginSystemError::parse(subject, format!("invalid plugin key '{}'", manifest.key)).into());
        }
        Ok(manifest)
    }

    fn into_plugin(self, factory: &dyn ModuleDescriptorFactory) -> Result<StaticPlugin> {
        let mut plugin = StaticPlugin::new(&self.key, &self.version)
            .with_name(self.name.as_deref().unwrap_or(&self.key))
            .with_enabled_by_default(self.enabled_by_default)
            .with_uninstallable(self.uninstallable)
            .dynamically_loaded();
        for dependency in &self.requires {
            plugin = plugin.requires(dependency);
        }
        for spec in &self.modules {
            plugin = plugin.with_module(factory.create(&self.key, spec)?);
        }
        Ok(plugin)
    }
}

#[derive(Debug, Default)]
struct DirectoryIndex {
    /// Contents of every manifest seen by the last scan, by path
    seen: HashMap<PathBuf, Vec<u8>>,
    /// Manifest file of each plugin key
    files: HashMap<String, PathBuf>,
}

/// Loader and installer backed by a directory of plugin manifests
#[derive(Debug)]
pub struct ManifestDirectoryLoader {
    dir: PathBuf,
    index: Mutex<DirectoryIndex>,
}

impl ManifestDirectoryLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            index: Mutex::new(DirectoryIndex::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            tracing::debug!("Plugin directory {} does not exist yet", self.dir.display());
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| StorageSystemError::io(e, "read_dir", self.dir.clone()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| StorageSystemError::io(e, "read_dir", self.dir.clone()))?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == MANIFEST_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Build a plugin from one manifest file. Broken manifests become
    /// unloadable plugins keyed by the file stem.
    fn load_manifest(&self, path: &Path, contents: &[u8], factory: &dyn ModuleDescriptorFactory) -> Arc<dyn Plugin> {
        let subject = path.display().to_string();
        let built = PluginManifest::parse(&subject, contents).and_then(|manifest| manifest.into_plugin(factory));
        match built {
            Ok(plugin) => Arc::new(plugin),
            Err(e) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| subject.clone());
                tracing::error!("Unable to load plugin manifest {}: {}", subject, e);
                UnloadablePlugin::new(&stem, e.to_string()).into_arc()
            }
        }
    }

    /// Read the directory; with `only_changed`, return plugins whose manifest
    /// is new or differs from the previous scan.
    fn scan(&self, factory: &dyn ModuleDescriptorFactory, only_changed: bool) -> Result<Vec<Arc<dyn Plugin>>> {
        let mut current = HashMap::new();
        for path in self.manifest_files()? {
            let contents = fs::read(&path).map_err(|e| StorageSystemError::io(e, "read", path.clone()))?;
            current.insert(path, contents);
        }

        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<&PathBuf> = current.keys().collect();
        paths.sort();

        let mut plugins = Vec::new();
        for path in paths {
            let contents = &current[path];
            if only_changed && index.seen.get(path) == Some(contents) {
                continue;
            }
            let plugin = self.load_manifest(path, contents, factory);
            index.files.insert(plugin.key().to_string(), path.clone());
            plugins.push(plugin);
        }
        index.seen = current;
        Ok(plugins)
    }
}

#[async_trait]
impl PluginLoader for ManifestDirectoryLoader {
    fn name(&self) -> &str {
        "manifest-directory"
    }

    async fn load_all(&self, factory: &dyn ModuleDescriptorFactory) -> Result<Vec<Arc<dyn Plugin>>> {
        let plugins = self.scan(factory, false)?;
        tracing::debug!("Loaded {} manifest(s) from {}", plugins.len(), self.dir.display());
        Ok(plugins)
    }

    fn supports_addition(&self) -> bool {
        true
    }

    async fn add_found(&self, factory: &dyn ModuleDescriptorFactory) -> Result<Vec<Arc<dyn Plugin>>> {
        self.scan(factory, true)
    }

    fn supports_removal(&self) -> bool {
        true
    }

    async fn remove_plugin(&self, plugin: &dyn Plugin) -> Result<()> {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(path) = index.files.remove(plugin.key()) else {
            return Err(PluginSystemError::LoaderError {
                loader: self.name().to_string(),
                message: format!("no manifest is known for plugin '{}'", plugin.key()),
            }
            .into());
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Manifest {} was already gone", path.display());
            }
            Err(e) => return Err(StorageSystemError::io(e, "remove_file", path).into()),
        }
        index.seen.remove(&path);
        tracing::info!("Removed manifest {}", path.display());
        Ok(())
    }

    fn can_load(&self, artifact: &PluginArtifact) -> Option<String> {
        let is_manifest = Path::new(&artifact.name)
            .extension()
            .is_some_and(|ext| ext == MANIFEST_EXTENSION);
        if !is_manifest {
            return None;
        }
        match PluginManifest::parse(&artifact.name, &artifact.contents) {
            Ok(manifest) => Some(manifest.key),
            Err(e) => {
                tracing::warn!("Artifact '{}' is not a usable manifest: {}", artifact.name, e);
                None
            }
        }
    }

    fn is_dynamic(&self) -> bool {
        true
    }
}

impl ManifestDirectoryLoader {
    /// Fail if `target` holds a newer version of the plugin than `artifact`.
    /// An unreadable or broken manifest on disk may be replaced.
    fn refuse_downgrade(&self, plugin_key: &str, target: &Path, artifact: &PluginArtifact) -> Result<()> {
        let Ok(existing) = fs::read(target) else {
            return Ok(());
        };
        let Ok(installed) = PluginManifest::parse(&target.display().to_string(), &existing) else {
            return Ok(());
        };
        let incoming = PluginManifest::parse(&artifact.name, &artifact.contents)?;
        if compare_versions(&incoming.version, &installed.version) == Ordering::Less {
            tracing::warn!(
                "Refusing to replace plugin '{}' {} with older version {}",
                plugin_key,
                installed.version,
                incoming.version
            );
            return Err(PluginSystemError::not_permitted(
                "install",
                plugin_key,
                format!(
                    "version {} is older than the installed version {}",
                    incoming.version, installed.version
                ),
            )
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl PluginInstaller for ManifestDirectoryLoader {
    async fn install(&self, plugin_key: &str, artifact: &PluginArtifact) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| StorageSystemError::io(e, "create_dir_all", self.dir.clone()))?;

        // Reuse the existing file so an upgrade replaces the old manifest
        let known = self
            .index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .files
            .get(plugin_key)
            .cloned();
        let target = known.unwrap_or_else(|| self.dir.join(format!("{plugin_key}.{MANIFEST_EXTENSION}")));
        self.refuse_downgrade(plugin_key, &target, artifact)?;

        fs::write(&target, &artifact.contents).map_err(|e| StorageSystemError::io(e, "write", target.clone()))?;
        tracing::info!("Wrote manifest of plugin '{}' to {}", plugin_key, target.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_core::plugin_system::{DefaultModuleDescriptorFactory, PluginState};
    use tempfile::tempdir;

    const GREETER: &str = r#"{"key": "greeter", "version": "1.0", "modules": [{"key": "hello", "type": "web-item"}]}"#;

    #[tokio::test]
    async fn test_load_all_reads_manifests() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("greeter.json"), GREETER).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let loader = ManifestDirectoryLoader::new(dir.path());

        let plugins = loader.load_all(&DefaultModuleDescriptorFactory::new()).await.unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].key(), "greeter");
        assert_eq!(plugins[0].module_descriptors()[0].complete_key(), "greeter:hello");
        assert_eq!(plugins[0].plugin_state(), PluginState::Installed);
        assert!(plugins[0].is_dynamically_loaded());
    }

    #[tokio::test]
    async fn test_broken_manifest_is_unloadable() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let loader = ManifestDirectoryLoader::new(dir.path());

        let plugins = loader.load_all(&DefaultModuleDescriptorFactory::new()).await.unwrap();
        assert_eq!(plugins[0].key(), "broken");
        assert!(plugins[0].unloadable_reason().is_some());
    }

    #[tokio::test]
    async fn test_add_found_reports_new_and_changed_files_only() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("greeter.json"), GREETER).unwrap();
        let loader = ManifestDirectoryLoader::new(dir.path());
        let factory = DefaultModuleDescriptorFactory::new();
        loader.load_all(&factory).await.unwrap();

        assert!(loader.add_found(&factory).await.unwrap().is_empty());

        fs::write(dir.path().join("greeter.json"), GREETER.replace("1.0", "1.1")).unwrap();
        let found = loader.add_found(&factory).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version(), "1.1");
    }

    #[tokio::test]
    async fn test_install_and_remove_round_trip_through_the_directory() {
        let dir = tempdir().unwrap();
        let loader = ManifestDirectoryLoader::new(dir.path().join("plugins"));
        let artifact = PluginArtifact::new("greeter-1.0.json", GREETER.as_bytes().to_vec());

        assert_eq!(loader.can_load(&artifact).as_deref(), Some("greeter"));
        loader.install("greeter", &artifact).await.unwrap();
        let target = dir.path().join("plugins").join("greeter.json");
        assert!(target.exists());

        let found = loader.add_found(&DefaultModuleDescriptorFactory::new()).await.unwrap();
        loader.remove_plugin(found[0].as_ref()).await.unwrap();
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_install_never_overwrites_a_newer_manifest() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("greeter.json");
        let newer = GREETER.replace("1.0", "2.0");
        fs::write(&target, &newer).unwrap();
        let loader = ManifestDirectoryLoader::new(dir.path());
        loader.load_all(&DefaultModuleDescriptorFactory::new()).await.unwrap();

        let older = PluginArtifact::new("greeter-1.0.json", GREETER.as_bytes().to_vec());
        let err = loader.install("greeter", &older).await.unwrap_err();
        assert!(err.is_not_permitted());
        assert_eq!(fs::read_to_string(&target).unwrap(), newer);

        let same = PluginArtifact::new("greeter-2.0.json", newer.as_bytes().to_vec());
        loader.install("greeter", &same).await.unwrap();
        let broken_over = PluginArtifact::new("greeter-3.0.json", GREETER.replace("1.0", "3.0").into_bytes());
        fs::write(&target, "{ broken").unwrap();
        loader.install("greeter", &broken_over).await.unwrap();
        assert!(fs::read_to_string(&target).unwrap().contains("3.0"));
    }

    #[test]
    fn test_can_load_rejects_other_artifacts() {
        let loader = ManifestDirectoryLoader::new("unused");
        assert!(loader.can_load(&PluginArtifact::new("plugin.jar", GREETER.as_bytes().to_vec())).is_none());
        assert!(loader.can_load(&PluginArtifact::new("bad.json", b"[]".to_vec())).is_none());
        let bad_key = r#"{"key": "a:b", "version": "1"}"#;
        assert!(loader.can_load(&PluginArtifact::new("bad.json", bad_key.as_bytes().to_vec())).is_none());
    }
}
