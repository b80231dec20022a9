mod manifest;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use plinth_core::plugin_system::{EnableReport, PluginArtifact, PluginState};
use plinth_core::storage::state::is_restart_marker;
use plinth_core::storage::{JsonFileStateStore, PluginPersistentStateStore};
use plinth_core::{DefaultPluginManager, Error, ManagerConfig, PluginManager, RestartState, Result};

use manifest::ManifestDirectoryLoader;

/// Plinth: install, enable and remove plugins described by JSON manifests
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Directory holding one `*.json` manifest per plugin
    #[arg(long, global = true, default_value = "plugins")]
    plugins_dir: PathBuf,

    /// File the persisted enable/disable state is kept in
    #[arg(long, global = true, default_value = "plinth-state.json")]
    state_file: PathBuf,

    /// Manager configuration file (json, yaml or toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// How long plugins may take to enable
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List plugins, their state and their modules
    List,
    /// Enable a plugin together with the plugins it requires
    Enable { key: String },
    /// Disable a plugin
    Disable { key: String },
    /// Enable one module (`plugin:module`)
    EnableModule { complete_key: String },
    /// Disable one module (`plugin:module`)
    DisableModule { complete_key: String },
    /// Remove a plugin and its manifest
    Uninstall { key: String },
    /// Install or upgrade a plugin from a manifest file
    Install { file: PathBuf },
    /// Show the persisted state and pending restart changes
    State,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    // No-op when the subscriber already bridged `log`
    let _ = tracing_log::LogTracer::init();
}

fn load_config(args: &CliArgs) -> Result<ManagerConfig> {
    let config = match &args.config {
        Some(path) => ManagerConfig::load(path)?,
        None => ManagerConfig::default(),
    };
    let config = config.with_env_overrides(|name| std::env::var(name).ok());
    Ok(match args.timeout_secs {
        Some(secs) => config.with_enable_timeout(Duration::from_secs(secs)),
        None => config,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = CliArgs::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> Result<()> {
    let config = load_config(&args)?;
    let loader = Arc::new(ManifestDirectoryLoader::new(&args.plugins_dir));
    let store = Arc::new(JsonFileStateStore::new(&args.state_file));
    let manager = DefaultPluginManager::new(store.clone())
        .with_loader(loader.clone())
        .with_installer(loader)
        .with_config(config);

    manager.init().await?;
    let outcome = execute(&manager, store.as_ref(), args.command).await;
    if let Err(e) = manager.shutdown().await {
        error!("Plugin manager did not shut down cleanly: {}", e);
    }
    outcome
}

async fn execute(manager: &DefaultPluginManager, store: &JsonFileStateStore, command: Commands) -> Result<()> {
    match command {
        Commands::List => list(manager).await,
        Commands::Enable { key } => {
            let report = manager.enable_plugin(&key).await?;
            print_report(&report);
            check_report(&key, &report)
        }
        Commands::Disable { key } => {
            manager.disable_plugin(&key).await?;
            println!("Disabled plugin '{key}'");
            Ok(())
        }
        Commands::EnableModule { complete_key } => {
            manager.enable_plugin_module(&complete_key).await?;
            println!("Enabled module '{complete_key}'");
            Ok(())
        }
        Commands::DisableModule { complete_key } => {
            manager.disable_plugin_module(&complete_key).await?;
            let protected = manager
                .get_plugin_module(&complete_key)
                .await
                .is_some_and(|module| !module.can_disable());
            if protected {
                println!("Module '{complete_key}' cannot be disabled on its own");
            } else {
                println!("Disabled module '{complete_key}'");
            }
            Ok(())
        }
        Commands::Uninstall { key } => {
            manager.uninstall(&key).await?;
            match manager.restart_state(&key).await? {
                RestartState::Remove => println!("Plugin '{key}' will be removed on the next restart"),
                _ => println!("Uninstalled plugin '{key}'"),
            }
            Ok(())
        }
        Commands::Install { file } => install(manager, &file).await,
        Commands::State => show_state(store, manager),
    }
}

async fn list(manager: &DefaultPluginManager) -> Result<()> {
    let plugins = manager.get_plugins().await;
    if plugins.is_empty() {
        println!("No plugins installed.");
        return Ok(());
    }
    for plugin in plugins {
        let status = match plugin.unloadable_reason() {
            Some(reason) => format!("unloadable ({reason})"),
            None if plugin.plugin_state() == PluginState::Enabled => "enabled".to_string(),
            None => "disabled".to_string(),
        };
        println!("{} {} {}", plugin.key(), plugin.version(), status);
        for module in plugin.module_descriptors() {
            let complete_key = module.complete_key();
            let status = if manager.is_plugin_module_enabled(&complete_key).await {
                "enabled"
            } else {
                "disabled"
            };
            println!("  {complete_key} {status}");
        }
    }
    Ok(())
}

async fn install(manager: &DefaultPluginManager, file: &Path) -> Result<()> {
    let contents = fs::read(file)
        .map_err(|e| plinth_core::storage::StorageSystemError::io(e, "read", file.to_path_buf()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let key = manager.install_plugin(PluginArtifact::new(name, contents)).await?;
    info!("Installed artifact {} as plugin '{}'", file.display(), key);
    match manager.restart_state(&key).await? {
        RestartState::None => println!("Installed plugin '{key}'"),
        pending => println!("Plugin '{key}' is staged; {pending} takes effect on the next restart"),
    }
    Ok(())
}

fn show_state(store: &JsonFileStateStore, manager: &DefaultPluginManager) -> Result<()> {
    let state = store.load()?;
    let overrides: Vec<(&String, &bool)> = state.map().iter().filter(|(k, _)| !is_restart_marker(k)).collect();
    if overrides.is_empty() {
        println!("All plugins and modules are at their defaults.");
    }
    for (key, enabled) in overrides {
        println!("{key} = {}", if *enabled { "enabled" } else { "disabled" });
    }
    for (key, pending) in manager.plugins_requiring_restart()? {
        println!("{key} pending restart: {pending}");
    }
    Ok(())
}

fn print_report(report: &EnableReport) {
    for key in &report.enabled {
        println!("Enabled plugin '{key}'");
    }
    for key in &report.failed {
        eprintln!("Plugin '{key}' failed to enable");
    }
    for key in &report.timed_out {
        eprintln!("Plugin '{key}' timed out while enabling");
    }
}

fn check_report(key: &str, report: &EnableReport) -> Result<()> {
    if report.is_success() {
        Ok(())
    } else {
        Err(Error::Other(format!("plugin '{key}' could not be fully enabled")))
    }
}
