use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const GREETER: &str = r#"{
    "key": "greeter",
    "name": "Greeter",
    "version": "1.0",
    "modules": [
        {"key": "hello", "type": "web-item"},
        {"key": "core", "type": "web-item", "cannot_disable": true}
    ]
}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("plugins")).unwrap();
        Self { dir }
    }

    fn plugins_dir(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    fn state_file(&self) -> PathBuf {
        self.dir.path().join("state.json")
    }

    fn add_manifest(&self, file: &str, contents: &str) {
        fs::write(self.plugins_dir().join(file), contents).unwrap();
    }

    fn write_file(&self, file: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(file);
        fs::write(&path, contents).unwrap();
        path
    }

    fn plinth(&self) -> Command {
        let mut cmd = Command::cargo_bin("plinth").unwrap();
        cmd.arg("--plugins-dir")
            .arg(self.plugins_dir())
            .arg("--state-file")
            .arg(self.state_file())
            .env("RUST_LOG", "off");
        cmd
    }
}

fn manifest_exists(dir: &Path, file: &str) -> bool {
    dir.join(file).exists()
}

#[test]
fn test_list_with_no_plugins() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    ws.plinth()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No plugins installed."));
    Ok(())
}

#[test]
fn test_list_shows_plugins_and_modules() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    ws.add_manifest("greeter.json", GREETER);
    ws.add_manifest("broken.json", "{ nope");

    ws.plinth()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("greeter 1.0 enabled"))
        .stdout(predicate::str::contains("  greeter:hello enabled"))
        .stdout(predicate::str::contains("broken  unloadable"));
    Ok(())
}

#[test]
fn test_disable_persists_across_runs() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    ws.add_manifest("greeter.json", GREETER);

    ws.plinth()
        .args(["disable", "greeter"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Disabled plugin 'greeter'"));
    ws.plinth()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("greeter 1.0 disabled"));
    ws.plinth()
        .arg("state")
        .assert()
        .success()
        .stdout(predicate::str::contains("greeter = disabled"));

    ws.plinth()
        .args(["enable", "greeter"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Enabled plugin 'greeter'"));
    ws.plinth()
        .arg("state")
        .assert()
        .success()
        .stdout(predicate::str::contains("All plugins and modules are at their defaults."));
    Ok(())
}

#[test]
fn test_enable_brings_dependencies_along() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    ws.add_manifest(
        "app.json",
        r#"{"key": "app", "version": "2.0", "enabled_by_default": false, "requires": ["lib"]}"#,
    );
    ws.add_manifest("lib.json", r#"{"key": "lib", "version": "0.3", "enabled_by_default": false}"#);

    ws.plinth()
        .args(["enable", "app"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Enabled plugin 'app'"))
        .stdout(predicate::str::contains("Enabled plugin 'lib'"));
    ws.plinth()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("app 2.0 enabled"))
        .stdout(predicate::str::contains("lib 0.3 enabled"));
    Ok(())
}

#[test]
fn test_module_commands() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    ws.add_manifest("greeter.json", GREETER);

    ws.plinth()
        .args(["disable-module", "greeter:hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Disabled module 'greeter:hello'"));
    ws.plinth()
        .args(["disable-module", "greeter:core"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cannot be disabled on its own"));
    ws.plinth()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("  greeter:hello disabled"))
        .stdout(predicate::str::contains("  greeter:core enabled"));

    ws.plinth()
        .args(["enable-module", "greeter:hello"])
        .assert()
        .success();
    ws.plinth()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("  greeter:hello enabled"));
    Ok(())
}

#[test]
fn test_install_then_uninstall() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    let artifact = ws.write_file("extra-1.0.json", r#"{"key": "extra", "version": "1.0"}"#);

    ws.plinth()
        .arg("install")
        .arg(&artifact)
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed plugin 'extra'"));
    assert!(manifest_exists(&ws.plugins_dir(), "extra.json"));

    ws.plinth()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("extra 1.0 enabled"));

    ws.plinth()
        .args(["uninstall", "extra"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Uninstalled plugin 'extra'"));
    assert!(!manifest_exists(&ws.plugins_dir(), "extra.json"));
    Ok(())
}

#[test]
fn test_install_upgrades_existing_manifest() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    ws.add_manifest("greeter.json", GREETER);
    let upgrade = ws.write_file("greeter-2.0.json", &GREETER.replace("\"1.0\"", "\"2.0\""));

    ws.plinth().arg("install").arg(&upgrade).assert().success();
    ws.plinth()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("greeter 2.0 enabled"));
    Ok(())
}

#[test]
fn test_install_refuses_to_downgrade() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    let newer = GREETER.replace("\"1.0\"", "\"2.0\"");
    ws.add_manifest("greeter.json", &newer);
    let older = ws.write_file("greeter-old.json", GREETER);

    ws.plinth()
        .arg("install")
        .arg(&older)
        .assert()
        .failure()
        .stderr(predicate::str::contains("older than the installed version 2.0"));
    assert_eq!(fs::read_to_string(ws.plugins_dir().join("greeter.json"))?, newer);

    ws.plinth()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("greeter 2.0 enabled"));
    Ok(())
}

#[test]
fn test_disable_module_of_disabled_plugin_reports_protection() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    ws.add_manifest("greeter.json", GREETER);
    ws.plinth().args(["disable", "greeter"]).assert().success();

    ws.plinth()
        .args(["disable-module", "greeter:core"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Module 'greeter:core' cannot be disabled on its own"));
    ws.plinth()
        .args(["disable-module", "greeter:hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Disabled module 'greeter:hello'"));
    Ok(())
}

#[test]
fn test_errors_exit_non_zero() -> Result<(), Box<dyn std::error::Error>> {
    let ws = Workspace::new();
    ws.plinth()
        .args(["disable", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not installed"));

    let jar = ws.write_file("plugin.jar", "binary");
    ws.plinth()
        .arg("install")
        .arg(&jar)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no loader recognises"));
    Ok(())
}
