//! Layered configuration loading

use crate::integration::support::with_config_env;
use genpipe::config::{ChannelBackendKind, ConfigLoader, GenpipeConfig};
use genpipe::error::GenerationError;
use genpipe::orchestrator::OrchestratorSettings;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write_global(test_dir: &TempDir, contents: &str) {
    let dir = test_dir.path().join("xdg").join("genpipe");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), contents).unwrap();
}

#[test]
fn test_defaults_without_any_file() {
    let test_dir = TempDir::new().unwrap();
    let workspace = test_dir.path().join("workspace");
    fs::create_dir_all(&workspace).unwrap();

    let config = with_config_env(&test_dir, || ConfigLoader::load(&workspace).unwrap());
    assert_eq!(config, GenpipeConfig::default());
    assert_eq!(
        config.channel.backend_kind().unwrap(),
        ChannelBackendKind::Local
    );
}

#[test]
fn test_workspace_file_overrides_global_file() {
    let test_dir = TempDir::new().unwrap();
    let workspace = test_dir.path().join("workspace");
    fs::create_dir_all(&workspace).unwrap();

    write_global(
        &test_dir,
        r#"
[channel]
capacity = 32
receive_timeout_ms = 1000

[workers]
max_concurrent = 4
"#,
    );
    fs::write(
        workspace.join("genpipe.toml"),
        r#"
[channel]
capacity = 8
"#,
    )
    .unwrap();

    let config = with_config_env(&test_dir, || ConfigLoader::load(&workspace).unwrap());
    assert_eq!(config.channel.capacity, 8);
    assert_eq!(config.channel.receive_timeout_ms, 1000);
    assert_eq!(config.workers.max_concurrent, 4);
    assert_eq!(config.watchdog.max_lifetime_ms, 600_000);
}

#[test]
fn test_environment_overrides_files() {
    let test_dir = TempDir::new().unwrap();
    let workspace = test_dir.path().join("workspace");
    fs::create_dir_all(&workspace).unwrap();
    fs::write(
        workspace.join("genpipe.toml"),
        r#"
[watchdog]
heartbeat_interval_ms = 5000
"#,
    )
    .unwrap();

    let config = with_config_env(&test_dir, || {
        std::env::set_var("GENPIPE__WATCHDOG__HEARTBEAT_INTERVAL_MS", "2500");
        ConfigLoader::load(&workspace).unwrap()
    });
    assert_eq!(config.watchdog.heartbeat_interval_ms, 2500);

    let settings = OrchestratorSettings::from(&config);
    assert_eq!(settings.watchdog.heartbeat_interval, Duration::from_millis(2500));
    assert_eq!(settings.watchdog.max_lifetime, Duration::from_secs(600));
}

#[test]
fn test_load_from_explicit_file() {
    let test_dir = TempDir::new().unwrap();
    let path = test_dir.path().join("custom.toml");
    fs::write(
        &path,
        r#"
[channel]
backend = "local"
capacity = 16

[logging]
level = "debug"
format = "json"
"#,
    )
    .unwrap();

    let config = with_config_env(&test_dir, || ConfigLoader::load_from_file(&path).unwrap());
    assert_eq!(config.channel.capacity, 16);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "json");

    let missing = with_config_env(&test_dir, || {
        ConfigLoader::load_from_file(&test_dir.path().join("missing.toml"))
    });
    assert!(matches!(missing, Err(GenerationError::Config(_))));
}

#[test]
fn test_load_validated_reports_every_problem() {
    let test_dir = TempDir::new().unwrap();
    let workspace = test_dir.path().join("workspace");
    fs::create_dir_all(&workspace).unwrap();
    fs::write(
        workspace.join("genpipe.toml"),
        r#"
[channel]
backend = "carrier-pigeon"
capacity = 0

[watchdog]
max_lifetime_ms = 1000
heartbeat_interval_ms = 1000
"#,
    )
    .unwrap();

    let result = with_config_env(&test_dir, || ConfigLoader::load_validated(&workspace));
    match result {
        Err(GenerationError::Config(message)) => {
            assert!(message.contains("carrier-pigeon"), "{}", message);
            assert!(message.contains("capacity"), "{}", message);
            assert!(message.contains("heartbeat_interval_ms"), "{}", message);
        }
        other => panic!("expected a config error, got {:?}", other),
    }
}
