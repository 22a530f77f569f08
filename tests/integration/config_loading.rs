//! Integration tests for the configuration system

use sluice::config::ConfigLoader;
use sluice::{BackpressureStrategy, StreamEngine};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_config_file_drives_engine_settings() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("sluice.toml");

    std::fs::write(
        &config_file,
        r#"
[engine]
max_concurrent_streams = 2
backpressure = "expand"
latency_window = 10

[engine.buffer]
capacity = 16
high_water_mark = 4096
max_capacity = 64

[engine.retry]
max_retries = 5
base_delay_ms = 250
max_delay_ms = 2000

[logging]
level = "debug"
format = "json"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.engine.max_concurrent_streams, 2);
    assert_eq!(config.engine.backpressure, BackpressureStrategy::Expand);
    assert_eq!(config.engine.buffer.capacity, 16);
    assert_eq!(config.engine.buffer.max_capacity, 64);
    assert_eq!(config.engine.retry.delay_for(1), Duration::from_millis(250));
    assert_eq!(config.engine.retry.delay_for(4), Duration::from_millis(2000));
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_partial_config_keeps_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("sluice.toml");
    std::fs::write(&config_file, "[engine.retry]\nmax_retries = 0\n").unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert_eq!(config.engine.retry.max_retries, 0);
    assert_eq!(config.engine.retry.base_delay_ms, 1000);
    assert_eq!(config.engine.max_concurrent_streams, 4);
    assert_eq!(config.engine.buffer.high_water_mark, 1024 * 1024);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_workspace_config_directory_is_loaded() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = temp_dir.path().join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("sluice.toml"),
        "[engine]\nbackpressure = \"drop\"\n",
    )
    .unwrap();

    let config = ConfigLoader::load(temp_dir.path()).unwrap();
    assert_eq!(config.engine.backpressure, BackpressureStrategy::Drop);
}

#[test]
fn test_unknown_strategy_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("sluice.toml");
    std::fs::write(&config_file, "[engine]\nbackpressure = \"spill\"\n").unwrap();

    assert!(ConfigLoader::load_from_file(&config_file).is_err());
}

#[tokio::test]
async fn test_engine_rejects_invalid_config() {
    let mut config = sluice::EngineConfig::default();
    config.buffer.capacity = 0;
    config.max_concurrent_streams = 0;
    let err = StreamEngine::new(config).unwrap_err();
    assert_eq!(err.code, sluice::ErrorCode::ConfigError);
    assert!(err.message.contains("max_concurrent_streams"));
    assert!(err.message.contains("capacity"));
}

#[test]
fn test_engine_requires_runtime() {
    let err = StreamEngine::new(sluice::EngineConfig::default()).unwrap_err();
    assert_eq!(err.code, sluice::ErrorCode::ConfigError);
}
