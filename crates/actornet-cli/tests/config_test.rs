// Configuration loading tests for actornet-cli

use actornet_cli::{LogFormat, NodeConfig};
use std::fs;
use tempfile::TempDir;

// ============================================================================
// Single Files
// ============================================================================

#[test]
fn test_load_json_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.json");
    fs::write(
        &path,
        r#"{"listen_addr": "127.0.0.1:7000", "transport": {"len_msg_len": 4, "max_msg_len": 1048576}}"#,
    )
    .unwrap();

    let config = NodeConfig::load(&path).unwrap();
    assert_eq!(config.listen_addr, "127.0.0.1:7000");
    assert_eq!(config.transport.len_msg_len, 4);
    assert_eq!(config.transport.max_msg_len, 1_048_576);
    assert_eq!(config.log.format, LogFormat::Text);
}

#[test]
fn test_load_toml_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.toml");
    fs::write(
        &path,
        r#"
listen_addr = "127.0.0.1:7001"

[transport]
little_endian = true
read_deadline_ms = 5000

[log]
level = "debug"
format = "json"
"#,
    )
    .unwrap();

    let config = NodeConfig::load(&path).unwrap();
    assert_eq!(config.listen_addr, "127.0.0.1:7001");
    assert!(config.transport.little_endian);
    assert_eq!(config.transport.read_deadline_ms, 5000);
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.log.format, LogFormat::Json);
}

#[test]
fn test_unsupported_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.yaml");
    fs::write(&path, "listen_addr: x").unwrap();

    let err = NodeConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("unsupported configuration file"));
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    assert!(NodeConfig::load(dir.path().join("absent.json")).is_err());
}

#[test]
fn test_invalid_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.json");
    fs::write(&path, "{not json").unwrap();

    let err = NodeConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("failed to parse"));
}

// ============================================================================
// Directories
// ============================================================================

#[test]
fn test_directory_merge_in_path_order() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("00-base.toml"),
        r#"
listen_addr = "127.0.0.1:8000"

[transport]
max_msg_len = 4096
min_msg_len = 8
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("10-override.json"),
        r#"{"listen_addr": "127.0.0.1:8001", "transport": {"max_msg_len": 8192}}"#,
    )
    .unwrap();
    fs::write(dir.path().join("README.md"), "ignored").unwrap();

    let config = NodeConfig::load(dir.path()).unwrap();
    assert_eq!(config.listen_addr, "127.0.0.1:8001");
    assert_eq!(config.transport.max_msg_len, 8192);
    assert_eq!(config.transport.min_msg_len, 8);
}

#[test]
fn test_empty_directory_rejected() {
    let dir = TempDir::new().unwrap();
    let err = NodeConfig::load(dir.path()).unwrap_err();
    assert!(err.to_string().contains("no configuration files"));
}
