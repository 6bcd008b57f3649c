use std::fs;

use stonechat::{AppError, ChatConfig};
use tempfile::tempdir;

#[test]
fn test_defaults_without_file() {
    let config = ChatConfig::set_up_config(None::<&str>).unwrap();
    assert_eq!(config.network.ip, "0.0.0.0");
    assert_eq!(config.buffer.connection_buffer_size, 4096);
    assert_eq!(config.relay_port(), config.network.port);
}

#[test]
fn test_file_overrides_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("conf.toml");
    fs::write(
        &path,
        "[network]\nport = 9100\nprivate_port = 9101\n\n[buffer]\nconnection_buffer_size = 8192\n",
    )
    .unwrap();

    let config = ChatConfig::set_up_config(Some(&path)).unwrap();
    assert_eq!(config.network.port, 9100);
    assert_eq!(config.network.private_port, Some(9101));
    assert_eq!(config.relay_port(), 9101);
    assert_eq!(config.buffer.connection_buffer_size, 8192);
    assert_eq!(config.network.handoff_capacity, 100);
}

#[test]
fn test_buffer_must_hold_a_frame() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("small.toml");
    fs::write(&path, "[buffer]\nconnection_buffer_size = 1024\n").unwrap();

    let err = ChatConfig::set_up_config(Some(&path)).unwrap_err();
    assert!(matches!(err, AppError::InvalidValue(_)));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let err = ChatConfig::set_up_config(Some(dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, AppError::ConfigFileError(_)));
}

#[test]
fn test_environment_overrides() {
    std::env::set_var("STONECHAT_TRANSFER__MAX_PAYLOAD_SIZE", "1234");
    let config = ChatConfig::set_up_config(None::<&str>).unwrap();
    std::env::remove_var("STONECHAT_TRANSFER__MAX_PAYLOAD_SIZE");
    assert_eq!(config.transfer.max_payload_size, 1234);
}
