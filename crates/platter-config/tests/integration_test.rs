//! Integration tests for platter-config
//!
//! These tests verify config loading with real file system operations.

use std::path::PathBuf;

use platter_config::{Backend, CacheMode, Config, ConfigError};
use tempfile::tempdir;

#[test]
fn test_load_config_from_file() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");

    let config_content = r#"
[storage]
library = "/srv/music"
cache_root = "/var/cache/platter"
cache_mode = "cafs"

[remote]
backend = "peer"
addr = "10.0.0.5:7878"
label = "flac"

[transfer]
chunk_size = 65536
wait_timeout_secs = 0

[server]
listen = "0.0.0.0:7878"

[server.mounts.artwork]
add_prefix = "artwork/"

[server.mounts.legacy]
trim_prefix = "old/"
"#;
    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load_file(&config_path).unwrap();

    assert_eq!(config.storage.library, Some(PathBuf::from("/srv/music")));
    assert_eq!(config.storage.cache_mode, CacheMode::Cafs);
    assert_eq!(config.remote.backend, Backend::Peer);
    assert_eq!(config.remote.label, "flac");
    assert_eq!(config.transfer.chunk_size, 65536);
    assert_eq!(config.transfer.wait_timeout(), None);
    // Unset keys keep their defaults
    assert_eq!(config.transfer.read_timeout_secs, 30);
    assert_eq!(config.server.mounts.len(), 2);
    assert_eq!(config.server.mounts["artwork"].add_prefix, "artwork/");
    assert_eq!(config.server.mounts["legacy"].trim_prefix, "old/");
}

#[test]
fn test_empty_file_yields_defaults() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");
    std::fs::write(&config_path, "").unwrap();

    let config = Config::from_toml_str(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_invalid_configs_are_rejected() {
    let zero_chunk = Config::from_toml_str("[transfer]\nchunk_size = 0\n").unwrap();
    assert!(matches!(zero_chunk.validate(), Err(ConfigError::Invalid(_))));

    let peer_without_addr = Config::from_toml_str("[remote]\nbackend = \"peer\"\n").unwrap();
    assert!(matches!(
        peer_without_addr.validate(),
        Err(ConfigError::Invalid(_))
    ));

    let bucket_without_name = Config::from_toml_str("[remote]\nbackend = \"bucket\"\n").unwrap();
    assert!(bucket_without_name.validate().is_err());

    assert!(matches!(
        Config::from_toml_str("[storage]\ncache_mode = \"zip\"\n"),
        Err(ConfigError::Toml(_))
    ));
}

#[test]
fn test_default_toml_parses_back() {
    let rendered = Config::default_toml().unwrap();
    let parsed = Config::from_toml_str(&rendered).unwrap();
    assert_eq!(parsed, Config::default());
}

#[test]
fn test_missing_file_is_io_error() {
    let temp = tempdir().unwrap();
    let err = Config::load_file(&temp.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
