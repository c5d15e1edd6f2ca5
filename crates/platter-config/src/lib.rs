//! # platter-config
//!
//! Configuration management for platter.
//!
//! Loads configuration from:
//! 1. `~/.platter/config.toml` (global)
//! 2. `.platter/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7878";
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

pub const ENV_CACHE_ROOT: &str = "PLATTER_CACHE_ROOT";
pub const ENV_LIBRARY: &str = "PLATTER_LIBRARY";
pub const ENV_LISTEN: &str = "PLATTER_LISTEN";
pub const ENV_REMOTE_ADDR: &str = "PLATTER_REMOTE_ADDR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub transfer: TransferConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self> {
        let mut table = toml::Table::new();

        // 1. Global config (~/.platter/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                table = read_table(&global_path)?;
            }
        }

        // 2. Project config (.platter/config.toml) - overrides global per key
        let project_path = Path::new(".platter/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            merge_tables(&mut table, read_table(project_path)?);
        }

        let mut config: Config = toml::Value::Table(table).try_into()?;

        // 3. Environment variable overrides
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load config from one explicit file, skipping the standard locations.
    pub fn load_file(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let mut config: Config = toml::Value::Table(read_table(path)?).try_into()?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Global config path: ~/.platter/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".platter/config.toml"))
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_CACHE_ROOT) {
            self.storage.cache_root = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_LIBRARY) {
            self.storage.library = Some(PathBuf::from(path));
        }
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.server.listen = listen;
        }
        if let Some(addr) = lookup(ENV_REMOTE_ADDR) {
            self.remote.addr = Some(addr);
            if self.remote.backend == Backend::None {
                self.remote.backend = Backend::Peer;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "transfer.chunk_size must be greater than zero".to_string(),
            ));
        }
        match self.remote.backend {
            Backend::Peer if self.remote.addr.as_deref().unwrap_or("").is_empty() => Err(
                ConfigError::Invalid("remote.backend = \"peer\" requires remote.addr".to_string()),
            ),
            Backend::Bucket if self.remote.bucket.as_deref().unwrap_or("").is_empty() => {
                Err(ConfigError::Invalid(
                    "remote.backend = \"bucket\" requires remote.bucket".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents.parse::<toml::Table>()?)
}

/// Overlay `other` onto `base`, recursing into tables present in both.
fn merge_tables(base: &mut toml::Table, other: toml::Table) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// 0 disables a timeout.
fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

/// How the local cache stores objects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Mirror of the source layout (write-through cache)
    #[default]
    Plain,
    /// Content-addressed store with a path index
    Cafs,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Local media directory, served before anything remote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<PathBuf>,
    /// Cache store root
    pub cache_root: PathBuf,
    pub cache_mode: CacheMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            library: None,
            cache_root: dirs::cache_dir()
                .map(|d| d.join("platter"))
                .unwrap_or_else(|| PathBuf::from(".platter/cache")),
            cache_mode: CacheMode::Plain,
        }
    }
}

/// Where cache misses are fetched from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    None,
    /// Another platter server
    Peer,
    /// S3-compatible bucket
    Bucket,
}

/// Remote backing store configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub backend: Backend,
    /// Peer address (host:port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    /// Label requested from the peer
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Key prefix inside the bucket
    pub prefix: String,
}

/// Download tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub chunk_size: usize,
    pub connect_timeout_secs: u64,
    /// Per chunk read from the network
    pub read_timeout_secs: u64,
    /// Reader waiting for a chunk still downloading
    pub wait_timeout_secs: u64,
}

impl TransferConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        secs(self.read_timeout_secs)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        secs(self.wait_timeout_secs)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            wait_timeout_secs: 120,
        }
    }
}

/// Extra label serving the main stack under rewritten paths
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub trim_prefix: String,
    pub add_prefix: String,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub request_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub mounts: BTreeMap<String, MountConfig>,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        secs(self.request_timeout_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        secs(self.write_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            request_timeout_secs: 10,
            write_timeout_secs: 60,
            mounts: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen, DEFAULT_LISTEN);
        assert_eq!(config.transfer.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.remote.backend, Backend::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[transfer]"));
        assert!(toml_str.contains("cache_mode = \"plain\""));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_zero_disables_timeouts() {
        let transfer = TransferConfig {
            wait_timeout_secs: 0,
            ..TransferConfig::default()
        };
        assert_eq!(transfer.wait_timeout(), None);
        assert_eq!(transfer.read_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_merge_tables_recurses() {
        let mut base: toml::Table = "[server]\nlisten = \"a\"\nwrite_timeout_secs = 5\n"
            .parse()
            .unwrap();
        let overlay: toml::Table = "[server]\nlisten = \"b\"\n".parse().unwrap();
        merge_tables(&mut base, overlay);

        let config: Config = toml::Value::Table(base).try_into().unwrap();
        assert_eq!(config.server.listen, "b");
        assert_eq!(config.server.write_timeout_secs, 5);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            ENV_REMOTE_ADDR => Some("10.0.0.2:7878".to_string()),
            ENV_LIBRARY => Some("/srv/music".to_string()),
            _ => None,
        });
        assert_eq!(config.remote.backend, Backend::Peer);
        assert_eq!(config.remote.addr.as_deref(), Some("10.0.0.2:7878"));
        assert_eq!(config.storage.library, Some(PathBuf::from("/srv/music")));
        assert!(config.validate().is_ok());
    }
}
