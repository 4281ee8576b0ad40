use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::registry::RegistryLists;
use crate::util::paths::{cache_dir, config_path};

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the materialized workflow code
    pub code_dir: PathBuf,
    /// How long Start waits for the entry module to load
    pub start_timeout: Duration,
    /// Worker address; `None` means stdin/stdout
    pub worker_address: Option<String>,
    /// Large-object cache directory
    pub cache_dir: PathBuf,
    /// Opaque payloads above this size go to the cache
    pub cache_threshold: usize,
    /// Additions to the bundled determinism registry
    pub registry: RegistryLists,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            code_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            start_timeout: Duration::from_secs(30),
            worker_address: None,
            cache_dir: cache_dir(),
            cache_threshold: 1024 * 1024,
            registry: RegistryLists::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlRunnerConfig {
    pub code_dir: Option<PathBuf>,
    pub start_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlWorkerConfig {
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlCacheConfig {
    pub dir: Option<PathBuf>,
    pub threshold_bytes: Option<usize>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub runner: Option<TomlRunnerConfig>,
    pub worker: Option<TomlWorkerConfig>,
    pub cache: Option<TomlCacheConfig>,
    pub registry: Option<RegistryLists>,
}

impl Config {
    /// Load configuration from the data directory, merging with defaults.
    /// The example config is written on first run.
    pub fn load() -> Result<Self, ConfigError> {
        let config_file = config_path();
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }
        if config_file.exists() {
            Self::load_from(&config_file)
        } else {
            Ok(Config::default())
        }
    }

    /// Load a specific config file over the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let toml_config =
            toml::from_str::<TomlConfig>(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let mut config = Config::default();
        config.merge(toml_config);
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Apply every key the file sets.
    pub fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(runner) = toml_config.runner {
            if let Some(code_dir) = runner.code_dir {
                self.code_dir = code_dir;
            }
            if let Some(secs) = runner.start_timeout_secs {
                self.start_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(worker) = toml_config.worker {
            if worker.address.is_some() {
                self.worker_address = worker.address;
            }
        }

        if let Some(cache) = toml_config.cache {
            if let Some(dir) = cache.dir {
                self.cache_dir = dir;
            }
            if let Some(threshold) = cache.threshold_bytes {
                self.cache_threshold = threshold;
            }
        }

        if let Some(registry) = toml_config.registry {
            self.registry = registry;
        }
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }

    pub fn with_code_dir(mut self, dir: PathBuf) -> Self {
        self.code_dir = dir;
        self
    }

    pub fn with_worker_address(mut self, address: String) -> Self {
        self.worker_address = Some(address);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses_to_defaults() {
        let parsed: TomlConfig = toml::from_str(EXAMPLE_CONFIG).unwrap();
        let mut config = Config::default();
        config.merge(parsed);
        assert_eq!(config.start_timeout, Duration::from_secs(30));
        assert_eq!(config.worker_address, None);
        assert_eq!(config.cache_threshold, 1024 * 1024);
        assert_eq!(config.registry, RegistryLists::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[runner]
code_dir = "/srv/flows"
start_timeout_secs = 5

[worker]
address = "127.0.0.1:9300"

[cache]
threshold_bytes = 64

[registry]
modules = ["pricing"]
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.code_dir, PathBuf::from("/srv/flows"));
        assert_eq!(config.start_timeout, Duration::from_secs(5));
        assert_eq!(config.worker_address.as_deref(), Some("127.0.0.1:9300"));
        assert_eq!(config.cache_threshold, 64);
        assert_eq!(config.registry.modules, vec!["pricing".to_string()]);
        assert!(config.registry.types.is_empty());
    }

    #[test]
    fn malformed_files_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[runner\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }
}
