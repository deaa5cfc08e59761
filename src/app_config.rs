//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use archive_cache::archive::reader::DEFAULT_CHUNK_SIZE;

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("archive-cache").join("config.toml"))
}

/// Which cache `ls` opens archives through. `cat` always uses the refcounted cache, since its
/// readers release their handles as they finish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Close each archive as soon as its last reader is done with it.
    #[default]
    Refcounted,
    /// Keep every archive open until the process exits.
    Pinned,
}

/// The cache configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CacheConfig {
    pub strategy: CacheStrategy,
}

/// How entries are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ReaderConfig {
    /// Bytes requested per read call while loading an entry into memory.
    pub chunk_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub cache: CacheConfig,
    pub reader: ReaderConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load the configuration.
    ///
    /// An explicitly given path must exist. Without one, the default location is tried and
    /// defaults are used if nothing is there.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no configuration file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        Self::parse(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Check the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.reader.chunk_size == 0 {
            errors.push("reader.chunk-size must be greater than zero".to_owned());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.reader.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.cache.strategy, CacheStrategy::Refcounted);
    }

    #[test]
    fn parses_kebab_case_keys() {
        let config = Config::parse(
            r#"
            [cache]
            strategy = "pinned"

            [reader]
            chunk-size = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.strategy, CacheStrategy::Pinned);
        assert_eq!(config.reader.chunk_size, 64);
    }

    #[test]
    fn zero_chunk_size_is_invalid() {
        let mut config = Config::default();
        config.reader.chunk_size = 0;
        assert_eq!(config.validate().unwrap_err().len(), 1);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
