//! TOML configuration loading (§9 expansion "configuration loading").
//!
//! Grounded on `crates/cli/src/manifest.rs`'s `Manifest::load`/
//! `load_or_default`: read the file if present, `toml::from_str` into a
//! `serde`-derived struct, fall back to `Default` with a warning on stderr
//! if the file is missing or malformed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk shape of `durable-streams.toml`. Every field is optional so a
/// partial file only overrides what it names; everything else keeps its
/// built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub long_poll_timeout_secs: Option<u64>,
    #[serde(default)]
    pub sse_lifetime_secs: Option<u64>,
    #[serde(default)]
    pub cursor_interval_seconds: Option<u64>,
    #[serde(default)]
    pub cursor_max_jitter_seconds: Option<u64>,
    #[serde(default)]
    pub max_chunk_bytes: Option<usize>,
    #[serde(default)]
    pub max_chunk_entries: Option<usize>,
    /// Directory for the file-backed store. Absence means the in-memory
    /// store is used, regardless of whether the `file-storage` feature
    /// was compiled in.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
}

impl Config {
    /// Load the config file from `path`, erroring if it's missing.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Load the config file, falling back to [`Config::default`] (and a
    /// stderr warning) if it's absent or unparseable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => Config::default(),
            Err(e) => {
                eprintln!("Warning: {e}");
                eprintln!("Using default configuration...");
                Config::default()
            }
        }
    }
}
