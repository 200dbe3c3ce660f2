//! Configuration for chunksync sessions.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CHUNKSYNC_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/chunksync/config.toml
//!   3. ~/.config/chunksync/config.toml
//!
//! `protocol.slot_count` and `protocol.seed` must match on both peers. They
//! are agreed out of band; nothing here negotiates them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::permutation::SeededPermutation;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub protocol: ProtocolConfig,
    pub receiver: ReceiverConfig,
    pub pipe: PipeConfig,
    pub chunker: ChunkerConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Number of slots in the hash list. Files with more chunks cannot be
    /// sent.
    pub slot_count: usize,
    /// Permutation seed shared by both peers.
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Upper bound on concurrent possession checks. 0 is treated as 1.
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Write buffers in flight per in-process byte channel.
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub min_size: usize,
    /// Target average chunk size. Must be a power of two.
    pub avg_size: usize,
    pub max_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root of the on-disk chunk store.
    pub root: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            slot_count: 4096,
            seed: 0,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self { capacity: 1 }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 2 * 1024,
            avg_size: 8 * 1024,
            max_size: 64 * 1024,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("chunks"),
        }
    }
}

impl ProtocolConfig {
    /// The permutation both peers derive from this configuration.
    pub fn permutation(&self) -> SeededPermutation {
        SeededPermutation::new(self.slot_count, self.seed)
    }
}

impl ReceiverConfig {
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.avg_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "chunker.avg_size {} is not a power of two",
                self.avg_size
            )));
        }
        if self.min_size == 0 || self.min_size > self.avg_size || self.avg_size > self.max_size {
            return Err(ConfigError::Invalid(format!(
                "chunker sizes must satisfy 0 < min ({}) <= avg ({}) <= max ({})",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        Ok(())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("chunksync")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("chunksync")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SyncConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SyncConfig::default()
        };
        config.apply_env_overrides();
        config.chunker.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CHUNKSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SyncConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CHUNKSYNC_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse("CHUNKSYNC_PROTOCOL__SLOT_COUNT") {
            self.protocol.slot_count = n;
        }
        if let Some(seed) = env_parse("CHUNKSYNC_PROTOCOL__SEED") {
            self.protocol.seed = seed;
        }
        if let Some(n) = env_parse("CHUNKSYNC_RECEIVER__CONCURRENCY") {
            self.receiver.concurrency = n;
        }
        if let Some(n) = env_parse("CHUNKSYNC_PIPE__CAPACITY") {
            self.pipe.capacity = n;
        }
        if let Ok(v) = std::env::var("CHUNKSYNC_STORE__ROOT") {
            self.store.root = PathBuf::from(v);
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
