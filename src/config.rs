//! Store Configuration
//!
//! Size thresholds, cache budget and background cadence for a partition
//! store. Every field has a default so a partial YAML file is enough.
//!
//! ```yaml
//! storage_dir: /var/lib/tierstore
//! compression_level: 9
//! cache_max_size: 268435456
//! persistence_strategy: immediate
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default hot cache budget (100MB)
pub const DEFAULT_CACHE_MAX_SIZE: u64 = 100 * 1024 * 1024;

/// Default split trigger (50MB)
pub const DEFAULT_PARTITION_MAX_SIZE: u64 = 50 * 1024 * 1024;

/// Default size at which partitions go to the gzip archive (1MB)
pub const DEFAULT_COMPRESSION_THRESHOLD: u64 = 1024 * 1024;

/// Default size at which partitions are memory-mapped (10MB)
pub const DEFAULT_MEMORY_MAP_THRESHOLD: u64 = 10 * 1024 * 1024;

/// When partition metadata is written to `metrics.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceStrategy {
    /// After every store and remove
    Immediate,
    /// On every background tick and on shutdown
    #[default]
    Batched,
    /// Only on shutdown
    Lazy,
}

impl PersistenceStrategy {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            PersistenceStrategy::Immediate => "immediate",
            PersistenceStrategy::Batched => "batched",
            PersistenceStrategy::Lazy => "lazy",
        }
    }
}

impl std::fmt::Display for PersistenceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PersistenceStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "immediate" => Ok(PersistenceStrategy::Immediate),
            "batched" => Ok(PersistenceStrategy::Batched),
            "lazy" => Ok(PersistenceStrategy::Lazy),
            other => Err(Error::Config(format!(
                "unknown persistence strategy '{}' (expected immediate, batched or lazy)",
                other
            ))),
        }
    }
}

/// Partition store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding the tier subdirectories and `metrics.json`
    pub storage_dir: PathBuf,
    /// Gzip level (1 = fastest, 9 = smallest)
    pub compression_level: u32,
    /// Hot cache budget in bytes
    pub cache_max_size: u64,
    /// Partitions at or above this size are split
    pub partition_max_size: u64,
    /// Partitions at or above this size go to the compressed tier
    pub compression_threshold: u64,
    /// Partitions at or above this size go to the memory-mapped tier
    pub memory_map_threshold: u64,
    /// Background eviction + checkpoint interval
    pub cleanup_interval_ms: u64,
    /// When metadata snapshots are written
    pub persistence_strategy: PersistenceStrategy,
    /// How many generations of children a split may produce
    pub max_split_depth: u32,
    /// Record and verify a blake3 checksum for every durable write
    pub verify_checksums: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./data/partitions"),
            compression_level: 6,
            cache_max_size: DEFAULT_CACHE_MAX_SIZE,
            partition_max_size: DEFAULT_PARTITION_MAX_SIZE,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            memory_map_threshold: DEFAULT_MEMORY_MAP_THRESHOLD,
            cleanup_interval_ms: 60_000,
            persistence_strategy: PersistenceStrategy::Batched,
            max_split_depth: 2,
            verify_checksums: false,
        }
    }
}

impl StorageConfig {
    /// Default configuration rooted at `storage_dir`
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Default::default()
        }
    }

    /// Load from a YAML file. Missing fields take their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: StorageConfig = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and threshold ordering
    pub fn validate(&self) -> Result<()> {
        if !(1..=9).contains(&self.compression_level) {
            return Err(Error::Config(format!(
                "compression_level must be in 1..=9, got {}",
                self.compression_level
            )));
        }
        if self.cache_max_size == 0 {
            return Err(Error::Config("cache_max_size must be positive".into()));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(Error::Config("cleanup_interval_ms must be positive".into()));
        }
        if self.compression_threshold > self.memory_map_threshold {
            return Err(Error::Config(format!(
                "compression_threshold ({}) exceeds memory_map_threshold ({})",
                self.compression_threshold, self.memory_map_threshold
            )));
        }
        if self.storage_dir.as_os_str().is_empty() {
            return Err(Error::Config("storage_dir must not be empty".into()));
        }
        Ok(())
    }

    /// Background tick interval
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn compressed_dir(&self) -> PathBuf {
        self.storage_dir.join("compressed")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.storage_dir.join("cache")
    }

    pub fn mmap_dir(&self) -> PathBuf {
        self.storage_dir.join("mmap")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.storage_dir.join("metrics.json")
    }
}
