//! Tier Selection Policy
//!
//! Decides where a partition of a given serialized size is stored and
//! whether it is large enough to be split.
//!
//! ```text
//!   0 ──────── compression_threshold ──────── memory_map_threshold ────────▶ size
//!   │  DiskCache        │        Compressed          │     MemoryMapped
//! ```

use crate::config::StorageConfig;
use crate::domain::ports::StorageTier;

/// Size thresholds taken from [`StorageConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    pub compression_threshold: u64,
    pub memory_map_threshold: u64,
    pub partition_max_size: u64,
}

impl TierPolicy {
    /// Thresholds from a configuration
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            compression_threshold: config.compression_threshold,
            memory_map_threshold: config.memory_map_threshold,
            partition_max_size: config.partition_max_size,
        }
    }

    /// Durable tier for a partition of `size` bytes
    pub fn select_tier(&self, size: u64) -> StorageTier {
        if size >= self.memory_map_threshold {
            StorageTier::MemoryMapped
        } else if size >= self.compression_threshold {
            StorageTier::Compressed
        } else {
            StorageTier::DiskCache
        }
    }

    /// Whether a partition of `size` bytes triggers a split
    pub fn is_oversized(&self, size: u64) -> bool {
        size >= self.partition_max_size
    }
}

impl From<&StorageConfig> for TierPolicy {
    fn from(config: &StorageConfig) -> Self {
        Self::from_config(config)
    }
}
