//! Partition Metadata Types
//!
//! Per-partition bookkeeping: size, compression and tier placement
//! ([`PartitionMetrics`], persisted) and hit/miss counters ([`AccessStats`],
//! in-memory only).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::events::compression_ratio;
use crate::domain::ports::{RetrievalSource, StorageTier};

/// Size, timing and tier placement of one partition.
///
/// At most one tier flag is set at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMetrics {
    /// Partition identifier
    pub id: String,
    /// Serialized size in bytes
    pub size: u64,
    /// Size of the gzip archive, when compressed
    pub compressed_size: Option<u64>,
    /// Last store or retrieval
    pub last_accessed: DateTime<Utc>,
    /// Last store
    pub last_modified: DateTime<Utc>,
    /// Stores + retrievals
    pub access_count: u64,
    /// `size / compressed_size`
    pub compression_ratio: Option<f64>,
    pub is_memory_mapped: bool,
    pub is_disk_cached: bool,
    pub is_compressed: bool,
    /// Logical clock value of the last access; orders equal timestamps
    #[serde(default)]
    pub access_tick: u64,
    /// blake3 hex digest of the serialized bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl PartitionMetrics {
    /// Metrics for a partition that has just been created.
    pub fn new(id: impl Into<String>, size: u64) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            size,
            compressed_size: None,
            last_accessed: now,
            last_modified: now,
            access_count: 0,
            compression_ratio: None,
            is_memory_mapped: false,
            is_disk_cached: false,
            is_compressed: false,
            access_tick: 0,
            checksum: None,
        }
    }

    /// Record a store of `size` bytes.
    pub fn record_write(&mut self, size: u64, tick: u64) {
        let now = Utc::now();
        self.size = size;
        self.last_modified = now;
        self.last_accessed = now;
        self.access_count += 1;
        self.access_tick = tick;
    }

    /// Record a retrieval.
    pub fn record_access(&mut self, tick: u64) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
        self.access_tick = tick;
    }

    /// Durable tier currently backing the partition, if any.
    pub fn tier(&self) -> Option<StorageTier> {
        if self.is_memory_mapped {
            Some(StorageTier::MemoryMapped)
        } else if self.is_compressed {
            Some(StorageTier::Compressed)
        } else if self.is_disk_cached {
            Some(StorageTier::DiskCache)
        } else {
            None
        }
    }

    /// Point the tier flags at `tier` (or at nothing).
    ///
    /// Compression fields are cleared when leaving the compressed tier.
    pub fn set_tier(&mut self, tier: Option<StorageTier>) {
        self.is_memory_mapped = tier == Some(StorageTier::MemoryMapped);
        self.is_disk_cached = tier == Some(StorageTier::DiskCache);
        self.is_compressed = tier == Some(StorageTier::Compressed);
        if !self.is_compressed {
            self.compressed_size = None;
            self.compression_ratio = None;
        }
    }

    /// Mark the partition as archived at `compressed_size` bytes.
    pub fn mark_compressed(&mut self, compressed_size: u64) {
        self.set_tier(Some(StorageTier::Compressed));
        self.compressed_size = Some(compressed_size);
        self.compression_ratio = Some(compression_ratio(self.size, compressed_size));
    }
}

/// Hit/miss counters for one partition id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessStats {
    pub hits: u64,
    pub misses: u64,
    /// Where the most recent hit was served from
    pub last_source: Option<RetrievalSource>,
    pub last_access: Option<DateTime<Utc>>,
}

impl AccessStats {
    /// Record a hit served from `source`.
    pub fn record_hit(&mut self, source: RetrievalSource) {
        self.hits += 1;
        self.last_source = Some(source);
        self.last_access = Some(Utc::now());
    }

    /// Record a miss.
    pub fn record_miss(&mut self) {
        self.misses += 1;
        self.last_access = Some(Utc::now());
    }

    /// `hits / (hits + misses)`, 0.0 when never accessed.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
