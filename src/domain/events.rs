//! Storage Events
//!
//! Immutable records of things the partition store did. Collaborators (UI
//! layers, the owning graph component, telemetry) subscribe to them through
//! [`StorageEventListener`](super::ports::StorageEventListener); none are
//! needed for store/retrieve to work.
//!
//! # Example
//!
//! ```
//! use tierstore::domain::{StorageEvent, StorageTier};
//! use std::time::Duration;
//!
//! let event = StorageEvent::partition_stored("graph-7", 4096, StorageTier::DiskCache, Duration::from_millis(3));
//! assert_eq!(event.event_type(), "PartitionStored");
//! assert_eq!(event.partition_id(), Some("graph-7"));
//! ```

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ports::{RetrievalSource, StorageTier};

/// Event emitted by the partition store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageEvent {
    // =========================================================================
    // Lifecycle Events
    // =========================================================================
    /// The store finished initialization.
    StorageInitialized {
        storage_dir: String,
        partitions_loaded: usize,
        timestamp: DateTime<Utc>,
    },

    /// The store shut down.
    StorageShutdown {
        partitions: usize,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Partition Events
    // =========================================================================
    /// A partition was stored.
    PartitionStored {
        partition_id: String,
        size_bytes: u64,
        tier: StorageTier,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A partition was found.
    PartitionRetrieved {
        partition_id: String,
        cache_hit: bool,
        source: RetrievalSource,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// No tier holds the partition.
    PartitionNotFound {
        partition_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A partition was removed from every tier.
    PartitionRemoved {
        partition_id: String,
        existed: bool,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Tier Events
    // =========================================================================
    /// A partition was written to the compressed tier.
    PartitionCompressed {
        partition_id: String,
        original_size: u64,
        compressed_size: u64,
        compression_ratio: f64,
        timestamp: DateTime<Utc>,
    },

    /// A partition was written to and mapped from the memory-mapped tier.
    MemoryMappedCreated {
        partition_id: String,
        size_bytes: u64,
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// A partition was written to the disk-cache tier.
    DiskCacheStored {
        partition_id: String,
        size_bytes: u64,
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// An oversized partition produced children.
    PartitionSplit {
        parent_id: String,
        child_ids: Vec<String>,
        strategy: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Cache Events
    // =========================================================================
    /// A partition left the hot cache.
    PartitionEvicted {
        partition_id: String,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// An eviction pass finished.
    CacheCleanup {
        evicted_count: usize,
        evicted_bytes: u64,
        remaining_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Error Events
    // =========================================================================
    /// An operation failed.
    StorageError {
        operation: String,
        partition_id: Option<String>,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl StorageEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            StorageEvent::StorageInitialized { timestamp, .. } => *timestamp,
            StorageEvent::StorageShutdown { timestamp, .. } => *timestamp,
            StorageEvent::PartitionStored { timestamp, .. } => *timestamp,
            StorageEvent::PartitionRetrieved { timestamp, .. } => *timestamp,
            StorageEvent::PartitionNotFound { timestamp, .. } => *timestamp,
            StorageEvent::PartitionRemoved { timestamp, .. } => *timestamp,
            StorageEvent::PartitionCompressed { timestamp, .. } => *timestamp,
            StorageEvent::MemoryMappedCreated { timestamp, .. } => *timestamp,
            StorageEvent::DiskCacheStored { timestamp, .. } => *timestamp,
            StorageEvent::PartitionSplit { timestamp, .. } => *timestamp,
            StorageEvent::PartitionEvicted { timestamp, .. } => *timestamp,
            StorageEvent::CacheCleanup { timestamp, .. } => *timestamp,
            StorageEvent::StorageError { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            StorageEvent::StorageInitialized { .. } => "StorageInitialized",
            StorageEvent::StorageShutdown { .. } => "StorageShutdown",
            StorageEvent::PartitionStored { .. } => "PartitionStored",
            StorageEvent::PartitionRetrieved { .. } => "PartitionRetrieved",
            StorageEvent::PartitionNotFound { .. } => "PartitionNotFound",
            StorageEvent::PartitionRemoved { .. } => "PartitionRemoved",
            StorageEvent::PartitionCompressed { .. } => "PartitionCompressed",
            StorageEvent::MemoryMappedCreated { .. } => "MemoryMappedCreated",
            StorageEvent::DiskCacheStored { .. } => "DiskCacheStored",
            StorageEvent::PartitionSplit { .. } => "PartitionSplit",
            StorageEvent::PartitionEvicted { .. } => "PartitionEvicted",
            StorageEvent::CacheCleanup { .. } => "CacheCleanup",
            StorageEvent::StorageError { .. } => "StorageError",
        }
    }

    /// Get the partition ID if applicable.
    pub fn partition_id(&self) -> Option<&str> {
        match self {
            StorageEvent::PartitionStored { partition_id, .. } => Some(partition_id),
            StorageEvent::PartitionRetrieved { partition_id, .. } => Some(partition_id),
            StorageEvent::PartitionNotFound { partition_id, .. } => Some(partition_id),
            StorageEvent::PartitionRemoved { partition_id, .. } => Some(partition_id),
            StorageEvent::PartitionCompressed { partition_id, .. } => Some(partition_id),
            StorageEvent::MemoryMappedCreated { partition_id, .. } => Some(partition_id),
            StorageEvent::DiskCacheStored { partition_id, .. } => Some(partition_id),
            StorageEvent::PartitionSplit { parent_id, .. } => Some(parent_id),
            StorageEvent::PartitionEvicted { partition_id, .. } => Some(partition_id),
            StorageEvent::StorageError { partition_id, .. } => partition_id.as_deref(),
            _ => None,
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl StorageEvent {
    /// Create a StorageInitialized event.
    pub fn storage_initialized(storage_dir: &Path, partitions_loaded: usize) -> Self {
        StorageEvent::StorageInitialized {
            storage_dir: storage_dir.display().to_string(),
            partitions_loaded,
            timestamp: Utc::now(),
        }
    }

    /// Create a StorageShutdown event.
    pub fn storage_shutdown(partitions: usize) -> Self {
        StorageEvent::StorageShutdown {
            partitions,
            timestamp: Utc::now(),
        }
    }

    /// Create a PartitionStored event.
    pub fn partition_stored(
        partition_id: impl Into<String>,
        size_bytes: u64,
        tier: StorageTier,
        duration: Duration,
    ) -> Self {
        StorageEvent::PartitionStored {
            partition_id: partition_id.into(),
            size_bytes,
            tier,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    /// Create a PartitionRetrieved event.
    pub fn partition_retrieved(
        partition_id: impl Into<String>,
        source: RetrievalSource,
        duration: Duration,
    ) -> Self {
        StorageEvent::PartitionRetrieved {
            partition_id: partition_id.into(),
            cache_hit: source.is_cache_hit(),
            source,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    /// Create a PartitionNotFound event.
    pub fn partition_not_found(partition_id: impl Into<String>) -> Self {
        StorageEvent::PartitionNotFound {
            partition_id: partition_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a PartitionRemoved event.
    pub fn partition_removed(partition_id: impl Into<String>, existed: bool) -> Self {
        StorageEvent::PartitionRemoved {
            partition_id: partition_id.into(),
            existed,
            timestamp: Utc::now(),
        }
    }

    /// Create a PartitionCompressed event.
    pub fn partition_compressed(
        partition_id: impl Into<String>,
        original_size: u64,
        compressed_size: u64,
    ) -> Self {
        StorageEvent::PartitionCompressed {
            partition_id: partition_id.into(),
            original_size,
            compressed_size,
            compression_ratio: compression_ratio(original_size, compressed_size),
            timestamp: Utc::now(),
        }
    }

    /// Create a MemoryMappedCreated event.
    pub fn memory_mapped_created(
        partition_id: impl Into<String>,
        size_bytes: u64,
        path: &Path,
    ) -> Self {
        StorageEvent::MemoryMappedCreated {
            partition_id: partition_id.into(),
            size_bytes,
            path: path.display().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Create a DiskCacheStored event.
    pub fn disk_cache_stored(partition_id: impl Into<String>, size_bytes: u64, path: &Path) -> Self {
        StorageEvent::DiskCacheStored {
            partition_id: partition_id.into(),
            size_bytes,
            path: path.display().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Create a PartitionSplit event.
    pub fn partition_split(
        parent_id: impl Into<String>,
        child_ids: Vec<String>,
        strategy: impl Into<String>,
    ) -> Self {
        StorageEvent::PartitionSplit {
            parent_id: parent_id.into(),
            child_ids,
            strategy: strategy.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a PartitionEvicted event.
    pub fn partition_evicted(partition_id: impl Into<String>, size_bytes: u64) -> Self {
        StorageEvent::PartitionEvicted {
            partition_id: partition_id.into(),
            size_bytes,
            timestamp: Utc::now(),
        }
    }

    /// Create a CacheCleanup event.
    pub fn cache_cleanup(evicted_count: usize, evicted_bytes: u64, remaining_bytes: u64) -> Self {
        StorageEvent::CacheCleanup {
            evicted_count,
            evicted_bytes,
            remaining_bytes,
            timestamp: Utc::now(),
        }
    }

    /// Create a StorageError event.
    pub fn storage_error(
        operation: impl Into<String>,
        partition_id: Option<&str>,
        error: &crate::error::Error,
    ) -> Self {
        StorageEvent::StorageError {
            operation: operation.into(),
            partition_id: partition_id.map(str::to_string),
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// `original / compressed`, or 1.0 for an empty archive.
pub(crate) fn compression_ratio(original_size: u64, compressed_size: u64) -> f64 {
    if compressed_size == 0 {
        1.0
    } else {
        original_size as f64 / compressed_size as f64
    }
}

// =============================================================================
// Tests
// =============================================================================
