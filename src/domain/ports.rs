//! Domain Ports (Port/Adapter Pattern)
//!
//! Core abstractions the partition store depends on. Adapters in
//! [`crate::adapters`] and callers supply the implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │      StorageEventListener │ SplitStrategy<T>         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  LoggingEventListener │ InMemoryEventCollector │ ... │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::events::StorageEvent;

// =============================================================================
// Value Objects
// =============================================================================

/// Durable tier backing a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageTier {
    /// Plain file under `cache/`
    DiskCache,
    /// Gzip archive under `compressed/`
    Compressed,
    /// Memory-mapped file under `mmap/`
    MemoryMapped,
}

impl StorageTier {
    /// Every durable tier in retrieval probe order.
    pub const PROBE_ORDER: [StorageTier; 3] = [
        StorageTier::MemoryMapped,
        StorageTier::DiskCache,
        StorageTier::Compressed,
    ];

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            StorageTier::DiskCache => "disk_cache",
            StorageTier::Compressed => "compressed",
            StorageTier::MemoryMapped => "memory_mapped",
        }
    }
}

impl std::fmt::Display for StorageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where a retrieved partition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    /// In-process hot cache
    HotCache,
    /// One of the durable tiers
    Tier(StorageTier),
}

impl RetrievalSource {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            RetrievalSource::HotCache => "hot_cache",
            RetrievalSource::Tier(tier) => tier.name(),
        }
    }

    /// True when served from the hot cache
    pub fn is_cache_hit(&self) -> bool {
        matches!(self, RetrievalSource::HotCache)
    }
}

impl From<StorageTier> for RetrievalSource {
    fn from(tier: StorageTier) -> Self {
        RetrievalSource::Tier(tier)
    }
}

impl std::fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Bounds every partition payload type satisfies.
///
/// Payloads round-trip through `serde_json`; the store never looks inside.
pub trait PartitionPayload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> PartitionPayload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

// =============================================================================
// Event Listener Port
// =============================================================================

/// Observer for storage lifecycle events.
///
/// Events are delivered synchronously on the thread or task that emitted
/// them, in emission order. Implementations must be cheap; anything slow
/// belongs behind a channel (see `ChannelEventListener`).
pub trait StorageEventListener: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &StorageEvent);
}

impl<F> StorageEventListener for F
where
    F: Fn(&StorageEvent) + Send + Sync,
{
    fn on_event(&self, event: &StorageEvent) {
        self(event)
    }
}

// =============================================================================
// Split Strategy Port
// =============================================================================

/// Content splitting for oversized partitions.
///
/// The store knows only sizes; the owning domain decides how a payload is
/// divided. Returned children are stored under `<parent>_split_<i>`.
pub trait SplitStrategy<T>: Send + Sync {
    /// Strategy name reported in `PartitionSplit` events.
    fn name(&self) -> &str;

    /// Produce child payloads for `payload`. Fewer than two children means
    /// the payload could not be divided and no split happens.
    fn split(&self, parent_id: &str, payload: &T) -> Result<Vec<T>>;
}
