//! Tiered Partition Storage
//!
//! Partitions are serialized once and placed in one durable tier chosen by
//! size, with an in-process hot cache layered on top.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         Partition Store                                   │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                     Hot Cache (Arc<T>, LRU-trimmed)                       │
//! │                                  │                                        │
//! │                          Tier Selector (size)                             │
//! │        ┌─────────────────────────┼─────────────────────────┐              │
//! │  ┌─────┴──────────┐   ┌──────────┴─────────┐   ┌───────────┴────────┐     │
//! │  │ Disk Cache     │   │ Compressed (gzip)  │   │ Memory-Mapped      │     │
//! │  │ cache/<id>.json│   │ compressed/<id>.gz │   │ mmap/<id>.mmap     │     │
//! │  │ < 1MB          │   │ 1MB .. 10MB        │   │ >= 10MB            │     │
//! │  └────────────────┘   └────────────────────┘   └────────────────────┘     │
//! │                                                                          │
//! │  Splitter (>= 50MB)   Metrics + metrics.json   Background Scheduler      │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Retrieval probes the hot cache, then memory-mapped, disk-cache and
//! compressed files in that order.

pub mod compression;
pub mod disk;
pub mod entry;
pub mod eviction;
pub mod hot;
pub mod metrics;
pub mod mmap;
pub mod persistence;
pub mod policy;
pub mod scheduler;
pub mod splitter;
pub mod store;

pub use compression::{CompressionEngine, Compressor, GzipCompressor};
pub use disk::DiskCacheManager;
pub use entry::{AccessStats, PartitionMetrics};
pub use eviction::{EvictionController, EvictionReport};
pub use hot::HotCache;
pub use metrics::{MetricsTracker, StorageStats};
pub use mmap::{MappedPartition, MemoryMapManager};
pub use persistence::{MetricsSnapshot, PersistenceManager};
pub use policy::TierPolicy;
pub use scheduler::{BackgroundScheduler, MaintenanceTask};
pub use splitter::{DuplicateSplit, FnSplit, JsonArraySplit, PartitionSplitter};
pub use store::PartitionStore;
