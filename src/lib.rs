//! tierstore - Tiered Partition Storage Engine
//!
//! Stores partitioned, variable-size payloads (for example the pieces of a
//! large in-memory graph) and places each partition in a storage tier
//! chosen by its size, behind a bounded in-process hot cache.
//!
//! # Architecture
//!
//! ```text
//! store(id, T) → serialize → metrics → hot cache → tier write → split? → evict
//! retrieve(id) → hot cache → mmap → disk cache → compressed → hot cache
//! ```
//!
//! A background scheduler trims the hot cache and checkpoints metadata
//! independently of client calls.
//!
//! # Modules
//!
//! - [`adapters`] - Event listeners and the Prometheus stats exporter
//! - [`config`] - Store configuration
//! - [`domain`] - Events, tier types and port traits
//! - [`error`] - Error types
//! - [`storage`] - Partition store and its tiers

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod storage;

// Re-export commonly used types
pub use adapters::{ChannelEventListener, InMemoryEventCollector, ListenerId, LoggingEventListener};
pub use config::{PersistenceStrategy, StorageConfig};
pub use domain::{
    PartitionPayload, RetrievalSource, SplitStrategy, StorageEvent, StorageEventListener,
    StorageTier,
};
pub use error::{Error, Result};
pub use storage::{
    AccessStats, DuplicateSplit, EvictionReport, FnSplit, JsonArraySplit, PartitionMetrics,
    PartitionStore, StorageStats,
};
