//! Infrastructure Adapters
//!
//! Implementations of the domain ports and exporters for the storage engine,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │          StorageEventListener │ SplitStrategy<T>            │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ EventBus │ LoggingEventListener │ ChannelEventListener      │ │
//! │  │ InMemoryEventCollector │ StatsExporter (Prometheus)         │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tierstore::adapters::{LoggingEventListener, StatsExporter};
//! use tierstore::{PartitionStore, StorageConfig};
//!
//! # async fn example() -> tierstore::Result<()> {
//! let store: PartitionStore<serde_json::Value> = PartitionStore::new(StorageConfig::default())?;
//! store.subscribe(Arc::new(LoggingEventListener::info_level()));
//! store.initialize().await?;
//!
//! let exporter = StatsExporter::new()?;
//! exporter.update(&store.storage_stats());
//! println!("{}", exporter.render()?);
//! # Ok(())
//! # }
//! ```

pub mod event_publisher;
pub mod prometheus;

pub use event_publisher::{
    ChannelEventListener, EventBus, InMemoryEventCollector, ListenerId, LoggingEventListener,
};
pub use self::prometheus::StatsExporter;
