//! Domain Layer
//!
//! Value objects, events and port traits shared by the storage engine and
//! its adapters.
//!
//! - **Ports** (`ports.rs`) - listener and split-strategy traits, tier enums
//! - **Events** (`events.rs`) - storage lifecycle events

pub mod events;
pub mod ports;

// Re-export commonly used types
pub use events::StorageEvent;
pub use ports::{
    PartitionPayload, RetrievalSource, SplitStrategy, StorageEventListener, StorageTier,
};
