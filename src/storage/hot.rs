//! Hot Cache - In-Process Partition Overlay
//!
//! Deserialized partitions kept in memory regardless of their durable tier.
//! The cache itself never evicts; the eviction controller trims it against
//! the configured budget.
//!
//! # Design
//!
//! - `DashMap` shards the table so lookups for different ids do not contend
//! - Values are shared as `Arc<T>`; a retrieval never clones the payload
//! - Each entry remembers the serialized size it was charged at

use std::sync::Arc;

use dashmap::DashMap;

/// One resident partition
#[derive(Debug)]
pub struct HotEntry<T> {
    pub value: Arc<T>,
    /// Serialized size in bytes
    pub size: u64,
}

impl<T> Clone for HotEntry<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            size: self.size,
        }
    }
}

/// In-memory overlay of recently used partitions
#[derive(Debug)]
pub struct HotCache<T> {
    entries: DashMap<String, HotEntry<T>>,
}

impl<T> Default for HotCache<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<T> HotCache<T> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a resident partition
    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.entries.get(id).map(|e| Arc::clone(&e.value))
    }

    /// Insert or replace a partition. Returns the size of the replaced entry.
    pub fn insert(&self, id: impl Into<String>, value: Arc<T>, size: u64) -> Option<u64> {
        self.entries
            .insert(id.into(), HotEntry { value, size })
            .map(|old| old.size)
    }

    /// Drop a partition from the cache
    pub fn remove(&self, id: &str) -> Option<HotEntry<T>> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of resident partitions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the charged sizes of all resident partitions
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// `(id, size)` of every resident partition
    pub fn resident(&self) -> Vec<(String, u64)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.size))
            .collect()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
    }
}
