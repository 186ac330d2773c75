//! Metrics & Access-Stats Tracker
//!
//! Per-partition metadata ([`PartitionMetrics`]) and hit/miss counters
//! ([`AccessStats`]), plus the aggregate [`StorageStats`] view.
//!
//! A logical clock stamps every write and access so that eviction can order
//! partitions touched within the same timestamp resolution.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::entry::{AccessStats, PartitionMetrics};
use crate::domain::ports::{RetrievalSource, StorageTier};

/// Aggregate statistics over every known partition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_partitions: usize,
    /// Sum of serialized sizes
    pub total_size: u64,
    pub compressed_partitions: usize,
    /// Sum of archive sizes
    pub compressed_size: u64,
    /// `hits / (hits + misses)` over all access stats
    pub cache_hit_rate: f64,
    /// Mean ratio over compressed partitions, 0.0 when there are none
    pub average_compression_ratio: f64,
    pub memory_mapped_partitions: usize,
    pub disk_cached_partitions: usize,
    pub hot_cache_entries: usize,
    pub hot_cache_bytes: u64,
}

/// Metadata registry for one store
#[derive(Debug, Default)]
pub struct MetricsTracker {
    metrics: DashMap<String, PartitionMetrics>,
    stats: DashMap<String, AccessStats>,
    clock: AtomicU64,
}

impl MetricsTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a store of `size` bytes, creating metrics on first write.
    pub fn record_write(&self, id: &str, size: u64) -> PartitionMetrics {
        let tick = self.tick();
        let mut entry = self
            .metrics
            .entry(id.to_string())
            .or_insert_with(|| PartitionMetrics::new(id, size));
        entry.record_write(size, tick);
        entry.clone()
    }

    /// Point the tier flags at `tier`
    pub fn set_tier(&self, id: &str, tier: StorageTier) {
        if let Some(mut m) = self.metrics.get_mut(id) {
            m.set_tier(Some(tier));
        }
    }

    /// Clear the tier flags while a write to a new tier is pending
    pub fn clear_tier(&self, id: &str) {
        if let Some(mut m) = self.metrics.get_mut(id) {
            m.set_tier(None);
        }
    }

    /// Record a finished compression of `original_size` bytes.
    ///
    /// Ignored when the partition has been re-stored with a different size
    /// or moved off the compressed tier since. Returns whether it applied.
    pub fn mark_compressed(&self, id: &str, original_size: u64, compressed_size: u64) -> bool {
        match self.metrics.get_mut(id) {
            Some(mut m)
                if m.size == original_size
                    && matches!(m.tier(), None | Some(StorageTier::Compressed)) =>
            {
                m.mark_compressed(compressed_size);
                true
            }
            _ => false,
        }
    }

    pub fn set_checksum(&self, id: &str, checksum: Option<String>) {
        if let Some(mut m) = self.metrics.get_mut(id) {
            m.checksum = checksum;
        }
    }

    /// Recorded checksum for `id`, if any
    pub fn checksum(&self, id: &str) -> Option<String> {
        self.metrics.get(id).and_then(|m| m.checksum.clone())
    }

    /// Record a retrieval served from `source`
    pub fn record_hit(&self, id: &str, source: RetrievalSource) {
        let tick = self.tick();
        if let Some(mut m) = self.metrics.get_mut(id) {
            m.record_access(tick);
        }
        self.stats
            .entry(id.to_string())
            .or_default()
            .record_hit(source);
    }

    /// Record a retrieval that found nothing
    pub fn record_miss(&self, id: &str) {
        self.stats.entry(id.to_string()).or_default().record_miss();
    }

    /// Metrics for `id`
    pub fn get(&self, id: &str) -> Option<PartitionMetrics> {
        self.metrics.get(id).map(|m| m.clone())
    }

    /// Access stats for `id`
    pub fn access_stats(&self, id: &str) -> Option<AccessStats> {
        self.stats.get(id).map(|s| s.clone())
    }

    /// `(last_accessed, access_tick)` for eviction ordering
    pub fn recency(&self, id: &str) -> Option<(DateTime<Utc>, u64)> {
        self.metrics
            .get(id)
            .map(|m| (m.last_accessed, m.access_tick))
    }

    /// Drop metrics and stats. Returns the removed metrics.
    pub fn remove(&self, id: &str) -> Option<PartitionMetrics> {
        self.stats.remove(id);
        self.metrics.remove(id).map(|(_, m)| m)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.metrics.contains_key(id)
    }

    /// Number of known partitions
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Sorted partition ids
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.metrics.iter().map(|m| m.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Copy of every partition's metrics, sorted by id
    pub fn snapshot(&self) -> Vec<PartitionMetrics> {
        let mut all: Vec<PartitionMetrics> = self.metrics.iter().map(|m| m.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Replace all metrics with a loaded snapshot. Access stats start empty.
    pub fn restore(&self, partitions: Vec<PartitionMetrics>) {
        self.metrics.clear();
        self.stats.clear();

        let max_tick = partitions.iter().map(|m| m.access_tick).max().unwrap_or(0);
        self.clock.fetch_max(max_tick, Ordering::Relaxed);
        for m in partitions {
            self.metrics.insert(m.id.clone(), m);
        }
    }

    /// Aggregate hit rate over every access-stats entry
    pub fn hit_rate(&self) -> f64 {
        let (hits, misses) = self
            .stats
            .iter()
            .fold((0u64, 0u64), |(h, m), s| (h + s.hits, m + s.misses));
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Aggregate statistics; hot-cache figures are supplied by the caller
    pub fn storage_stats(&self, hot_cache_entries: usize, hot_cache_bytes: u64) -> StorageStats {
        let mut stats = StorageStats {
            hot_cache_entries,
            hot_cache_bytes,
            cache_hit_rate: self.hit_rate(),
            ..Default::default()
        };

        let mut ratio_sum = 0.0;
        let mut ratio_count = 0usize;
        for m in self.metrics.iter() {
            stats.total_partitions += 1;
            stats.total_size += m.size;
            if m.is_compressed {
                stats.compressed_partitions += 1;
                stats.compressed_size += m.compressed_size.unwrap_or(0);
                if let Some(ratio) = m.compression_ratio {
                    ratio_sum += ratio;
                    ratio_count += 1;
                }
            }
            if m.is_memory_mapped {
                stats.memory_mapped_partitions += 1;
            }
            if m.is_disk_cached {
                stats.disk_cached_partitions += 1;
            }
        }
        if ratio_count > 0 {
            stats.average_compression_ratio = ratio_sum / ratio_count as f64;
        }

        stats
    }
}
