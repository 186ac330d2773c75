//! Eviction Controller
//!
//! Keeps the hot cache within `cache_max_size`. Only the in-memory overlay is
//! trimmed; durable tier files are never touched.
//!
//! Victims are taken least recently accessed first, ordered by
//! `(last_accessed, access_tick)`, until the evicted bytes cover the excess.

use chrono::{DateTime, Utc};

use super::hot::HotCache;
use super::metrics::MetricsTracker;

/// One resident partition considered for eviction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub id: String,
    pub size: u64,
    pub last_accessed: DateTime<Utc>,
    pub access_tick: u64,
}

/// Result of one eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// `(id, size)` in eviction order
    pub evicted: Vec<(String, u64)>,
    pub evicted_bytes: u64,
    /// Footprint left in the hot cache
    pub remaining_bytes: u64,
}

impl EvictionReport {
    pub fn evicted_count(&self) -> usize {
        self.evicted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }
}

/// LRU trimming of the hot cache against a byte budget
#[derive(Debug, Clone, Copy)]
pub struct EvictionController {
    max_bytes: u64,
}

impl EvictionController {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// Budget in bytes
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Pick victims from `candidates` so that the remaining footprint fits
    /// the budget. Returns an empty list when already within budget.
    pub fn select_victims(&self, mut candidates: Vec<EvictionCandidate>) -> Vec<EvictionCandidate> {
        let footprint: u64 = candidates.iter().map(|c| c.size).sum();
        if footprint <= self.max_bytes {
            return Vec::new();
        }
        let excess = footprint - self.max_bytes;

        candidates.sort_by(|a, b| {
            (a.last_accessed, a.access_tick, &a.id).cmp(&(b.last_accessed, b.access_tick, &b.id))
        });

        let mut freed = 0u64;
        candidates
            .into_iter()
            .take_while(|c| {
                let take = freed < excess;
                if take {
                    freed += c.size;
                }
                take
            })
            .collect()
    }

    /// Run one pass over `cache`, using `tracker` for recency.
    ///
    /// Partitions without metrics sort first.
    pub fn enforce<T>(&self, cache: &HotCache<T>, tracker: &MetricsTracker) -> EvictionReport {
        let candidates: Vec<EvictionCandidate> = cache
            .resident()
            .into_iter()
            .map(|(id, size)| {
                let (last_accessed, access_tick) = tracker
                    .recency(&id)
                    .unwrap_or((DateTime::<Utc>::MIN_UTC, 0));
                EvictionCandidate {
                    id,
                    size,
                    last_accessed,
                    access_tick,
                }
            })
            .collect();

        let mut report = EvictionReport::default();
        for victim in self.select_victims(candidates) {
            if let Some(entry) = cache.remove(&victim.id) {
                report.evicted_bytes += entry.size;
                report.evicted.push((victim.id, entry.size));
            }
        }
        report.remaining_bytes = cache.total_bytes();
        report
    }
}
