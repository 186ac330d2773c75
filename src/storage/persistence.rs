//! Persistence Manager
//!
//! Snapshots of every partition's metadata in `metrics.json`. Payloads are
//! already durable in their tier files; only the metadata needs saving.
//!
//! ```json
//! { "version": 1, "saved_at": "2024-01-01T00:00:00Z", "partitions": [ ... ] }
//! ```
//!
//! Snapshots are taken and written (temp file + fsync + rename) under one
//! save lock, so an older snapshot can never overwrite a newer one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::disk::write_atomic;
use super::entry::PartitionMetrics;
use crate::config::PersistenceStrategy;
use crate::error::{Error, Result};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// On-disk metadata snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub partitions: Vec<PartitionMetrics>,
}

impl MetricsSnapshot {
    /// Snapshot of `partitions` taken now
    pub fn new(partitions: Vec<PartitionMetrics>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            partitions,
        }
    }

    /// Serialize snapshot to bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Internal(format!("Failed to serialize metrics snapshot: {}", e)))
    }

    /// Deserialize snapshot from bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let snapshot: Self = serde_json::from_slice(data)
            .map_err(|e| Error::Internal(format!("Failed to deserialize metrics snapshot: {}", e)))?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(Error::Internal(format!(
                "Unsupported metrics snapshot version {} (newest known {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }
}

/// Loads and saves metadata snapshots according to the persistence strategy
#[derive(Debug)]
pub struct PersistenceManager {
    path: PathBuf,
    strategy: PersistenceStrategy,
    /// Metadata changed since the last save
    dirty: AtomicBool,
    saves: AtomicU64,
    save_lock: Mutex<()>,
}

impl PersistenceManager {
    pub fn new(path: impl Into<PathBuf>, strategy: PersistenceStrategy) -> Self {
        Self {
            path: path.into(),
            strategy,
            dirty: AtomicBool::new(false),
            saves: AtomicU64::new(0),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn strategy(&self) -> PersistenceStrategy {
        self.strategy
    }

    /// Load the snapshot. `Ok(None)` when no snapshot exists yet.
    pub async fn load(&self) -> Result<Option<MetricsSnapshot>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        let snapshot = MetricsSnapshot::deserialize(&data)?;
        debug!(
            path = %self.path.display(),
            partitions = snapshot.partitions.len(),
            saved_at = %snapshot.saved_at,
            "Loaded metrics snapshot"
        );
        Ok(Some(snapshot))
    }

    /// Write the metadata returned by `snapshot`. Returns the number saved.
    ///
    /// `snapshot` runs under the save lock, after the dirty flag is cleared.
    pub async fn save<F>(&self, snapshot: F) -> Result<usize>
    where
        F: FnOnce() -> Vec<PartitionMetrics>,
    {
        let _guard = self.save_lock.lock().await;
        // Cleared before the snapshot so changes made after it stay dirty
        self.dirty.store(false, Ordering::Release);
        let partitions = snapshot();

        let count = partitions.len();
        let bytes = MetricsSnapshot::new(partitions).serialize()?;
        if let Err(e) = write_atomic(&self.path, &bytes).await {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }

        self.saves.fetch_add(1, Ordering::Relaxed);
        debug!(path = %self.path.display(), partitions = count, "Saved metrics snapshot");
        Ok(count)
    }

    /// Record a metadata change
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Number of successful saves
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Whether each store/remove saves right away
    pub fn saves_on_write(&self) -> bool {
        self.strategy == PersistenceStrategy::Immediate
    }

    /// Whether a background tick should save now
    pub fn saves_on_tick(&self) -> bool {
        self.strategy == PersistenceStrategy::Batched && self.is_dirty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    fn manager(dir: &Path, strategy: PersistenceStrategy) -> PersistenceManager {
        PersistenceManager::new(dir.join("metrics.json"), strategy)
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), PersistenceStrategy::Batched);
        assert!(manager.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), PersistenceStrategy::Batched);

        let mut compressed = PartitionMetrics::new("b", 2048);
        compressed.mark_compressed(512);
        let saved = manager
            .save(|| vec![PartitionMetrics::new("a", 10), compressed.clone()])
            .await
            .unwrap();
        assert_eq!(saved, 2);
        assert_eq!(manager.save_count(), 1);

        let snapshot = manager.load().await.unwrap().unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.partitions.len(), 2);
        assert_eq!(snapshot.partitions[1], compressed);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), PersistenceStrategy::Batched);
        std::fs::write(manager.path(), b"{ not json").unwrap();

        assert_matches!(manager.load().await, Err(Error::Internal(_)));
    }

    #[test]
    fn test_future_version_rejected() {
        let raw = br#"{"version": 99, "saved_at": "2024-01-01T00:00:00Z", "partitions": []}"#;
        assert_matches!(MetricsSnapshot::deserialize(raw), Err(Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_dirty_tracking_by_strategy() {
        let tmp = tempfile::tempdir().unwrap();

        let batched = manager(tmp.path(), PersistenceStrategy::Batched);
        assert!(!batched.saves_on_tick());
        batched.mark_dirty();
        assert!(batched.saves_on_tick());
        batched.save(Vec::new).await.unwrap();
        assert!(!batched.is_dirty());
        assert!(!batched.saves_on_write());

        let lazy = manager(tmp.path(), PersistenceStrategy::Lazy);
        lazy.mark_dirty();
        assert!(!lazy.saves_on_tick());

        let immediate = manager(tmp.path(), PersistenceStrategy::Immediate);
        assert!(immediate.saves_on_write());
    }

    #[tokio::test]
    async fn test_failed_save_stays_dirty() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(
            tmp.path().join("missing-dir").join("metrics.json"),
            PersistenceStrategy::Batched,
        );
        manager.mark_dirty();

        assert_matches!(manager.save(Vec::new).await, Err(Error::Io { .. }));
        assert!(manager.is_dirty());
    }

    #[tokio::test]
    async fn test_snapshot_taken_after_waiting_for_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = Arc::new(manager(tmp.path(), PersistenceStrategy::Immediate));
        let partitions = Arc::new(parking_lot::Mutex::new(vec![PartitionMetrics::new("a", 1)]));

        // An earlier save is still writing
        let guard = manager.save_lock.lock().await;
        let save = tokio::spawn({
            let manager = Arc::clone(&manager);
            let partitions = Arc::clone(&partitions);
            async move { manager.save(|| partitions.lock().clone()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Changed while the second save waits for the lock
        partitions.lock().push(PartitionMetrics::new("b", 2));
        drop(guard);

        assert_eq!(save.await.unwrap().unwrap(), 2);
        let snapshot = manager.load().await.unwrap().unwrap();
        let ids: Vec<_> = snapshot.partitions.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_change_after_snapshot_stays_dirty() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), PersistenceStrategy::Batched);
        manager.mark_dirty();

        manager
            .save(|| {
                let partitions = vec![PartitionMetrics::new("a", 1)];
                // A store landing right after the snapshot
                manager.mark_dirty();
                partitions
            })
            .await
            .unwrap();

        assert!(manager.is_dirty());
        assert!(manager.saves_on_tick());
    }
}
