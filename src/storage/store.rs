//! Partition Store - Tiered Storage Façade
//!
//! Entry point for callers. Coordinates the hot cache, the three durable
//! tiers, splitting, eviction, metadata persistence and the background
//! scheduler, and reports what it does as [`StorageEvent`]s.
//!
//! # Example
//!
//! ```no_run
//! use tierstore::{PartitionStore, StorageConfig};
//!
//! # async fn example() -> tierstore::Result<()> {
//! let store: PartitionStore<serde_json::Value> =
//!     PartitionStore::new(StorageConfig::new("/var/lib/tierstore"))?;
//! store.initialize().await?;
//!
//! store.store("graph-1", serde_json::json!({"nodes": [1, 2, 3]})).await?;
//! let value = store.retrieve("graph-1").await?;
//! assert!(value.is_some());
//!
//! store.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::compression::CompressionEngine;
use super::disk::{remove_if_exists, write_atomic, DiskCacheManager};
use super::entry::{AccessStats, PartitionMetrics};
use super::eviction::{EvictionController, EvictionReport};
use super::hot::HotCache;
use super::metrics::{MetricsTracker, StorageStats};
use super::mmap::MemoryMapManager;
use super::persistence::PersistenceManager;
use super::policy::TierPolicy;
use super::scheduler::{BackgroundScheduler, MaintenanceTask};
use super::splitter::{DuplicateSplit, PartitionSplitter, SplitLineage};
use crate::adapters::event_publisher::{EventBus, ListenerId};
use crate::config::StorageConfig;
use crate::domain::events::StorageEvent;
use crate::domain::ports::{
    PartitionPayload, RetrievalSource, SplitStrategy, StorageEventListener, StorageTier,
};
use crate::error::{Error, Result};

/// File extension of the disk-cache tier
pub const DISK_CACHE_EXTENSION: &str = "json";

/// File extension of the compressed tier
pub const COMPRESSED_EXTENSION: &str = "gz";

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Tier write prepared under the write-order lock
enum TierWrite {
    Mapped(Bytes),
    Disk(Bytes),
    /// Payload this call must compress, or `None` when it was parked on a running job
    Compress(Option<Bytes>),
}

impl TierWrite {
    fn tier(&self) -> StorageTier {
        match self {
            TierWrite::Mapped(_) => StorageTier::MemoryMapped,
            TierWrite::Disk(_) => StorageTier::DiskCache,
            TierWrite::Compress(_) => StorageTier::Compressed,
        }
    }
}

/// Tiered partition store.
///
/// Cheap to clone; clones share one engine.
pub struct PartitionStore<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for PartitionStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct StoreInner<T> {
    config: StorageConfig,
    policy: TierPolicy,
    state: AtomicU8,
    hot: HotCache<T>,
    metrics: MetricsTracker,
    compression: CompressionEngine,
    disk: DiskCacheManager,
    archive: DiskCacheManager,
    mmap: MemoryMapManager,
    eviction: EvictionController,
    splitter: RwLock<PartitionSplitter<T>>,
    pending_splits: Mutex<Vec<JoinHandle<()>>>,
    compression_jobs: Mutex<Vec<JoinHandle<()>>>,
    /// Orders metadata updates with compression slot claims and hot-cache refills
    write_order: Mutex<()>,
    persistence: PersistenceManager,
    scheduler: BackgroundScheduler,
    events: EventBus,
}

impl<T: PartitionPayload> PartitionStore<T> {
    /// Create a store. Nothing touches the disk until [`initialize`](Self::initialize).
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;

        let splitter = PartitionSplitter::new(
            Arc::new(DuplicateSplit::default()) as Arc<dyn SplitStrategy<T>>,
            config.max_split_depth,
        );

        let inner = StoreInner {
            policy: TierPolicy::from_config(&config),
            state: AtomicU8::new(STATE_CREATED),
            hot: HotCache::new(),
            metrics: MetricsTracker::new(),
            compression: CompressionEngine::new(config.compression_level),
            disk: DiskCacheManager::new(config.cache_dir(), DISK_CACHE_EXTENSION),
            archive: DiskCacheManager::new(config.compressed_dir(), COMPRESSED_EXTENSION),
            mmap: MemoryMapManager::new(config.mmap_dir()),
            eviction: EvictionController::new(config.cache_max_size),
            splitter: RwLock::new(splitter),
            pending_splits: Mutex::new(Vec::new()),
            compression_jobs: Mutex::new(Vec::new()),
            write_order: Mutex::new(()),
            persistence: PersistenceManager::new(config.metrics_path(), config.persistence_strategy),
            scheduler: BackgroundScheduler::new(config.cleanup_interval()),
            events: EventBus::new(),
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Replace the split strategy (default: [`DuplicateSplit`])
    pub fn with_split_strategy<S>(self, strategy: S) -> Self
    where
        S: SplitStrategy<T> + 'static,
    {
        self.set_split_strategy(Arc::new(strategy));
        self
    }

    /// Replace the split strategy on a shared store
    pub fn set_split_strategy(&self, strategy: Arc<dyn SplitStrategy<T>>) {
        *self.inner.splitter.write() =
            PartitionSplitter::new(strategy, self.inner.config.max_split_depth);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create the tier directories, load metadata and start the scheduler.
    ///
    /// Calling it on a running store is a no-op. A store that was shut down
    /// can be initialized again; its hot cache starts cold.
    #[instrument(skip(self), fields(storage_dir = %self.inner.config.storage_dir.display()))]
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.state.load(Ordering::Acquire) == STATE_RUNNING {
            return Ok(());
        }

        inner.prepare_directories().await?;

        let loaded = match inner.persistence.load().await {
            Ok(Some(snapshot)) => snapshot.partitions,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(
                    path = %inner.persistence.path().display(),
                    error = %e,
                    "Discarding unreadable metrics snapshot"
                );
                inner
                    .events
                    .emit(StorageEvent::storage_error("load_metadata", None, &e));
                Vec::new()
            }
        };
        let partitions_loaded = loaded.len();
        inner.metrics.restore(loaded);
        inner.hot.clear();
        inner.mmap.release_all();

        inner.state.store(STATE_RUNNING, Ordering::Release);

        let maintenance: Weak<dyn MaintenanceTask> = {
            let strong: Arc<dyn MaintenanceTask> = Arc::clone(inner) as Arc<dyn MaintenanceTask>;
            Arc::downgrade(&strong)
        };
        inner.scheduler.start(maintenance);

        info!(
            partitions = partitions_loaded,
            strategy = %inner.config.persistence_strategy,
            "Partition store initialized"
        );
        inner.events.emit(StorageEvent::storage_initialized(
            &inner.config.storage_dir,
            partitions_loaded,
        ));
        Ok(())
    }

    /// Stop the scheduler, finish pending splits and compression jobs, then
    /// save metadata.
    ///
    /// Idempotent; a store that never started is left untouched.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        let inner = &self.inner;
        if inner
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_STOPPING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }

        inner.scheduler.stop().await;
        inner.wait_for_splits().await;
        drain(&inner.compression_jobs, "Compression job").await;

        let saved = inner.save_metadata().await;
        inner.state.store(STATE_STOPPED, Ordering::Release);

        let partitions = match saved {
            Ok(count) => count,
            Err(e) => {
                inner
                    .events
                    .emit(StorageEvent::storage_error("shutdown", None, &e));
                return Err(e);
            }
        };

        info!(partitions, "Partition store shut down");
        inner.events.emit(StorageEvent::storage_shutdown(partitions));
        Ok(())
    }

    /// Whether the store accepts operations
    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    // =========================================================================
    // Partition Operations
    // =========================================================================

    /// Store `payload` under `id`, replacing any previous value.
    #[instrument(skip(self, payload))]
    pub async fn store(&self, id: &str, payload: T) -> Result<()> {
        self.ensure_running()?;
        self.inner
            .store_at(id, payload, SplitLineage::root())
            .await
            .map_err(|e| {
                self.inner
                    .events
                    .emit(StorageEvent::storage_error("store", Some(id), &e));
                e
            })
    }

    /// Fetch the partition stored under `id`. `Ok(None)` when no tier has it.
    #[instrument(skip(self))]
    pub async fn retrieve(&self, id: &str) -> Result<Option<Arc<T>>> {
        self.ensure_running()?;
        let started = Instant::now();

        match self.inner.retrieve(id).await {
            Ok(Some((value, source))) => {
                debug!(partition_id = %id, source = %source, "Partition retrieved");
                self.inner.events.emit(StorageEvent::partition_retrieved(
                    id,
                    source,
                    started.elapsed(),
                ));
                Ok(Some(value))
            }
            Ok(None) => {
                debug!(partition_id = %id, "Partition not found");
                self.inner
                    .events
                    .emit(StorageEvent::partition_not_found(id));
                Ok(None)
            }
            Err(e) => {
                self.inner
                    .events
                    .emit(StorageEvent::storage_error("retrieve", Some(id), &e));
                Err(e)
            }
        }
    }

    /// Remove `id` from the hot cache, every tier and the metadata.
    ///
    /// Removing an unknown id succeeds. A failing tier does not stop the
    /// remaining tiers from being cleared; the first error is returned.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.ensure_running()?;
        self.inner.remove(id).await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Run one eviction pass now
    pub async fn cleanup(&self) -> Result<EvictionReport> {
        self.ensure_running()?;
        Ok(self.inner.enforce_budget())
    }

    /// Save metadata now. Returns the number of partitions saved.
    pub async fn checkpoint(&self) -> Result<usize> {
        self.ensure_running()?;
        self.inner.save_metadata().await.map_err(|e| {
            self.inner
                .events
                .emit(StorageEvent::storage_error("checkpoint", None, &e));
            e
        })
    }

    /// Wait until every scheduled split, including nested ones, has finished
    pub async fn wait_for_splits(&self) {
        self.inner.wait_for_splits().await;
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Register an event listener
    pub fn subscribe(&self, listener: Arc<dyn StorageEventListener>) -> ListenerId {
        self.inner.events.subscribe(listener)
    }

    /// Remove an event listener
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Aggregate statistics
    pub fn storage_stats(&self) -> StorageStats {
        let inner = &self.inner;
        inner
            .metrics
            .storage_stats(inner.hot.len(), inner.hot.total_bytes())
    }

    pub fn partition_metrics(&self, id: &str) -> Option<PartitionMetrics> {
        self.inner.metrics.get(id)
    }

    pub fn access_stats(&self, id: &str) -> Option<AccessStats> {
        self.inner.metrics.access_stats(id)
    }

    /// Whether `id` is resident in the hot cache
    pub fn is_cached(&self, id: &str) -> bool {
        self.inner.hot.contains(id)
    }

    /// Whether metadata exists for `id`
    pub fn contains(&self, id: &str) -> bool {
        self.inner.metrics.contains(id)
    }

    /// Sorted ids of every known partition
    pub fn partition_ids(&self) -> Vec<String> {
        self.inner.metrics.ids()
    }
}

impl<T> std::fmt::Debug for PartitionStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionStore")
            .field("storage_dir", &self.inner.config.storage_dir)
            .field("partitions", &self.inner.metrics.len())
            .field("hot_cache_entries", &self.inner.hot.len())
            .field("listeners", &self.inner.events.len())
            .finish()
    }
}

// =============================================================================
// Engine
// =============================================================================

impl<T: PartitionPayload> StoreInner<T> {
    async fn prepare_directories(&self) -> Result<()> {
        fn not_writable(path: &Path, e: Error) -> Error {
            Error::Config(format!(
                "storage directory {} is not writable: {}",
                path.display(),
                e
            ))
        }

        for dir in [
            self.config.storage_dir.clone(),
            self.config.cache_dir(),
            self.config.compressed_dir(),
            self.config.mmap_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| not_writable(&dir, Error::io(&dir, e)))?;
        }

        let probe = self.config.storage_dir.join(".write-probe");
        write_atomic(&probe, b"")
            .await
            .map_err(|e| not_writable(&self.config.storage_dir, e))?;
        remove_if_exists(&probe).await?;
        Ok(())
    }

    async fn store_at(self: &Arc<Self>, id: &str, payload: T, lineage: SplitLineage) -> Result<()> {
        let started = Instant::now();

        let bytes = serde_json::to_vec(&payload).map_err(|source| Error::Serialization {
            partition_id: id.to_string(),
            source,
        })?;
        let size = bytes.len() as u64;
        let checksum = self
            .config
            .verify_checksums
            .then(|| blake3::hash(&bytes).to_hex().to_string());
        let data = Bytes::from(bytes);
        let tier = self.policy.select_tier(size);
        let value = Arc::new(payload);

        // Metadata and the parked compression payload must agree on the latest write
        let write = {
            let _order = self.write_order.lock();
            self.metrics.record_write(id, size);
            self.metrics.set_checksum(id, checksum);
            self.hot.insert(id, Arc::clone(&value), size);
            match tier {
                StorageTier::MemoryMapped => TierWrite::Mapped(data),
                StorageTier::DiskCache => TierWrite::Disk(data),
                StorageTier::Compressed => {
                    self.metrics.clear_tier(id);
                    TierWrite::Compress(self.compression.begin(id, data))
                }
            }
        };

        self.write_tier(id, write).await?;
        debug!(partition_id = %id, size, tier = %tier, "Partition written");

        if self.policy.is_oversized(size) && self.splitter.read().may_split(size, lineage) {
            self.schedule_split(id, value, size, lineage);
        }

        self.enforce_budget();

        self.events.emit(StorageEvent::partition_stored(
            id,
            size,
            tier,
            started.elapsed(),
        ));

        self.persistence.mark_dirty();
        if self.persistence.saves_on_write() {
            self.save_metadata().await?;
        }
        Ok(())
    }

    /// Write to `tier`, then delete whatever the other tiers still hold.
    async fn write_tier(self: &Arc<Self>, id: &str, write: TierWrite) -> Result<()> {
        let tier = write.tier();
        match write {
            TierWrite::Mapped(data) => {
                let mapped = self.mmap.write(id, &data).await?;
                self.metrics.set_tier(id, tier);
                self.events.emit(StorageEvent::memory_mapped_created(
                    id,
                    data.len() as u64,
                    mapped.path(),
                ));
            }
            TierWrite::Disk(data) => {
                let path = self.disk.write(id, &data).await?;
                self.metrics.set_tier(id, tier);
                self.events
                    .emit(StorageEvent::disk_cache_stored(id, data.len() as u64, &path));
            }
            TierWrite::Compress(Some(data)) => self.spawn_compression(id, data).await?,
            TierWrite::Compress(None) => {
                debug!(partition_id = %id, "Compression in flight, queued latest payload");
            }
        }

        for other in StorageTier::PROBE_ORDER {
            if other != tier && self.remove_tier_file(id, other).await? {
                debug!(partition_id = %id, tier = %other, "Removed stale tier file");
            }
        }
        Ok(())
    }

    /// Start the compression job for `id` on its own task and wait for the
    /// result of `data`.
    ///
    /// The job holds the in-flight slot, so it must finish even when the
    /// calling future is dropped.
    async fn spawn_compression(self: &Arc<Self>, id: &str, data: Bytes) -> Result<()> {
        let (owner, result) = oneshot::channel();
        let handle = tokio::spawn(Arc::clone(self).compress_partition(id.to_string(), data, owner));
        track(&self.compression_jobs, handle);

        result.await.map_err(|_| {
            Error::Internal(format!("compression job for '{}' ended without a result", id))
        })?
    }

    /// Compress `data`, then every payload parked while the job ran.
    ///
    /// The first result goes to `owner`. Failures nobody is waiting for are
    /// reported as `StorageError` events.
    async fn compress_partition(
        self: Arc<Self>,
        id: String,
        mut data: Bytes,
        owner: oneshot::Sender<Result<()>>,
    ) {
        let mut owner = Some(owner);
        loop {
            let result = self.compress_once(&id, &data).await;
            let unreported = match owner.take() {
                Some(tx) => tx.send(result).err().and_then(Result::err),
                None => result.err(),
            };
            if let Some(e) = unreported {
                warn!(partition_id = %id, error = %e, "Compression job failed");
                self.events
                    .emit(StorageEvent::storage_error("compress", Some(id.as_str()), &e));
            }

            match self.compression.next(&id) {
                Some(next) => data = next,
                None => return,
            }
        }
    }

    async fn compress_once(&self, id: &str, data: &Bytes) -> Result<()> {
        let original_size = data.len() as u64;
        let compressed = self.compression.compress(data.clone()).await?;
        let compressed_size = compressed.len() as u64;
        self.archive.write(id, &compressed).await?;

        if self
            .metrics
            .mark_compressed(id, original_size, compressed_size)
        {
            self.events.emit(StorageEvent::partition_compressed(
                id,
                original_size,
                compressed_size,
            ));
        } else {
            // Superseded by a store to another tier or by a removal
            debug!(partition_id = %id, "Dropping superseded archive");
            self.archive.remove(id).await?;
        }
        Ok(())
    }

    async fn remove_tier_file(&self, id: &str, tier: StorageTier) -> Result<bool> {
        match tier {
            StorageTier::MemoryMapped => self.mmap.remove(id).await,
            StorageTier::DiskCache => self.disk.remove(id).await,
            StorageTier::Compressed => self.archive.remove(id).await,
        }
    }

    async fn retrieve(&self, id: &str) -> Result<Option<(Arc<T>, RetrievalSource)>> {
        if let Some(value) = self.hot.get(id) {
            self.metrics.record_hit(id, RetrievalSource::HotCache);
            return Ok(Some((value, RetrievalSource::HotCache)));
        }

        for tier in StorageTier::PROBE_ORDER {
            let decoded = match tier {
                StorageTier::MemoryMapped => match self.mmap.get(id).await? {
                    Some(mapped) => Some(self.decode(id, &mapped)?),
                    None => None,
                },
                StorageTier::DiskCache => match self.disk.read(id).await? {
                    Some(data) => Some(self.decode(id, &data)?),
                    None => None,
                },
                StorageTier::Compressed => match self.archive.read(id).await? {
                    Some(data) => {
                        let data = self.compression.decompress(data).await?;
                        Some(self.decode(id, &data)?)
                    }
                    None => None,
                },
            };

            if let Some((value, size)) = decoded {
                let value = Arc::new(value);
                let source = RetrievalSource::Tier(tier);
                // A remove that ran while the file was read keeps the cache clear
                let live = {
                    let _order = self.write_order.lock();
                    let live = self.metrics.contains(id);
                    if live {
                        self.hot.insert(id, Arc::clone(&value), size);
                    }
                    live
                };
                if live {
                    self.metrics.record_hit(id, source);
                    self.enforce_budget();
                } else {
                    debug!(partition_id = %id, "Partition removed during read, not cached");
                }
                return Ok(Some((value, source)));
            }
        }

        self.metrics.record_miss(id);
        Ok(None)
    }

    /// Verify and deserialize tier bytes. Returns the value and its size.
    fn decode(&self, id: &str, data: &[u8]) -> Result<(T, u64)> {
        if self.config.verify_checksums {
            if let Some(expected) = self.metrics.checksum(id) {
                let actual = blake3::hash(data).to_hex().to_string();
                if actual != expected {
                    return Err(Error::Integrity {
                        partition_id: id.to_string(),
                        expected,
                        actual,
                    });
                }
            }
        }

        let value = serde_json::from_slice(data).map_err(|source| Error::Deserialization {
            partition_id: id.to_string(),
            source,
        })?;
        Ok((value, data.len() as u64))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut existed = false;
        let mut first_error = None;

        for tier in StorageTier::PROBE_ORDER {
            match self.remove_tier_file(id, tier).await {
                Ok(removed) => existed |= removed,
                Err(e) => {
                    warn!(partition_id = %id, tier = %tier, error = %e, "Failed to remove tier file");
                    self.events
                        .emit(StorageEvent::storage_error("remove", Some(id), &e));
                    first_error.get_or_insert(e);
                }
            }
        }
        {
            let _order = self.write_order.lock();
            existed |= self.hot.remove(id).is_some();
            existed |= self.metrics.remove(id).is_some();
        }

        self.persistence.mark_dirty();
        if self.persistence.saves_on_write() {
            if let Err(e) = self.save_metadata().await {
                self.events
                    .emit(StorageEvent::storage_error("remove", Some(id), &e));
                first_error.get_or_insert(e);
            }
        }

        debug!(partition_id = %id, existed, "Partition removed");
        self.events.emit(StorageEvent::partition_removed(id, existed));
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn enforce_budget(&self) -> EvictionReport {
        let report = self.eviction.enforce(&self.hot, &self.metrics);
        if !report.is_empty() {
            for (id, size) in &report.evicted {
                if self.mmap.release(id) {
                    debug!(partition_id = %id, "Released mapping of evicted partition");
                }
                self.events
                    .emit(StorageEvent::partition_evicted(id.as_str(), *size));
            }
            debug!(
                evicted = report.evicted_count(),
                evicted_bytes = report.evicted_bytes,
                remaining_bytes = report.remaining_bytes,
                "Hot cache trimmed"
            );
            self.events.emit(StorageEvent::cache_cleanup(
                report.evicted_count(),
                report.evicted_bytes,
                report.remaining_bytes,
            ));
        }
        report
    }

    async fn save_metadata(&self) -> Result<usize> {
        self.persistence.save(|| self.metrics.snapshot()).await
    }

    // =========================================================================
    // Splitting
    // =========================================================================

    fn schedule_split(self: &Arc<Self>, id: &str, value: Arc<T>, size: u64, lineage: SplitLineage) {
        debug!(partition_id = %id, size, depth = lineage.depth, "Scheduling split");
        let handle = tokio::spawn(Arc::clone(self).run_split(id.to_string(), value, size, lineage));
        track(&self.pending_splits, handle);
    }

    fn run_split(
        self: Arc<Self>,
        id: String,
        value: Arc<T>,
        size: u64,
        lineage: SplitLineage,
    ) -> BoxFuture<'static, ()> {
        async move {
            let splitter = self.splitter.read().clone();
            let plan = match splitter.plan(&id, &value, size, lineage) {
                Ok(Some(plan)) => plan,
                Ok(None) => {
                    debug!(partition_id = %id, strategy = %splitter.strategy_name(), "Strategy declined to split");
                    return;
                }
                Err(e) => {
                    warn!(partition_id = %id, error = %e, "Split strategy failed");
                    self.events
                        .emit(StorageEvent::storage_error("split", Some(id.as_str()), &e));
                    return;
                }
            };

            let child_ids = plan.child_ids();
            for (child_id, child) in plan.children {
                if let Err(e) = self.store_at(&child_id, child, plan.lineage).await {
                    warn!(partition_id = %child_id, parent_id = %id, error = %e, "Failed to store split child");
                    self.events
                        .emit(StorageEvent::storage_error("split", Some(child_id.as_str()), &e));
                }
            }

            info!(partition_id = %id, children = child_ids.len(), strategy = %plan.strategy, "Partition split");
            self.events
                .emit(StorageEvent::partition_split(id, child_ids, plan.strategy));
        }
        .boxed()
    }

    async fn wait_for_splits(&self) {
        drain(&self.pending_splits, "Split task").await;
    }
}

/// Remember a background task, forgetting the ones already finished
fn track(pending: &Mutex<Vec<JoinHandle<()>>>, handle: JoinHandle<()>) {
    let mut pending = pending.lock();
    pending.retain(|h| !h.is_finished());
    pending.push(handle);
}

/// Await tracked tasks until none are left, including ones started meanwhile
async fn drain(pending: &Mutex<Vec<JoinHandle<()>>>, what: &str) {
    loop {
        let handles: Vec<_> = std::mem::take(&mut *pending.lock());
        if handles.is_empty() {
            break;
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "{} did not complete", what);
            }
        }
    }
}

#[async_trait]
impl<T: PartitionPayload> MaintenanceTask for StoreInner<T> {
    async fn run_maintenance(&self) -> Result<()> {
        self.enforce_budget();
        if self.persistence.saves_on_tick() {
            self.save_metadata().await?;
        }
        Ok(())
    }

    fn on_tick_error(&self, error: &Error) {
        self.events
            .emit(StorageEvent::storage_error("background_tick", None, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::event_publisher::InMemoryEventCollector;
    use assert_matches::assert_matches;
    use serde_json::{json, Value};

    fn config(dir: &std::path::Path) -> StorageConfig {
        StorageConfig {
            compression_threshold: 1024,
            memory_map_threshold: 8 * 1024,
            partition_max_size: 64 * 1024,
            ..StorageConfig::new(dir)
        }
    }

    #[tokio::test]
    async fn test_operations_require_initialize() {
        let tmp = tempfile::tempdir().unwrap();
        let store: PartitionStore<Value> = PartitionStore::new(config(tmp.path())).unwrap();

        assert_matches!(store.store("a", json!(1)).await, Err(Error::NotInitialized));
        assert_matches!(store.retrieve("a").await, Err(Error::NotInitialized));
        assert_matches!(store.remove("a").await, Err(Error::NotInitialized));

        store.initialize().await.unwrap();
        store.store("a", json!(1)).await.unwrap();
        store.shutdown().await.unwrap();

        assert_matches!(store.retrieve("a").await, Err(Error::NotInitialized));
        // Idempotent
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let cfg = StorageConfig {
            compression_level: 12,
            ..StorageConfig::default()
        };
        assert_matches!(PartitionStore::<Value>::new(cfg), Err(Error::Config(_)));
    }

    #[tokio::test]
    async fn test_retier_removes_stale_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store: PartitionStore<String> = PartitionStore::new(config(tmp.path())).unwrap();
        store.initialize().await.unwrap();

        store.store("p", "x".repeat(2048)).await.unwrap();
        assert!(store.partition_metrics("p").unwrap().is_compressed);

        store.store("p", "small".to_string()).await.unwrap();
        let metrics = store.partition_metrics("p").unwrap();
        assert!(metrics.is_disk_cached);
        assert!(!metrics.is_compressed);
        assert!(!tmp.path().join("compressed").join("p.gz").exists());

        // Cold read must see the new value, not the old archive
        store.inner.hot.clear();
        let value = store.retrieve("p").await.unwrap().unwrap();
        assert_eq!(value.as_str(), "small");
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_integrity_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = StorageConfig {
            verify_checksums: true,
            ..config(tmp.path())
        };
        let store: PartitionStore<Value> = PartitionStore::new(cfg).unwrap();
        let collector = Arc::new(InMemoryEventCollector::new());
        store.subscribe(collector.clone());
        store.initialize().await.unwrap();

        store.store("p", json!({"v": 1})).await.unwrap();
        assert!(store.partition_metrics("p").unwrap().checksum.is_some());

        std::fs::write(tmp.path().join("cache").join("p.json"), br#"{"v":2}"#).unwrap();
        store.inner.hot.clear();

        assert_matches!(store.retrieve("p").await, Err(Error::Integrity { .. }));
        assert_eq!(collector.count_of_type("StorageError"), 1);
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_racing_remove_does_not_refill_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let store: PartitionStore<Value> = PartitionStore::new(config(tmp.path())).unwrap();
        store.initialize().await.unwrap();
        store.store("p", json!({"v": 1})).await.unwrap();

        // Metadata already gone while the tier file is still readable
        store.inner.hot.clear();
        store.inner.metrics.remove("p");

        let value = store.retrieve("p").await.unwrap().unwrap();
        assert_eq!(*value, json!({"v": 1}));
        assert!(!store.is_cached("p"));
        assert!(store.access_stats("p").is_none());
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_eviction_releases_mapping() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = StorageConfig {
            cache_max_size: 4 * 1024,
            ..config(tmp.path())
        };
        let store: PartitionStore<String> = PartitionStore::new(cfg).unwrap();
        store.initialize().await.unwrap();

        let big = "m".repeat(16 * 1024);
        store.store("big", big.clone()).await.unwrap();
        assert!(store.partition_metrics("big").unwrap().is_memory_mapped);
        assert!(!store.is_cached("big"));
        assert_eq!(store.inner.mmap.open_mappings(), 0);

        // A cold read maps the file again and is evicted right away
        let value = store.retrieve("big").await.unwrap().unwrap();
        assert_eq!(*value, big);
        assert_eq!(store.inner.mmap.open_mappings(), 0);
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unwritable_storage_dir_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();

        let store: PartitionStore<Value> = PartitionStore::new(StorageConfig::new(&file)).unwrap();
        assert_matches!(store.initialize().await, Err(Error::Config(_)));
        assert!(!store.is_running());
    }
}
