//! Memory-Map Manager
//!
//! Large partitions live in `mmap/<id>.mmap` and are read straight out of a
//! read-only memory mapping instead of being copied into a heap buffer.
//!
//! # Design
//!
//! - Files are written with temp file + rename, never modified in place.
//!   A mapping of the old inode stays valid after a rewrite; the table is
//!   switched to a fresh mapping of the new file.
//! - [`MappedPartition`] owns its `Mmap`; the region is unmapped when the
//!   last `Arc` is dropped, including on error paths.
//! - Mappings are opened lazily on first read after a restart, on the
//!   blocking pool. The store releases a mapping when its partition leaves
//!   the hot cache.

use std::fs::File;
use std::io::ErrorKind;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use memmap2::Mmap;
use tracing::debug;

use super::disk::{partition_file_name, remove_if_exists, write_atomic};
use crate::error::{Error, Result};

/// File extension for memory-mapped partitions
pub const MMAP_EXTENSION: &str = "mmap";

/// Read-only mapping of one partition file
pub struct MappedPartition {
    path: PathBuf,
    /// `None` for an empty file, which cannot be mapped
    map: Option<Mmap>,
}

impl MappedPartition {
    /// Map `path` read-only
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        let len = file.metadata().map_err(|e| Error::io(&path, e))?.len();

        let map = if len == 0 {
            None
        } else {
            // SAFETY: the file is private to this store and only ever
            // replaced by rename, so the mapped inode is never truncated.
            Some(unsafe { Mmap::map(&file) }.map_err(|e| Error::io(&path, e))?)
        };

        Ok(Self { path, map })
    }

    /// [`open`](Self::open) on the blocking pool
    pub async fn open_blocking(path: PathBuf) -> Result<Self> {
        let display = path.clone();
        tokio::task::spawn_blocking(move || Self::open(path))
            .await
            .map_err(|e| Error::Internal(format!("mapping {} failed: {}", display.display(), e)))?
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Deref for MappedPartition {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.map {
            Some(map) => map,
            None => &[],
        }
    }
}

impl AsRef<[u8]> for MappedPartition {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl std::fmt::Debug for MappedPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedPartition")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish()
    }
}

/// Memory-mapped partition tier
pub struct MemoryMapManager {
    dir: PathBuf,
    /// Open mappings by partition id
    mappings: DashMap<String, Arc<MappedPartition>>,
}

impl MemoryMapManager {
    /// Manager for files `<dir>/<id>.mmap`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            mappings: DashMap::new(),
        }
    }

    /// Create the tier directory
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::io(&self.dir, e))
    }

    /// File path for `id`
    pub fn path(&self, id: &str) -> PathBuf {
        self.dir.join(partition_file_name(id, MMAP_EXTENSION))
    }

    /// Write the partition file and map it
    pub async fn write(&self, id: &str, data: &[u8]) -> Result<Arc<MappedPartition>> {
        let path = self.path(id);
        write_atomic(&path, data).await?;

        let mapped = Arc::new(MappedPartition::open_blocking(path.clone()).await?);
        self.mappings.insert(id.to_string(), Arc::clone(&mapped));
        debug!(partition_id = %id, path = %path.display(), bytes = data.len(), "Mapped partition file");
        Ok(mapped)
    }

    /// Mapping for `id`, opening the file if needed; `None` when no file exists
    pub async fn get(&self, id: &str) -> Result<Option<Arc<MappedPartition>>> {
        if let Some(mapped) = self.mappings.get(id).map(|m| Arc::clone(m.value())) {
            return Ok(Some(mapped));
        }

        match MappedPartition::open_blocking(self.path(id)).await {
            Ok(mapped) => {
                // A concurrent reader may have opened it first
                let mapped = self
                    .mappings
                    .entry(id.to_string())
                    .or_insert_with(|| Arc::new(mapped))
                    .value()
                    .clone();
                Ok(Some(mapped))
            }
            Err(Error::Io { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Drop the mapping and delete the file. Returns whether a file was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.mappings.remove(id);
        remove_if_exists(&self.path(id)).await
    }

    /// Drop the open mapping only; the file stays.
    pub fn release(&self, id: &str) -> bool {
        self.mappings.remove(id).is_some()
    }

    /// Whether a file exists for `id`
    pub async fn exists(&self, id: &str) -> bool {
        self.mappings.contains_key(id) || tokio::fs::try_exists(self.path(id)).await.unwrap_or(false)
    }

    /// Number of open mappings
    pub fn open_mappings(&self) -> usize {
        self.mappings.len()
    }

    /// Drop every open mapping
    pub fn release_all(&self) {
        self.mappings.clear();
    }
}

impl std::fmt::Debug for MemoryMapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMapManager")
            .field("dir", &self.dir)
            .field("open_mappings", &self.open_mappings())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> (tempfile::TempDir, MemoryMapManager) {
        let tmp = tempfile::tempdir().unwrap();
        let manager = MemoryMapManager::new(tmp.path().join("mmap"));
        manager.ensure_dir().await.unwrap();
        (tmp, manager)
    }

    #[tokio::test]
    async fn test_write_and_read_mapping() {
        let (_tmp, manager) = manager().await;
        let data = vec![7u8; 64 * 1024];

        let mapped = manager.write("big", &data).await.unwrap();
        assert_eq!(&mapped[..], &data[..]);
        assert!(mapped.path().ends_with("big.mmap"));
        assert_eq!(manager.open_mappings(), 1);

        let again = manager.get("big").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&mapped, &again));
    }

    #[tokio::test]
    async fn test_lazy_open_after_release() {
        let (_tmp, manager) = manager().await;
        manager.write("p", b"payload").await.unwrap();

        assert!(manager.release("p"));
        assert_eq!(manager.open_mappings(), 0);

        let mapped = manager.get("p").await.unwrap().unwrap();
        assert_eq!(&mapped[..], b"payload");
        assert_eq!(manager.open_mappings(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_keeps_old_mapping_valid() {
        let (_tmp, manager) = manager().await;

        let old = manager.write("p", b"first version").await.unwrap();
        let new = manager.write("p", b"second").await.unwrap();

        assert_eq!(&old[..], b"first version");
        assert_eq!(&new[..], b"second");
        assert_eq!(&manager.get("p").await.unwrap().unwrap()[..], b"second");
    }

    #[tokio::test]
    async fn test_missing_and_remove() {
        let (_tmp, manager) = manager().await;

        assert!(manager.get("missing").await.unwrap().is_none());
        assert!(!manager.remove("missing").await.unwrap());

        manager.write("p", b"x").await.unwrap();
        assert!(manager.exists("p").await);
        assert!(manager.remove("p").await.unwrap());
        assert!(!manager.exists("p").await);
        assert!(manager.get("p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_file_maps_to_empty_slice() {
        let (_tmp, manager) = manager().await;
        let mapped = manager.write("empty", b"").await.unwrap();
        assert!(mapped.is_empty());
    }
}
