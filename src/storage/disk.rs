//! Disk Cache Manager
//!
//! One file per partition under a tier directory. Used for the plain
//! disk-cache tier (`cache/<id>.json`) and for the gzip archive
//! (`compressed/<id>.gz`).
//!
//! Partition ids are percent-encoded into file names, so ids containing
//! `/`, `..` or other separators never escape the tier directory. Writes go
//! to a temp file that is fsynced and renamed over the target; a reader
//! sees either the old file or the new one, never a torn write.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};

/// File name for `id` with extension `ext`.
pub fn partition_file_name(id: &str, ext: &str) -> String {
    format!("{}.{}", urlencoding::encode(id), ext)
}

/// Write `data` to `path` via temp file + fsync + rename.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result: Result<()> = async {
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| Error::io(&tmp_path, e))?;
        file.write_all(data)
            .await
            .map_err(|e| Error::io(&tmp_path, e))?;
        file.sync_all().await.map_err(|e| Error::io(&tmp_path, e))?;
        drop(file);
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| Error::io(path, e))
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result
}

/// Remove `path`; a missing file is not an error.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Plain-file partition tier
#[derive(Debug, Clone)]
pub struct DiskCacheManager {
    dir: PathBuf,
    extension: &'static str,
}

impl DiskCacheManager {
    /// Manager for files `<dir>/<id>.<extension>`
    pub fn new(dir: impl Into<PathBuf>, extension: &'static str) -> Self {
        Self {
            dir: dir.into(),
            extension,
        }
    }

    /// Create the tier directory
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::io(&self.dir, e))
    }

    /// Tier directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for `id`
    pub fn path(&self, id: &str) -> PathBuf {
        self.dir.join(partition_file_name(id, self.extension))
    }

    /// Write the partition file, replacing any previous one
    pub async fn write(&self, id: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.path(id);
        write_atomic(&path, data).await?;
        debug!(partition_id = %id, path = %path.display(), bytes = data.len(), "Wrote partition file");
        Ok(path)
    }

    /// Read the partition file; `None` when it does not exist
    pub async fn read(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(id);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    /// Delete the partition file. Returns whether a file was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        remove_if_exists(&self.path(id)).await
    }

    /// Whether a file exists for `id`
    pub async fn exists(&self, id: &str) -> bool {
        tokio::fs::try_exists(self.path(id)).await.unwrap_or(false)
    }
}
