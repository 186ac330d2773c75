//! Compression Engine
//!
//! Gzip (DEFLATE) compression for the archival tier, plus per-partition
//! de-duplication of in-flight compression jobs.
//!
//! # Example
//!
//! ```
//! use tierstore::storage::compression::{Compressor, GzipCompressor};
//!
//! let compressor = GzipCompressor::with_level(6);
//!
//! let data = b"Hello, this is test data that should compress well! Hello, this is test data!";
//! let compressed = compressor.compress(data).unwrap();
//!
//! let decompressed = compressor.decompress(&compressed).unwrap();
//! assert_eq!(decompressed, data);
//! ```
//!
//! # Job de-duplication
//!
//! At most one compression job runs per partition id. A store that arrives
//! while a job is running parks its bytes as the pending payload (the latest
//! one wins) and returns; the running job picks the pending payload up when
//! it finishes, so the archive always converges on the last write.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;

use crate::error::{Error, Result};

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Algorithm name used in error messages
    fn name(&self) -> &'static str;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

// =============================================================================
// Gzip Compressor
// =============================================================================

/// Gzip compressor, level 1 (fastest) to 9 (smallest)
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    /// Create new gzip compressor with the default level (6)
    pub fn new() -> Self {
        Self { level: 6 }
    }

    /// Create with custom compression level, clamped to 1..=9
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.clamp(1, 9),
        }
    }

    /// Configured level
    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(data.len() / 2 + 64),
            Compression::new(self.level),
        );
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::Compression {
                algorithm: self.name().into(),
                reason: e.to_string(),
            })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::with_capacity(data.len() * 2);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::Decompression {
                algorithm: self.name().into(),
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

// =============================================================================
// Compression Engine
// =============================================================================

/// Stateless compression plus the per-id in-flight table
pub struct CompressionEngine {
    compressor: Arc<dyn Compressor>,
    /// id -> payload queued behind the running job
    in_flight: Mutex<HashMap<String, Option<Bytes>>>,
}

impl CompressionEngine {
    /// Create an engine using gzip at `level`
    pub fn new(level: u32) -> Self {
        Self::with_compressor(Arc::new(GzipCompressor::with_level(level)))
    }

    /// Create with a custom compressor
    pub fn with_compressor(compressor: Arc<dyn Compressor>) -> Self {
        Self {
            compressor,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the compression slot for `id`.
    ///
    /// Returns the bytes back when the caller now owns the job. Returns
    /// `None` when a job is already running; `data` is then parked as that
    /// job's next payload.
    pub fn begin(&self, id: &str, data: Bytes) -> Option<Bytes> {
        let mut in_flight = self.in_flight.lock();
        match in_flight.get_mut(id) {
            Some(pending) => {
                *pending = Some(data);
                None
            }
            None => {
                in_flight.insert(id.to_string(), None);
                Some(data)
            }
        }
    }

    /// Called by the job owner after each run, successful or not.
    ///
    /// Returns the parked payload to compress next, or releases the slot
    /// and returns `None`. Parked payloads are never dropped.
    pub fn next(&self, id: &str) -> Option<Bytes> {
        let mut in_flight = self.in_flight.lock();
        match in_flight.get_mut(id).and_then(Option::take) {
            Some(data) => Some(data),
            None => {
                in_flight.remove(id);
                None
            }
        }
    }

    /// Whether a job for `id` is running
    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.lock().contains_key(id)
    }

    /// Number of running jobs
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Compress on the blocking pool
    pub async fn compress(&self, data: Bytes) -> Result<Vec<u8>> {
        let compressor = Arc::clone(&self.compressor);
        tokio::task::spawn_blocking(move || compressor.compress(&data))
            .await
            .map_err(|e| Error::Internal(format!("compression task failed: {}", e)))?
    }

    /// Decompress on the blocking pool
    pub async fn decompress(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        let compressor = Arc::clone(&self.compressor);
        tokio::task::spawn_blocking(move || compressor.decompress(&data))
            .await
            .map_err(|e| Error::Internal(format!("decompression task failed: {}", e)))?
    }

    /// Compressor in use
    pub fn compressor(&self) -> &dyn Compressor {
        self.compressor.as_ref()
    }
}

impl std::fmt::Debug for CompressionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionEngine")
            .field("algorithm", &self.compressor.name())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    const TEST_DATA: &[u8] = b"Hello, this is test data that should compress well. \
        It has some repetition: Hello, this is test data that should compress well.";

    #[test]
    fn test_gzip_roundtrip() {
        let compressor = GzipCompressor::new();

        let compressed = compressor.compress(TEST_DATA).unwrap();
        assert!(compressed.len() < TEST_DATA.len());
        // gzip magic
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, TEST_DATA);
    }

    #[test]
    fn test_level_is_clamped() {
        assert_eq!(GzipCompressor::with_level(0).level(), 1);
        assert_eq!(GzipCompressor::with_level(42).level(), 9);
    }

    #[test]
    fn test_higher_level_not_larger() {
        let data: Vec<u8> = (0..50_000).map(|i| ((i / 7) % 251) as u8).collect();
        let fast = GzipCompressor::with_level(1).compress(&data).unwrap();
        let best = GzipCompressor::with_level(9).compress(&data).unwrap();
        assert!(best.len() <= fast.len());
    }

    #[test]
    fn test_corrupt_input_is_decompression_error() {
        let compressor = GzipCompressor::new();
        let result = compressor.decompress(b"definitely not gzip");
        assert_matches!(result, Err(Error::Decompression { .. }));
    }

    #[test]
    fn test_in_flight_dedup() {
        let engine = CompressionEngine::new(6);

        let first = engine.begin("p", Bytes::from_static(b"v1"));
        assert_eq!(first.as_deref(), Some(&b"v1"[..]));
        assert!(engine.is_in_flight("p"));

        // Second and third writers are parked; latest wins
        assert!(engine.begin("p", Bytes::from_static(b"v2")).is_none());
        assert!(engine.begin("p", Bytes::from_static(b"v3")).is_none());
        assert_eq!(engine.in_flight_count(), 1);

        let next = engine.next("p");
        assert_eq!(next.as_deref(), Some(&b"v3"[..]));
        assert!(engine.is_in_flight("p"));

        assert!(engine.next("p").is_none());
        assert!(!engine.is_in_flight("p"));
    }

    #[test]
    fn test_independent_ids_do_not_block() {
        let engine = CompressionEngine::new(6);
        assert!(engine.begin("a", Bytes::from_static(b"a")).is_some());
        assert!(engine.begin("b", Bytes::from_static(b"b")).is_some());
        assert_eq!(engine.in_flight_count(), 2);

        assert!(engine.next("a").is_none());
        assert!(!engine.is_in_flight("a"));
        assert!(engine.is_in_flight("b"));
    }

    #[tokio::test]
    async fn test_async_roundtrip() {
        let engine = CompressionEngine::new(9);
        let compressed = engine.compress(Bytes::from_static(TEST_DATA)).await.unwrap();
        let back = engine.decompress(compressed).await.unwrap();
        assert_eq!(back, TEST_DATA);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_roundtrip_any_level(
            data in prop::collection::vec(any::<u8>(), 0..4096),
            level in 1u32..=9,
        ) {
            let compressor = GzipCompressor::with_level(level);
            let compressed = compressor.compress(&data).unwrap();
            prop_assert_eq!(compressor.decompress(&compressed).unwrap(), data);
        }
    }
}
