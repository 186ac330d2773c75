//! Prometheus Stats Exporter
//!
//! Publishes [`StorageStats`] as Prometheus gauges in the text exposition
//! format. Gauges live in a private registry so several stores can be
//! exported side by side without clashing in the global one.

use prometheus::{Encoder, Gauge, IntGauge, Registry, TextEncoder};

use crate::error::{Error, Result};
use crate::storage::metrics::StorageStats;

/// Default metric name prefix
pub const DEFAULT_NAMESPACE: &str = "tierstore";

/// Gauges mirroring [`StorageStats`]
pub struct StatsExporter {
    registry: Registry,
    total_partitions: IntGauge,
    total_size: IntGauge,
    compressed_partitions: IntGauge,
    compressed_size: IntGauge,
    memory_mapped_partitions: IntGauge,
    disk_cached_partitions: IntGauge,
    hot_cache_entries: IntGauge,
    hot_cache_bytes: IntGauge,
    cache_hit_rate: Gauge,
    average_compression_ratio: Gauge,
}

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("Prometheus registry error: {}", e))
}

impl StatsExporter {
    /// Exporter with the default `tierstore_` prefix
    pub fn new() -> Result<Self> {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    /// Exporter with a custom metric prefix
    pub fn with_namespace(namespace: &str) -> Result<Self> {
        let registry =
            Registry::new_custom(Some(namespace.to_string()), None).map_err(prom_err)?;

        let int_gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let gauge = IntGauge::new(name, help).map_err(prom_err)?;
            registry.register(Box::new(gauge.clone())).map_err(prom_err)?;
            Ok(gauge)
        };
        let float_gauge = |name: &str, help: &str| -> Result<Gauge> {
            let gauge = Gauge::new(name, help).map_err(prom_err)?;
            registry.register(Box::new(gauge.clone())).map_err(prom_err)?;
            Ok(gauge)
        };

        Ok(Self {
            total_partitions: int_gauge("partitions_total", "Number of known partitions")?,
            total_size: int_gauge("partitions_bytes", "Serialized size of all partitions")?,
            compressed_partitions: int_gauge(
                "compressed_partitions",
                "Partitions stored in the compressed tier",
            )?,
            compressed_size: int_gauge("compressed_bytes", "Size of all gzip archives")?,
            memory_mapped_partitions: int_gauge(
                "memory_mapped_partitions",
                "Partitions stored in the memory-mapped tier",
            )?,
            disk_cached_partitions: int_gauge(
                "disk_cached_partitions",
                "Partitions stored in the disk-cache tier",
            )?,
            hot_cache_entries: int_gauge("hot_cache_entries", "Partitions resident in the hot cache")?,
            hot_cache_bytes: int_gauge("hot_cache_bytes", "Bytes charged to the hot cache")?,
            cache_hit_rate: float_gauge("cache_hit_rate", "Hits over hits plus misses")?,
            average_compression_ratio: float_gauge(
                "average_compression_ratio",
                "Mean original/compressed ratio over compressed partitions",
            )?,
            registry,
        })
    }

    /// Set every gauge from `stats`
    pub fn update(&self, stats: &StorageStats) {
        self.total_partitions.set(stats.total_partitions as i64);
        self.total_size.set(stats.total_size as i64);
        self.compressed_partitions
            .set(stats.compressed_partitions as i64);
        self.compressed_size.set(stats.compressed_size as i64);
        self.memory_mapped_partitions
            .set(stats.memory_mapped_partitions as i64);
        self.disk_cached_partitions
            .set(stats.disk_cached_partitions as i64);
        self.hot_cache_entries.set(stats.hot_cache_entries as i64);
        self.hot_cache_bytes.set(stats.hot_cache_bytes as i64);
        self.cache_hit_rate.set(stats.cache_hit_rate);
        self.average_compression_ratio
            .set(stats.average_compression_ratio);
    }

    /// Render the registry in the text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("Invalid exposition output: {}", e)))
    }

    /// Registry holding the gauges
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for StatsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsExporter")
            .field("metric_families", &self.registry.gather().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_all_gauges() {
        let exporter = StatsExporter::new().unwrap();
        exporter.update(&StorageStats {
            total_partitions: 3,
            total_size: 4096,
            compressed_partitions: 1,
            compressed_size: 512,
            cache_hit_rate: 0.75,
            average_compression_ratio: 4.0,
            memory_mapped_partitions: 1,
            disk_cached_partitions: 1,
            hot_cache_entries: 2,
            hot_cache_bytes: 1024,
        });

        let text = exporter.render().unwrap();
        assert!(text.contains("tierstore_partitions_total 3"));
        assert!(text.contains("tierstore_partitions_bytes 4096"));
        assert!(text.contains("tierstore_cache_hit_rate 0.75"));
        assert!(text.contains("tierstore_average_compression_ratio 4"));
        assert!(text.contains("tierstore_hot_cache_entries 2"));
        assert_eq!(exporter.registry().gather().len(), 10);
    }

    #[test]
    fn test_independent_registries() {
        let a = StatsExporter::new().unwrap();
        let b = StatsExporter::with_namespace("other").unwrap();
        a.update(&StorageStats {
            total_partitions: 1,
            ..Default::default()
        });

        assert!(a.render().unwrap().contains("tierstore_partitions_total 1"));
        assert!(b.render().unwrap().contains("other_partitions_total 0"));
    }
}
