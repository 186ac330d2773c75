//! Error types for the tiered partition store

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the partition store
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Payload Errors
    // =========================================================================
    /// Payload could not be serialized
    #[error("Failed to serialize partition {partition_id}: {source}")]
    Serialization {
        partition_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// Stored bytes could not be turned back into a payload
    #[error("Failed to deserialize partition {partition_id}: {source}")]
    Deserialization {
        partition_id: String,
        #[source]
        source: serde_json::Error,
    },

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    Compression { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    Decompression { algorithm: String, reason: String },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// File I/O failed on one of the durable tiers
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored content does not match its recorded checksum
    #[error("Checksum mismatch for partition {partition_id}: expected {expected}, found {actual}")]
    Integrity {
        partition_id: String,
        expected: String,
        actual: String,
    },

    /// Configuration error (invalid values or unwritable storage directory)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation issued before `initialize` or after `shutdown`
    #[error("Partition store is not initialized")]
    NotInitialized,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Short, stable name of the error kind (used in `StorageError` events).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Serialization { .. } => "SerializationError",
            Error::Deserialization { .. } => "DeserializationError",
            Error::Compression { .. } | Error::Decompression { .. } => "CompressionError",
            Error::Io { .. } => "IOError",
            Error::Integrity { .. } => "IntegrityError",
            Error::Config(_) => "ConfigurationError",
            Error::NotInitialized => "NotInitialized",
            Error::Internal(_) => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_includes_path() {
        let err = Error::io(
            "/tmp/partitions/cache/a.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/partitions/cache/a.json"));
        assert!(msg.contains("denied"));
        assert_eq!(err.kind(), "IOError");
    }

    #[test]
    fn test_error_kinds() {
        let err = Error::Decompression {
            algorithm: "gzip".into(),
            reason: "corrupt deflate stream".into(),
        };
        assert_eq!(err.kind(), "CompressionError");
        assert_eq!(Error::Config("bad level".into()).kind(), "ConfigurationError");
        assert_eq!(Error::NotInitialized.kind(), "NotInitialized");
    }
}
