//! Record-oriented storage sink interface.
//!
//! The concrete driver lives outside this crate; the pipeline only depends
//! on the contract: connection liveness, inserts, and the three query shapes
//! the processor uses.

use serde::Deserialize;

use crate::level::LogLevel;

use super::StorageError;

fn default_port() -> u16 {
    3306
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_pool_size() -> usize {
    4
}

/// Connection settings for a row store, parsed from a JSON document.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RowStoreConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    /// Connection timeout in seconds.
    #[serde(default = "default_timeout_secs", rename = "timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_pool_size", rename = "poolSize")]
    pub pool_size: usize,
}

/// One persisted log record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEntry {
    pub source: String,
    pub level: LogLevel,
    /// `%Y-%m-%d %H:%M:%S`, the format the wire carries.
    pub timestamp: String,
    pub message: String,
}

/// Capability implemented by record-oriented storage drivers.
pub trait RowStore: Send + Sync {
    /// Create schema objects the driver needs (idempotent).
    fn initialize(&self) -> Result<(), StorageError>;

    /// Liveness probe.
    fn test_connection(&self) -> bool;

    fn insert_entry(&self, entry: &StoredEntry) -> Result<(), StorageError>;

    /// Insert a group of entries; returns how many were written.
    fn insert_entries(&self, entries: &[StoredEntry]) -> Result<usize, StorageError> {
        for entry in entries {
            self.insert_entry(entry)?;
        }
        Ok(entries.len())
    }

    fn query_by_level(&self, level: LogLevel, limit: usize)
    -> Result<Vec<StoredEntry>, StorageError>;

    fn query_by_source(&self, source: &str, limit: usize)
    -> Result<Vec<StoredEntry>, StorageError>;

    /// Timestamps are inclusive bounds in the wire format above.
    fn query_by_time_range(
        &self,
        from: &str,
        to: &str,
        limit: usize,
    ) -> Result<Vec<StoredEntry>, StorageError>;
}

impl std::fmt::Debug for dyn RowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn RowStore").finish_non_exhaustive()
    }
}
