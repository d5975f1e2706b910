//! Collector configuration.
//!
//! [`CollectorConfig`] groups every knob a collector honours. Defaults favour
//! local development; servers override per session from the control protocol.

use std::time::Duration;

use crate::level::LogLevel;

use super::CollectorError;

/// Default number of entries per flushed batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Default interval after which a non-empty queue is flushed regardless of size.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(500);
/// Default hard cap on queued entries.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;
/// Default number of batch dispatch workers.
pub const DEFAULT_THREAD_POOL_SIZE: usize = 2;
/// Default pre-allocation hint for queue backing storage.
pub const DEFAULT_MEMORY_POOL_SIZE: usize = 4096;
/// Default number of re-attempts for a failed batch.
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 3;
/// Default pause between retry passes.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a [`LogCollector`](super::LogCollector).
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    /// Opaque label attached to outbound batches.
    pub collector_id: String,
    /// Default uplink address; the transport layer overrides it when the
    /// collector is owned by a server session.
    pub server_addr: String,
    /// Default uplink port.
    pub server_port: u16,
    /// Flush as soon as the queue holds this many entries. Must be >= 1.
    pub batch_size: usize,
    /// Flush when this long has elapsed since the previous flush and the
    /// queue is non-empty. Must be non-zero.
    pub flush_interval: Duration,
    /// Hard cap on queued entries; further submits fail.
    pub max_queue_size: usize,
    /// Number of batch dispatch workers. Must be >= 1.
    pub thread_pool_size: usize,
    /// Pre-allocation hint for entry storage reuse.
    pub memory_pool_size: usize,
    /// Entries strictly below this level are dropped before queue insertion.
    pub min_level: LogLevel,
    /// Gzip serialized batch payloads before sink handoff.
    pub compress_batches: bool,
    /// Park failed batches for re-attempts instead of dropping them.
    pub enable_retry: bool,
    /// Attempts beyond the first before a parked batch is dropped.
    pub max_retry_count: u32,
    /// Pause between retry passes. Must be non-zero when retry is enabled.
    pub retry_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            collector_id: "collector".to_owned(),
            server_addr: "127.0.0.1".to_owned(),
            server_port: 9001,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
            memory_pool_size: DEFAULT_MEMORY_POOL_SIZE,
            min_level: LogLevel::Info,
            compress_batches: false,
            enable_retry: true,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl CollectorConfig {
    /// Check the config for values a collector cannot run with.
    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.batch_size == 0 {
            return Err(CollectorError::InvalidConfig(
                "batch_size must be greater than zero".into(),
            ));
        }
        if self.thread_pool_size == 0 {
            return Err(CollectorError::InvalidConfig(
                "thread_pool_size must be greater than zero".into(),
            ));
        }
        if self.flush_interval.is_zero() {
            return Err(CollectorError::InvalidConfig(
                "flush_interval must be non-zero".into(),
            ));
        }
        if self.enable_retry && self.retry_interval.is_zero() {
            return Err(CollectorError::InvalidConfig(
                "retry_interval must be non-zero when retry is enabled".into(),
            ));
        }
        Ok(())
    }
}
