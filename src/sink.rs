//! Batch delivery endpoints.
//!
//! A collector owns a fixed set of [`BatchSink`]s, bound at construction.
//! Each sink serializes batches to its own wire format and reports failures
//! split into retryable and permanent so the retry engine can park or drop.

use thiserror::Error;

use crate::collector::batch::LogBatch;

/// Errors reported by sink implementations when delivering a batch.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink is temporarily unreachable; the batch may be retried.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
    /// The sink rejected the batch for good; retrying cannot help.
    #[error("sink failure: {0}")]
    Permanent(String),
}

impl SinkError {
    /// Whether the retry engine should park the batch for another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Trait implemented by all batch delivery endpoints.
///
/// Sinks are `Send + Sync`: the batch workers and the retry ticker call
/// `deliver` from different threads, one batch at a time per sink.
pub trait BatchSink: Send + Sync {
    /// Short identifier used in diagnostics and error callbacks.
    fn name(&self) -> &str;

    /// Deliver one batch. Per-collector FIFO order is guaranteed by the
    /// caller; implementations only need to move bytes.
    fn deliver(&self, batch: &LogBatch) -> Result<(), SinkError>;
}
