//! Batches: the unit of retry and fan-out.
//!
//! A [`LogBatch`] is an ordered group of entries drained from one collector's
//! queue. Sinks serialize a batch to their own wire format and, when the
//! collector was configured with `compress_batches`, gzip the payload just
//! before handing it to the socket.

use std::io::{self, Write};
use std::sync::Arc;

use flate2::{Compression, write::GzEncoder};

use crate::entry::LogEntry;

#[derive(Clone, Debug)]
pub struct LogBatch {
    /// Label of the collector that produced the batch.
    collector_id: Arc<str>,
    /// Per-collector sequence number; batches deliver in sequence order.
    seq: u64,
    entries: Vec<LogEntry>,
    compress: bool,
}

impl LogBatch {
    pub fn new(collector_id: Arc<str>, seq: u64, entries: Vec<LogEntry>, compress: bool) -> Self {
        Self {
            collector_id,
            seq,
            entries,
            compress,
        }
    }

    #[inline]
    pub fn collector_id(&self) -> &str {
        &self.collector_id
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn compress(&self) -> bool {
        self.compress
    }

    /// Gzip `payload` when the batch asks for compression, else pass through.
    pub fn finalize_payload(&self, payload: Vec<u8>) -> io::Result<Vec<u8>> {
        if !self.compress {
            return Ok(payload);
        }
        compress_payload(&payload)
    }
}

/// Gzip a serialized batch payload.
pub fn compress_payload(payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), Compression::fast());
    encoder.write_all(payload)?;
    encoder.finish()
}
