//! logrelay: a distributed log ingestion and delivery pipeline.
//!
//! A [`CollectorServer`] accepts control sessions over TCP, tails log files
//! on demand, filters and batches the resulting entries, and fans each batch
//! out to the controlling session socket and to a downstream processor
//! uplink. The ingestion engine ([`LogCollector`]) is usable on its own:
//! bind sinks at construction, configure with [`CollectorConfig`], and feed
//! it through `submit_log` or a file tailer.

pub mod collector;
pub mod entry;
pub mod filter;
pub mod level;
pub mod net;
pub mod queue;
pub mod server;
pub mod sink;
pub mod storage;

pub use collector::batch::LogBatch;
pub use collector::{CollectorConfig, CollectorError, CollectorStats, LogCollector};
pub use entry::LogEntry;
pub use filter::{Filter, FilterChain, KeywordFilter, LevelFilter, LogFilter};
pub use level::LogLevel;
pub use net::{TcpTransport, TransportError, UplinkClient, UplinkConfig};
pub use queue::{BoundedQueue, QueueError};
pub use server::{CollectorServer, ServerConfig};
pub use sink::{BatchSink, SinkError};
pub use storage::{
    KvCommand, KvStore, KvStoreConfig, RowStore, RowStoreConfig, StorageError, StorageFactory,
    StorageKind, StoredEntry,
};
