//! The per-session log collector.
//!
//! [`LogCollector`] composes the filter chain, the bounded queue, the batch
//! dispatch workers, the retry engine, and an optional file tailer behind a
//! submit/flush/shutdown API. Sinks are bound at construction; configuration
//! arrives through [`initialize`](LogCollector::initialize), which may be
//! called again on a live collector to drain and rebuild without losing
//! queued entries.

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod drop_warner;
pub mod tailer;

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use log::warn;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::{
    entry::LogEntry,
    filter::{Filter, FilterChain},
    level::LogLevel,
    queue::BoundedQueue,
    sink::BatchSink,
};

pub use config::CollectorConfig;

use dispatch::{DispatchCtx, DispatchSignal};
use tailer::FileTailer;

/// How long `flush` waits for the drain barrier to be acknowledged.
const FLUSH_ACK_TIMEOUT: Duration = Duration::from_secs(5);
/// How long `shutdown` waits for each worker to signal completion.
const SHUTDOWN_JOIN_DEADLINE: Duration = Duration::from_secs(5);
/// Grace period for the final retry attempt during shutdown.
const SHUTDOWN_RETRY_GRACE: Duration = Duration::from_secs(1);

/// Errors reported by collector lifecycle operations.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectorError {
    /// The supplied configuration cannot be run.
    #[error("invalid collector configuration: {0}")]
    InvalidConfig(String),
    /// The operation requires a running collector.
    #[error("collector is not running")]
    NotRunning,
}

/// Collector lifecycle phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Phase {
    New = 0,
    Running = 1,
    Draining = 2,
    Closed = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Snapshot of the collector counters.
///
/// At steady state `submitted == sent + filtered + errors`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Submit attempts, accepted or not.
    pub submitted: u64,
    /// Entries delivered to every configured sink.
    pub sent: u64,
    /// Entries dropped by the level gate or the filter chain.
    pub filtered: u64,
    /// Entries rejected at submit or dropped after exhausted retries.
    pub errors: u64,
}

#[derive(Default)]
pub(crate) struct StatCounters {
    submitted: AtomicU64,
    sent: AtomicU64,
    filtered: AtomicU64,
    errors: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> CollectorStats {
        CollectorStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn add_submitted(&self, n: u64) {
        self.submitted.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }

    fn add_filtered(&self, n: u64) {
        self.filtered.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_errors(&self, n: u64) {
        self.errors.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn errors_total(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

type SendCallback = Arc<dyn Fn(usize) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// User callbacks, invoked outside every lock.
///
/// A panicking callback is caught and logged; callbacks must never bring the
/// pipeline down.
#[derive(Default)]
pub(crate) struct Callbacks {
    send: RwLock<Option<SendCallback>>,
    error: RwLock<Option<ErrorCallback>>,
}

impl Callbacks {
    pub(crate) fn notify_sent(&self, count: usize) {
        let cb = self.send.read().clone();
        if let Some(cb) = cb
            && catch_unwind(AssertUnwindSafe(|| cb(count))).is_err()
        {
            warn!("LogCollector: send callback panicked; panic discarded");
        }
    }

    pub(crate) fn notify_error(&self, message: &str) {
        let cb = self.error.read().clone();
        if let Some(cb) = cb
            && catch_unwind(AssertUnwindSafe(|| cb(message))).is_err()
        {
            warn!("LogCollector: error callback panicked; panic discarded");
        }
    }
}

/// State shared between the public API, the workers, and the tailer.
pub(crate) struct CollectorShared {
    phase: AtomicU8,
    pub(crate) queue: Arc<BoundedQueue>,
    filters: FilterChain,
    sinks: Arc<Vec<Arc<dyn BatchSink>>>,
    pub(crate) stats: StatCounters,
    pub(crate) callbacks: Callbacks,
    warner: drop_warner::DropWarner,
    /// Hot-path copies of the active configuration.
    min_level: AtomicU8,
    batch_size: AtomicUsize,
    /// Sender feeding the batch workers; absent while not running.
    signal: RwLock<Option<Sender<DispatchSignal>>>,
    /// Thread ids that must not block in `flush` (workers, retry ticker).
    worker_ids: RwLock<HashSet<ThreadId>>,
}

impl CollectorShared {
    fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn register_worker_thread(&self) {
        self.worker_ids.write().insert(thread::current().id());
    }

    /// Submit one entry; the hot path shared with the tailer.
    pub(crate) fn submit(&self, content: String, level: LogLevel) -> bool {
        self.stats.add_submitted(1);
        if self.phase() != Phase::Running {
            self.stats.add_errors(1);
            return false;
        }
        let min_level = LogLevel::try_from(self.min_level.load(Ordering::Relaxed))
            .unwrap_or(LogLevel::Trace);
        if level < min_level {
            self.stats.add_filtered(1);
            return true;
        }
        let entry = LogEntry::new(content, level);
        if self.filters.should_drop(&entry) {
            self.stats.add_filtered(1);
            return true;
        }
        match self.queue.push(entry) {
            Ok(()) => {
                if self.queue.len() >= self.batch_size.load(Ordering::Relaxed) {
                    self.signal_workers(DispatchSignal::Spill);
                }
                true
            }
            Err(_) => {
                self.stats.add_errors(1);
                self.warner.record();
                self.warner.report_if_due(&self.stats, &self.callbacks);
                false
            }
        }
    }

    fn signal_workers(&self, signal: DispatchSignal) {
        if let Some(tx) = self.signal.read().as_ref() {
            // Coalescing is fine: a full signal channel means the workers
            // already have wakeups queued.
            let _ = tx.try_send(signal);
        }
    }
}

struct ThreadStopper {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl ThreadStopper {
    fn stop(self) {
        drop(self.stop_tx);
        if self.handle.join().is_err() {
            warn!("LogCollector: background thread panicked");
        }
    }
}

struct RunningParts {
    ctx: Arc<DispatchCtx>,
    signal_tx: Sender<DispatchSignal>,
    worker_handles: Vec<JoinHandle<()>>,
    done_rx: Receiver<()>,
    timer: ThreadStopper,
    retry: Option<ThreadStopper>,
}

struct Runtime {
    config: CollectorConfig,
    parts: Option<RunningParts>,
    tailer: Option<FileTailer>,
}

/// The public collector handle.
pub struct LogCollector {
    shared: Arc<CollectorShared>,
    runtime: Mutex<Runtime>,
}

impl LogCollector {
    /// Create a collector bound to `sinks`.
    ///
    /// The collector starts in the `New` phase; call
    /// [`initialize`](Self::initialize) before submitting. A collector with
    /// no sinks finalizes every batch as delivered, which keeps unit tests
    /// and loopback setups simple.
    pub fn new(sinks: Vec<Arc<dyn BatchSink>>) -> Self {
        let shared = Arc::new(CollectorShared {
            phase: AtomicU8::new(Phase::New as u8),
            queue: Arc::new(BoundedQueue::new(0, 0)),
            filters: FilterChain::new(),
            sinks: Arc::new(sinks),
            stats: StatCounters::default(),
            callbacks: Callbacks::default(),
            warner: drop_warner::DropWarner::default(),
            min_level: AtomicU8::new(LogLevel::Trace as u8),
            batch_size: AtomicUsize::new(usize::MAX),
            signal: RwLock::new(None),
            worker_ids: RwLock::new(HashSet::new()),
        });
        Self {
            shared,
            runtime: Mutex::new(Runtime {
                config: CollectorConfig::default(),
                parts: None,
                tailer: None,
            }),
        }
    }

    /// Create a collector with no sinks (tests, loopback accounting).
    pub fn disconnected() -> Self {
        Self::new(Vec::new())
    }

    /// Apply `config`, starting or rebuilding the worker set.
    ///
    /// On a `New` or `Closed` collector this transitions to `Running`. On a
    /// `Running` collector it quiesces the workers, swaps the configuration,
    /// and restarts them; entries already queued survive and deliver under
    /// the new configuration. In-flight retries do not survive: each parked
    /// batch is dropped with an error-callback notice.
    pub fn initialize(&self, config: CollectorConfig) -> Result<(), CollectorError> {
        config.validate()?;
        let mut rt = self.runtime.lock();
        match self.shared.phase() {
            Phase::New | Phase::Closed => {
                self.start_running(&mut rt, config);
                Ok(())
            }
            Phase::Running => {
                self.shared.set_phase(Phase::Draining);
                self.quiesce(&mut rt, true);
                self.start_running(&mut rt, config);
                Ok(())
            }
            Phase::Draining => Err(CollectorError::NotRunning),
        }
    }

    fn start_running(&self, rt: &mut Runtime, config: CollectorConfig) {
        let shared = &self.shared;
        shared.queue.set_capacity(config.max_queue_size);
        shared.queue.reserve(config.memory_pool_size);
        shared.queue.reopen();
        shared
            .min_level
            .store(config.min_level as u8, Ordering::Relaxed);
        shared
            .batch_size
            .store(config.batch_size, Ordering::Relaxed);

        let (signal_tx, signal_rx) = bounded(config.thread_pool_size.max(1) * 4);
        let (done_tx, done_rx) = bounded(config.thread_pool_size);
        let ctx = Arc::new(DispatchCtx::new(Arc::clone(&self.shared), &config));

        let mut worker_handles = Vec::with_capacity(config.thread_pool_size);
        for _ in 0..config.thread_pool_size {
            worker_handles.push(dispatch::spawn_worker(
                Arc::clone(&ctx),
                signal_rx.clone(),
                done_tx.clone(),
            ));
        }
        let timer = {
            let (stop_tx, stop_rx) = bounded::<()>(0);
            let queue = Arc::clone(&shared.queue);
            let tx = signal_tx.clone();
            let interval = config.flush_interval;
            let handle = thread::spawn(move || dispatch::timer_loop(queue, tx, stop_rx, interval));
            ThreadStopper { stop_tx, handle }
        };
        let retry = config.enable_retry.then(|| {
            let (stop_tx, stop_rx) = bounded::<()>(0);
            let ctx = Arc::clone(&ctx);
            let interval = config.retry_interval;
            let handle = thread::spawn(move || dispatch::retry_loop(ctx, stop_rx, interval));
            ThreadStopper { stop_tx, handle }
        });

        *shared.signal.write() = Some(signal_tx.clone());
        rt.parts = Some(RunningParts {
            ctx,
            signal_tx,
            worker_handles,
            done_rx,
            timer,
            retry,
        });
        rt.config = config;
        shared.set_phase(Phase::Running);
    }

    /// Stop workers without draining the queue.
    ///
    /// `drop_pending` additionally abandons the retry lists, notifying the
    /// error callback per dropped batch (reconfigure semantics). Uses the
    /// same bounded-join protocol as shutdown.
    fn quiesce(&self, rt: &mut Runtime, drop_pending: bool) {
        let Some(parts) = rt.parts.take() else {
            return;
        };
        *self.shared.signal.write() = None;
        parts.timer.stop();
        if let Some(retry) = parts.retry {
            retry.stop();
        }
        for _ in 0..parts.worker_handles.len() {
            let _ = parts.signal_tx.send(DispatchSignal::Quiesce);
        }
        drop(parts.signal_tx);
        Self::join_workers(
            parts.worker_handles,
            &parts.done_rx,
            &self.shared,
            "reconfigure",
        );
        self.shared.worker_ids.write().clear();
        if drop_pending {
            dispatch::drop_pending(&parts.ctx, "reconfigured");
        }
    }

    /// Wait for every worker to signal completion within the join deadline;
    /// leak stragglers with an error-callback notice rather than hanging.
    fn join_workers(
        handles: Vec<JoinHandle<()>>,
        done_rx: &Receiver<()>,
        shared: &CollectorShared,
        context: &str,
    ) {
        let deadline = std::time::Instant::now() + SHUTDOWN_JOIN_DEADLINE;
        let mut joined = 0usize;
        for _ in 0..handles.len() {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if done_rx.recv_timeout(remaining).is_ok() {
                joined += 1;
            } else {
                break;
            }
        }
        if joined < handles.len() {
            let stuck = handles.len() - joined;
            shared
                .callbacks
                .notify_error(&format!("{stuck} batch workers did not stop at {context}"));
            warn!("LogCollector: leaking {stuck} batch workers after {context} deadline");
        } else {
            for handle in handles {
                if handle.join().is_err() {
                    warn!("LogCollector: batch worker panicked");
                }
            }
        }
    }

    /// Submit one log line. Returns `true` when the entry was accepted
    /// (filtered-out entries count as accepted).
    pub fn submit_log(&self, content: impl Into<String>, level: LogLevel) -> bool {
        self.shared.submit(content.into(), level)
    }

    /// Submit several lines at one level. Each entry succeeds or fails
    /// independently; the call returns `true` iff all succeeded.
    pub fn submit_logs<I, S>(&self, contents: I, level: LogLevel) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = true;
        for content in contents {
            all &= self.shared.submit(content.into(), level);
        }
        all
    }

    /// Append a filter to the chain. Entries already queued are unaffected.
    pub fn add_filter(&self, filter: Filter) {
        self.shared.filters.add(filter);
    }

    /// Remove every filter. Does not retroactively un-filter anything.
    pub fn clear_filters(&self) {
        self.shared.filters.clear();
    }

    /// Install the callback fired with the entry count of each delivered
    /// batch. Runs outside all locks; panics are caught and discarded.
    pub fn set_send_callback(&self, callback: impl Fn(usize) + Send + Sync + 'static) {
        *self.shared.callbacks.send.write() = Some(Arc::new(callback));
    }

    /// Install the callback fired with a message for each failure.
    pub fn set_error_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.shared.callbacks.error.write() = Some(Arc::new(callback));
    }

    /// Block until every entry accepted before this call has been handed to
    /// a sink or recorded as an error.
    ///
    /// Calling from a batch worker thread (e.g. inside a callback) cannot
    /// block without risking deadlock; such calls enqueue the drain and
    /// return immediately.
    pub fn flush(&self) -> bool {
        let Some(tx) = self.shared.signal.read().clone() else {
            return false;
        };
        // Pending rejection reports go out with the flush, interval or not.
        self.shared
            .warner
            .flush_pending(&self.shared.stats, &self.shared.callbacks);
        if self
            .shared
            .worker_ids
            .read()
            .contains(&thread::current().id())
        {
            let _ = tx.try_send(DispatchSignal::Sweep);
            return true;
        }
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(DispatchSignal::Barrier(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(FLUSH_ACK_TIMEOUT).is_ok()
    }

    /// Start tailing `path`, submitting new lines at `min_level` every
    /// `interval`, at most `max_lines_per_tick` lines per tick. A second
    /// call replaces the running tailer.
    pub fn collect_from_file(
        &self,
        path: impl Into<PathBuf>,
        min_level: LogLevel,
        interval: Duration,
        max_lines_per_tick: usize,
    ) -> Result<(), CollectorError> {
        let mut rt = self.runtime.lock();
        if self.shared.phase() != Phase::Running {
            return Err(CollectorError::NotRunning);
        }
        if let Some(old) = rt.tailer.take() {
            old.stop();
        }
        rt.tailer = Some(FileTailer::spawn(
            Arc::clone(&self.shared),
            path.into(),
            min_level,
            interval,
            max_lines_per_tick,
        ));
        Ok(())
    }

    /// Transition to `Closed`: stop the tailer, flush the queue with best
    /// effort, give parked retries one final attempt, and join the workers.
    ///
    /// Joins are bounded by a deadline; a worker that fails to stop in time
    /// is reported through the error callback and leaked rather than hanging
    /// the caller. After `shutdown` returns no submit succeeds and no
    /// callback fires.
    pub fn shutdown(&self) {
        let mut rt = self.runtime.lock();
        if self.shared.phase() == Phase::Closed {
            return;
        }
        self.shared.set_phase(Phase::Draining);
        if let Some(tailer) = rt.tailer.take() {
            tailer.stop();
        }
        self.shared.queue.close();

        let Some(parts) = rt.parts.take() else {
            self.shared
                .warner
                .flush_pending(&self.shared.stats, &self.shared.callbacks);
            self.shared.set_phase(Phase::Closed);
            return;
        };
        *self.shared.signal.write() = None;
        parts.timer.stop();
        if let Some(retry) = parts.retry {
            retry.stop();
        }

        // Best-effort drain of whatever is still queued.
        let (ack_tx, ack_rx) = bounded(1);
        if parts
            .signal_tx
            .send(DispatchSignal::Barrier(ack_tx))
            .is_ok()
        {
            let _ = ack_rx.recv_timeout(SHUTDOWN_JOIN_DEADLINE);
        }
        dispatch::final_retry_pass(&parts.ctx, SHUTDOWN_RETRY_GRACE);

        for _ in 0..parts.worker_handles.len() {
            let _ = parts.signal_tx.send(DispatchSignal::Quiesce);
        }
        drop(parts.signal_tx);
        Self::join_workers(
            parts.worker_handles,
            &parts.done_rx,
            &self.shared,
            "shutdown",
        );
        self.shared.worker_ids.write().clear();
        // Last chance for pending rejection reports; after the phase flips
        // no callback may fire.
        self.shared
            .warner
            .flush_pending(&self.shared.stats, &self.shared.callbacks);
        self.shared.set_phase(Phase::Closed);
    }

    /// Snapshot the submitted/sent/filtered/errors counters.
    pub fn stats(&self) -> CollectorStats {
        self.shared.stats.snapshot()
    }

    /// Number of entries currently queued.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether the collector currently accepts submissions.
    pub fn is_running(&self) -> bool {
        self.shared.phase() == Phase::Running
    }
}

impl Drop for LogCollector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
