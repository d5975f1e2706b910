//! Batch dispatch: the workers, the flush timer, and the retry engine.
//!
//! Workers consume [`DispatchSignal`]s. Batch formation and sink handoff are
//! serialized under one dispatch lock so entries reach every sink in
//! submission order; a failed batch parks in its sink's FIFO retry list and
//! blocks later batches for that sink only. Batch outcomes (counters and user
//! callbacks) are finalized outside the lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::warn;
use parking_lot::Mutex;

use crate::queue::BoundedQueue;
use crate::sink::BatchSink;

use super::batch::LogBatch;
use super::{CollectorConfig, CollectorShared};

/// Wakeups consumed by the batch workers.
pub(crate) enum DispatchSignal {
    /// The queue reached `batch_size`: drain full batches.
    Spill,
    /// The flush interval elapsed or a flush was requested from a worker
    /// thread: drain everything queued.
    Sweep,
    /// Explicit flush barrier; acknowledged once the queue is fully drained.
    Barrier(Sender<()>),
    /// Stop one worker without touching the queue (reconfigure/shutdown).
    Quiesce,
}

#[derive(Clone)]
struct PendingBatch {
    batch: LogBatch,
    /// Delivery attempts already made for this sink.
    attempts: u32,
}

struct BatchProgress {
    len: usize,
    remaining: usize,
    /// First failure message, if any sink gave up on the batch.
    failed: Option<String>,
}

struct Outcome {
    len: usize,
    error: Option<String>,
}

struct DispatchState {
    next_seq: u64,
    /// One FIFO retry list per sink, indexed like `DispatchCtx::sinks`.
    pending: Vec<VecDeque<PendingBatch>>,
    /// Per-batch completion tracking across sinks, keyed by sequence number.
    progress: HashMap<u64, BatchProgress>,
}

/// Everything a dispatch pass needs, snapshotted at `initialize` time.
pub(crate) struct DispatchCtx {
    shared: Arc<CollectorShared>,
    sinks: Arc<Vec<Arc<dyn BatchSink>>>,
    state: Mutex<DispatchState>,
    collector_id: Arc<str>,
    batch_size: usize,
    compress: bool,
    enable_retry: bool,
    max_retry_count: u32,
}

impl DispatchCtx {
    pub(crate) fn new(shared: Arc<CollectorShared>, config: &CollectorConfig) -> Self {
        let sinks = Arc::clone(&shared.sinks);
        let pending = (0..sinks.len()).map(|_| VecDeque::new()).collect();
        Self {
            shared,
            sinks,
            state: Mutex::new(DispatchState {
                next_seq: 0,
                pending,
                progress: HashMap::new(),
            }),
            collector_id: Arc::from(config.collector_id.as_str()),
            batch_size: config.batch_size,
            compress: config.compress_batches,
            enable_retry: config.enable_retry,
            max_retry_count: config.max_retry_count,
        }
    }

    fn queue(&self) -> &BoundedQueue {
        &self.shared.queue
    }
}

/// Spawn one batch worker consuming `rx`.
pub(crate) fn spawn_worker(
    ctx: Arc<DispatchCtx>,
    rx: Receiver<DispatchSignal>,
    done_tx: Sender<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        ctx.shared.register_worker_thread();
        for signal in rx.iter() {
            match signal {
                DispatchSignal::Spill => {
                    while ctx.queue().len() >= ctx.batch_size {
                        if !dispatch_once(&ctx) {
                            break;
                        }
                    }
                }
                DispatchSignal::Sweep => while dispatch_once(&ctx) {},
                DispatchSignal::Barrier(ack) => {
                    while dispatch_once(&ctx) {}
                    let _ = ack.send(());
                }
                DispatchSignal::Quiesce => break,
            }
        }
        let _ = done_tx.send(());
    })
}

/// Flush-interval ticker: sweep the queue whenever it is non-empty and the
/// interval elapsed.
pub(crate) fn timer_loop(
    queue: Arc<BoundedQueue>,
    tx: Sender<DispatchSignal>,
    stop_rx: Receiver<()>,
    interval: Duration,
) {
    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                if !queue.is_empty() {
                    let _ = tx.try_send(DispatchSignal::Sweep);
                }
            }
            _ => break,
        }
    }
}

/// Retry ticker: re-attempt parked batches every `interval`.
pub(crate) fn retry_loop(ctx: Arc<DispatchCtx>, stop_rx: Receiver<()>, interval: Duration) {
    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => retry_pass(&ctx),
            _ => break,
        }
    }
}

/// Drain and deliver one batch. Returns `false` when the queue was empty.
fn dispatch_once(ctx: &DispatchCtx) -> bool {
    let mut outcomes = Vec::new();
    {
        let mut st = ctx.state.lock();
        let entries = ctx.queue().drain_up_to(ctx.batch_size);
        if entries.is_empty() {
            return false;
        }
        let seq = st.next_seq;
        st.next_seq += 1;
        let len = entries.len();
        let batch = LogBatch::new(Arc::clone(&ctx.collector_id), seq, entries, ctx.compress);

        if ctx.sinks.is_empty() {
            outcomes.push(Outcome { len, error: None });
        } else {
            st.progress.insert(
                seq,
                BatchProgress {
                    len,
                    remaining: ctx.sinks.len(),
                    failed: None,
                },
            );
            for (idx, sink) in ctx.sinks.iter().enumerate() {
                if !st.pending[idx].is_empty() {
                    // A parked batch blocks this sink; keep FIFO order.
                    st.pending[idx].push_back(PendingBatch {
                        batch: batch.clone(),
                        attempts: 0,
                    });
                    continue;
                }
                match sink.deliver(&batch) {
                    Ok(()) => complete_sink(&mut st, seq, None, &mut outcomes),
                    Err(err) if ctx.enable_retry && err.is_retryable() && ctx.max_retry_count >= 1 => {
                        st.pending[idx].push_back(PendingBatch {
                            batch: batch.clone(),
                            attempts: 1,
                        });
                    }
                    Err(err) => {
                        let msg = format!("batch {seq} dropped for sink {}: {err}", sink.name());
                        complete_sink(&mut st, seq, Some(msg), &mut outcomes);
                    }
                }
            }
        }
    }
    finalize(ctx, outcomes);
    true
}

/// One pass of the retry engine over every sink's parked batches.
fn retry_pass(ctx: &DispatchCtx) {
    let mut outcomes = Vec::new();
    {
        let mut st = ctx.state.lock();
        for (idx, sink) in ctx.sinks.iter().enumerate() {
            loop {
                let Some(head) = st.pending[idx].front() else {
                    break;
                };
                let attempts_made = head.attempts + 1;
                let result = sink.deliver(&head.batch);
                match result {
                    Ok(()) => {
                        let Some(done) = st.pending[idx].pop_front() else {
                            break;
                        };
                        complete_sink(&mut st, done.batch.seq(), None, &mut outcomes);
                    }
                    Err(err) if err.is_retryable() && attempts_made <= ctx.max_retry_count => {
                        if let Some(head) = st.pending[idx].front_mut() {
                            head.attempts = attempts_made;
                        }
                        // The failed head keeps blocking this sink's FIFO.
                        break;
                    }
                    Err(err) => {
                        let Some(dropped) = st.pending[idx].pop_front() else {
                            break;
                        };
                        let msg = format!(
                            "batch {} dropped for sink {} after {attempts_made} attempts: {err}",
                            dropped.batch.seq(),
                            sink.name()
                        );
                        complete_sink(&mut st, dropped.batch.seq(), Some(msg), &mut outcomes);
                    }
                }
            }
        }
    }
    finalize(ctx, outcomes);
}

/// Shutdown path: one last attempt per parked batch inside `grace`, then
/// drop whatever is left.
pub(crate) fn final_retry_pass(ctx: &DispatchCtx, grace: Duration) {
    let deadline = Instant::now() + grace;
    let mut outcomes = Vec::new();
    {
        let Some(mut st) = ctx.state.try_lock_for(grace) else {
            warn!("LogCollector: dispatch busy at shutdown; abandoning parked batches");
            return;
        };
        for (idx, sink) in ctx.sinks.iter().enumerate() {
            while let Some(parked) = st.pending[idx].pop_front() {
                if Instant::now() < deadline && sink.deliver(&parked.batch).is_ok() {
                    complete_sink(&mut st, parked.batch.seq(), None, &mut outcomes);
                    continue;
                }
                let msg = format!(
                    "batch {} dropped for sink {} at shutdown",
                    parked.batch.seq(),
                    sink.name()
                );
                complete_sink(&mut st, parked.batch.seq(), Some(msg), &mut outcomes);
            }
        }
    }
    finalize(ctx, outcomes);
}

/// Reconfigure path: abandon every parked batch with an error notice.
pub(crate) fn drop_pending(ctx: &DispatchCtx, reason: &str) {
    let mut outcomes = Vec::new();
    {
        let mut st = ctx.state.lock();
        for (idx, sink) in ctx.sinks.iter().enumerate() {
            while let Some(parked) = st.pending[idx].pop_front() {
                let msg = format!(
                    "batch {} dropped for sink {}: {reason}",
                    parked.batch.seq(),
                    sink.name()
                );
                complete_sink(&mut st, parked.batch.seq(), Some(msg), &mut outcomes);
            }
        }
    }
    finalize(ctx, outcomes);
}

/// Record one sink finishing with a batch; emit an outcome when it was the
/// last sink standing.
fn complete_sink(
    st: &mut DispatchState,
    seq: u64,
    failure: Option<String>,
    outcomes: &mut Vec<Outcome>,
) {
    if let Some(progress) = st.progress.get_mut(&seq) {
        if let Some(msg) = failure {
            progress.failed.get_or_insert(msg);
        }
        progress.remaining = progress.remaining.saturating_sub(1);
        if progress.remaining == 0
            && let Some(progress) = st.progress.remove(&seq)
        {
            outcomes.push(Outcome {
                len: progress.len,
                error: progress.failed,
            });
        }
    }
}

/// Counters and user callbacks, invoked outside the dispatch lock. Each
/// batch finalizes exactly once.
fn finalize(ctx: &DispatchCtx, outcomes: Vec<Outcome>) {
    for outcome in outcomes {
        match outcome.error {
            None => {
                ctx.shared.stats.add_sent(outcome.len as u64);
                ctx.shared.callbacks.notify_sent(outcome.len);
            }
            Some(msg) => {
                ctx.shared.stats.add_errors(outcome.len as u64);
                warn!("LogCollector: {msg}");
                ctx.shared.callbacks.notify_error(&msg);
            }
        }
    }
}
