//! Rate-limited reporting of rejected submissions.
//!
//! Queue-full rejections arrive in floods. Each one lands in the error
//! counter immediately, but reporting is aggregated here: at most one report
//! per interval goes out through the process log and the collector's error
//! callback, carrying the running submit-error total. `flush_pending` forces
//! the report out regardless of the interval; the collector calls it on
//! `flush` and `shutdown` so a burst right before teardown still surfaces.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::warn;

use super::{Callbacks, StatCounters};

/// How often rejected-entry reports may be emitted by default.
pub(crate) const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Aggregates rejected submissions between reports.
pub(crate) struct DropWarner {
    interval_ms: u64,
    /// Origin for the report timestamps below.
    started: Instant,
    /// Rejections accumulated since the last report.
    dropped: AtomicU64,
    /// Milliseconds since `started` of the last report; `u64::MAX` until the
    /// first one goes out.
    last_report: AtomicU64,
}

impl DropWarner {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            started: Instant::now(),
            dropped: AtomicU64::new(0),
            last_report: AtomicU64::new(u64::MAX),
        }
    }

    /// Count one rejected submission.
    pub(crate) fn record(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit a report unless one already went out within the interval.
    pub(crate) fn report_if_due(&self, stats: &StatCounters, callbacks: &Callbacks) {
        let now = self.started.elapsed().as_millis() as u64;
        let prev = self.last_report.load(Ordering::Relaxed);
        if prev != u64::MAX && now.saturating_sub(prev) < self.interval_ms {
            return;
        }
        self.emit(now, stats, callbacks);
    }

    /// Emit whatever is pending regardless of the interval.
    pub(crate) fn flush_pending(&self, stats: &StatCounters, callbacks: &Callbacks) {
        let now = self.started.elapsed().as_millis() as u64;
        self.emit(now, stats, callbacks);
    }

    fn emit(&self, now: u64, stats: &StatCounters, callbacks: &Callbacks) {
        let count = self.dropped.swap(0, Ordering::Relaxed);
        if count == 0 {
            return;
        }
        self.last_report.store(now, Ordering::Relaxed);
        let total = stats.errors_total();
        let message = format!("rejected {count} entries; {total} submit errors in total");
        warn!("LogCollector: {message}");
        callbacks.notify_error(&message);
    }
}

impl Default for DropWarner {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_INTERVAL)
    }
}
