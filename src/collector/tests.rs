//! Tests for the collector lifecycle, batching, retry, and accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rstest::{fixture, rstest};

use crate::collector::{CollectorConfig, CollectorError, CollectorStats, LogCollector};
use crate::filter::{Filter, KeywordFilter, LevelFilter};
use crate::level::LogLevel;
use crate::sink::{BatchSink, SinkError};

use super::batch::LogBatch;

/// Sink recording every delivered batch; availability is switchable so tests
/// can simulate an outage.
struct CollectingSink {
    name: &'static str,
    available: AtomicBool,
    attempts: AtomicUsize,
    batches: Mutex<Vec<Vec<(LogLevel, String)>>>,
}

impl CollectingSink {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            available: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        })
    }

    fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn entries(&self) -> Vec<(LogLevel, String)> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    fn contents(&self) -> Vec<String> {
        self.entries().into_iter().map(|(_, c)| c).collect()
    }
}

impl BatchSink for CollectingSink {
    fn name(&self) -> &str {
        self.name
    }

    fn deliver(&self, batch: &LogBatch) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("sink offline".into()));
        }
        let entries = batch
            .entries()
            .iter()
            .map(|e| (e.level(), e.content().to_owned()))
            .collect();
        self.batches.lock().push(entries);
        Ok(())
    }
}

/// Sink that always fails permanently.
struct BrokenSink;

impl BatchSink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    fn deliver(&self, _batch: &LogBatch) -> Result<(), SinkError> {
        Err(SinkError::Permanent("malformed sink config".into()))
    }
}

/// Callback counters shared with the collector under test.
#[derive(Default)]
struct Observed {
    sent_calls: Mutex<Vec<usize>>,
    errors: Mutex<Vec<String>>,
}

impl Observed {
    fn install(observed: &Arc<Self>, collector: &LogCollector) {
        let sent = Arc::clone(observed);
        collector.set_send_callback(move |count| sent.sent_calls.lock().push(count));
        let errs = Arc::clone(observed);
        collector.set_error_callback(move |msg| errs.errors.lock().push(msg.to_owned()));
    }

    fn sent_total(&self) -> usize {
        self.sent_calls.lock().iter().sum()
    }

    fn error_count(&self) -> usize {
        self.errors.lock().len()
    }
}

fn quick_config() -> CollectorConfig {
    CollectorConfig {
        batch_size: 10,
        flush_interval: Duration::from_millis(100),
        retry_interval: Duration::from_millis(50),
        thread_pool_size: 2,
        ..CollectorConfig::default()
    }
}

/// Config whose timer never interferes; tests drive flushes explicitly.
fn manual_config() -> CollectorConfig {
    CollectorConfig {
        batch_size: 100,
        flush_interval: Duration::from_secs(3600),
        retry_interval: Duration::from_secs(3600),
        ..CollectorConfig::default()
    }
}

fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[fixture]
fn observed() -> Arc<Observed> {
    Arc::new(Observed::default())
}

fn assert_steady_state(stats: CollectorStats) {
    assert_eq!(
        stats.submitted,
        stats.sent + stats.filtered + stats.errors,
        "steady state accounting violated: {stats:?}"
    );
}

/// Level gate: DEBUG below INFO is filtered, the rest delivered.
#[rstest]
fn min_level_filters_before_the_queue(observed: Arc<Observed>) {
    let sink = CollectingSink::new("session");
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    Observed::install(&observed, &collector);
    collector
        .initialize(CollectorConfig {
            min_level: LogLevel::Info,
            ..quick_config()
        })
        .expect("initialize");

    assert!(collector.submit_log("a", LogLevel::Debug));
    assert!(collector.submit_log("b", LogLevel::Info));
    assert!(collector.submit_log("c", LogLevel::Warning));
    assert!(collector.flush());

    assert!(wait_until(Duration::from_secs(1), || {
        observed.sent_total() == 2
    }));
    assert_eq!(
        sink.entries(),
        vec![
            (LogLevel::Info, "b".to_owned()),
            (LogLevel::Warning, "c".to_owned()),
        ]
    );
    let stats = collector.stats();
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.sent, 2);
    assert_steady_state(stats);
}

/// Overflow: the queue is a shaper; beyond capacity submits fail hard.
#[rstest]
fn overflow_rejects_submits_beyond_capacity() {
    let collector = LogCollector::disconnected();
    collector
        .initialize(CollectorConfig {
            max_queue_size: 3,
            min_level: LogLevel::Trace,
            ..manual_config()
        })
        .expect("initialize");

    let results: Vec<bool> = (1..=5)
        .map(|i| collector.submit_log(format!("e{i}"), LogLevel::Info))
        .collect();
    assert_eq!(results, [true, true, true, false, false]);
    assert_eq!(collector.queued(), 3);
    let stats = collector.stats();
    assert_eq!(stats.errors, 2);
    assert_eq!(stats.submitted, 5);
}

/// Keyword + level filters combined; first drop short-circuits.
#[rstest]
fn keyword_and_level_filters_compose(observed: Arc<Observed>) {
    let sink = CollectingSink::new("session");
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    Observed::install(&observed, &collector);
    collector
        .initialize(CollectorConfig {
            min_level: LogLevel::Trace,
            ..quick_config()
        })
        .expect("initialize");
    collector.add_filter(Filter::Keyword(KeywordFilter::rejecting(vec![
        "error".to_owned(),
    ])));
    collector.add_filter(Filter::Level(LevelFilter::new(LogLevel::Info)));

    assert!(collector.submit_log("ok", LogLevel::Info));
    assert!(collector.submit_log("boom", LogLevel::Error));
    assert!(collector.submit_log("has error here", LogLevel::Info));
    assert!(collector.submit_log("x", LogLevel::Trace));
    assert!(collector.flush());

    assert_eq!(
        sink.entries(),
        vec![
            (LogLevel::Info, "ok".to_owned()),
            (LogLevel::Error, "boom".to_owned()),
        ]
    );
    assert_eq!(collector.stats().filtered, 2);
}

#[rstest]
fn clear_filters_is_not_retroactive() {
    let sink = CollectingSink::new("session");
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    collector
        .initialize(CollectorConfig {
            min_level: LogLevel::Trace,
            ..manual_config()
        })
        .expect("initialize");
    collector.add_filter(Filter::Keyword(KeywordFilter::rejecting(vec![
        "secret".to_owned(),
    ])));
    assert!(collector.submit_log("secret stuff", LogLevel::Info));
    collector.clear_filters();
    assert!(collector.submit_log("public stuff", LogLevel::Info));
    assert!(collector.flush());

    assert_eq!(sink.contents(), vec!["public stuff".to_owned()]);
    assert_eq!(collector.stats().filtered, 1);
}

/// batch_size=1 flushes every accepted entry individually.
#[rstest]
fn unit_batch_size_emits_one_batch_per_entry() {
    let sink = CollectingSink::new("session");
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    collector
        .initialize(CollectorConfig {
            batch_size: 1,
            flush_interval: Duration::from_secs(3600),
            ..CollectorConfig::default()
        })
        .expect("initialize");

    for i in 0..3 {
        assert!(collector.submit_log(format!("e{i}"), LogLevel::Info));
    }
    assert!(collector.flush());

    assert_eq!(sink.batch_count(), 3);
    assert!(sink.batches.lock().iter().all(|b| b.len() == 1));
    assert_eq!(sink.contents(), vec!["e0", "e1", "e2"]);
}

#[rstest]
fn submits_fail_outside_running_phase() {
    let collector = LogCollector::disconnected();
    assert!(!collector.submit_log("too early", LogLevel::Info));
    collector.initialize(manual_config()).expect("initialize");
    assert!(collector.submit_log("ok", LogLevel::Info));
    collector.shutdown();
    assert!(!collector.submit_log("too late", LogLevel::Info));
    assert!(!collector.flush());
}

#[rstest]
fn invalid_config_is_rejected_and_collector_stays_down() {
    let collector = LogCollector::disconnected();
    let err = collector
        .initialize(CollectorConfig {
            batch_size: 0,
            ..CollectorConfig::default()
        })
        .expect_err("zero batch size must fail");
    assert!(matches!(err, CollectorError::InvalidConfig(_)));
    assert!(!collector.is_running());
    assert!(!collector.submit_log("nope", LogLevel::Info));
}

/// Shutdown drains: everything accepted is delivered, then the door closes.
#[rstest]
fn shutdown_drains_queued_entries(observed: Arc<Observed>) {
    let sink = CollectingSink::new("session");
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    Observed::install(&observed, &collector);
    collector
        .initialize(CollectorConfig {
            batch_size: 10,
            flush_interval: Duration::from_secs(3600),
            ..CollectorConfig::default()
        })
        .expect("initialize");

    for i in 0..50 {
        assert!(collector.submit_log(format!("e{i}"), LogLevel::Info));
    }
    collector.shutdown();

    assert_eq!(observed.sent_total(), 50);
    assert_eq!(observed.error_count(), 0);
    assert_eq!(sink.entries().len(), 50);
    assert!(!collector.submit_log("late", LogLevel::Info));
    assert_eq!(collector.stats().sent, 50);
}

#[rstest]
fn submit_logs_is_atomic_per_entry() {
    let collector = LogCollector::disconnected();
    collector
        .initialize(CollectorConfig {
            max_queue_size: 3,
            ..manual_config()
        })
        .expect("initialize");

    assert!(!collector.submit_logs(["a", "b", "c", "d", "e"], LogLevel::Info));
    assert_eq!(collector.queued(), 3);
    let stats = collector.stats();
    assert_eq!(stats.errors, 2);
}

/// Rejections report through the error callback: the first immediately, the
/// rest aggregated and force-flushed by `flush`.
#[rstest]
fn queue_full_rejections_are_reported_on_flush(observed: Arc<Observed>) {
    let collector = LogCollector::disconnected();
    Observed::install(&observed, &collector);
    collector
        .initialize(CollectorConfig {
            max_queue_size: 1,
            ..manual_config()
        })
        .expect("initialize");

    assert!(collector.submit_log("kept", LogLevel::Info));
    assert!(!collector.submit_log("over-1", LogLevel::Info));
    assert!(!collector.submit_log("over-2", LogLevel::Info));
    assert!(collector.flush());

    let errors = observed.errors.lock().clone();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("rejected 1 entries; 1 submit errors"));
    assert!(errors[1].contains("rejected 1 entries; 2 submit errors"));
    assert_eq!(collector.stats().errors, 2);
    assert_steady_state(collector.stats());
}

/// Drops just before teardown are reported before the collector closes.
#[rstest]
fn pending_rejections_surface_at_shutdown(observed: Arc<Observed>) {
    let collector = LogCollector::disconnected();
    Observed::install(&observed, &collector);
    collector
        .initialize(CollectorConfig {
            max_queue_size: 0,
            ..manual_config()
        })
        .expect("initialize");

    assert!(!collector.submit_log("a", LogLevel::Info));
    assert!(!collector.submit_log("b", LogLevel::Info));
    collector.shutdown();

    let errors = observed.errors.lock().clone();
    assert_eq!(errors.len(), 2, "the held-back rejection flushes at shutdown");
    assert!(errors[1].contains("rejected 1 entries; 2 submit errors"));
    assert_steady_state(collector.stats());
}

/// Reconfiguration keeps queued entries and delivers them under the new
/// configuration.
#[rstest]
fn reinitialize_preserves_queued_entries(observed: Arc<Observed>) {
    let sink = CollectingSink::new("session");
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    Observed::install(&observed, &collector);
    collector.initialize(manual_config()).expect("initialize");

    for i in 0..5 {
        assert!(collector.submit_log(format!("x{i}"), LogLevel::Info));
    }
    assert_eq!(sink.batch_count(), 0, "nothing flushed before reinit");

    collector
        .initialize(CollectorConfig {
            batch_size: 2,
            ..manual_config()
        })
        .expect("reinitialize");
    assert!(collector.flush());

    assert_eq!(sink.entries().len(), 5);
    assert_eq!(observed.sent_total(), 5);
    // Delivered under the new configuration: no batch exceeds the new size.
    assert!(sink.batches.lock().iter().all(|b| b.len() <= 2));
    assert_steady_state(collector.stats());
}

/// Open question (a): parked retries are dropped on reconfigure.
#[rstest]
fn reinitialize_drops_parked_retries(observed: Arc<Observed>) {
    let sink = CollectingSink::new("session");
    sink.set_available(false);
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    Observed::install(&observed, &collector);
    collector
        .initialize(CollectorConfig {
            max_retry_count: 10,
            ..manual_config()
        })
        .expect("initialize");

    assert!(collector.submit_log("doomed", LogLevel::Info));
    assert!(collector.flush());
    assert_eq!(observed.error_count(), 0, "batch parked, not yet dropped");

    collector.initialize(manual_config()).expect("reinitialize");
    assert_eq!(observed.error_count(), 1);
    assert_eq!(collector.stats().errors, 1);

    sink.set_available(true);
    assert!(collector.submit_log("fresh", LogLevel::Info));
    assert!(collector.flush());
    assert_eq!(sink.contents(), vec!["fresh".to_owned()]);
    assert_steady_state(collector.stats());
}

/// Retry engine recovers once the sink comes back.
#[rstest]
fn retry_delivers_after_outage(observed: Arc<Observed>) {
    let sink = CollectingSink::new("uplink");
    sink.set_available(false);
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    Observed::install(&observed, &collector);
    collector
        .initialize(CollectorConfig {
            batch_size: 10,
            flush_interval: Duration::from_secs(3600),
            retry_interval: Duration::from_millis(50),
            max_retry_count: 50,
            ..CollectorConfig::default()
        })
        .expect("initialize");

    for i in 0..3 {
        assert!(collector.submit_log(format!("r{i}"), LogLevel::Info));
    }
    assert!(collector.flush());
    assert_eq!(sink.batch_count(), 0);

    sink.set_available(true);
    assert!(
        wait_until(Duration::from_secs(2), || sink.batch_count() == 1),
        "retry ticker should deliver the parked batch"
    );
    assert_eq!(sink.contents(), vec!["r0", "r1", "r2"]);
    assert!(wait_until(Duration::from_secs(1), || observed.sent_total() == 3));
    assert_eq!(collector.stats().errors, 0);
    assert_steady_state(collector.stats());
}

/// maxRetryCount=0 with retry enabled: one attempt, then drop.
#[rstest]
fn zero_retry_count_drops_after_first_attempt(observed: Arc<Observed>) {
    let sink = CollectingSink::new("uplink");
    sink.set_available(false);
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    Observed::install(&observed, &collector);
    collector
        .initialize(CollectorConfig {
            max_retry_count: 0,
            ..manual_config()
        })
        .expect("initialize");

    assert!(collector.submit_log("once", LogLevel::Info));
    assert!(collector.flush());

    assert_eq!(sink.attempts(), 1);
    assert_eq!(observed.error_count(), 1);
    assert_eq!(collector.stats().errors, 1);
    assert_steady_state(collector.stats());
}

/// Permanent sink failures skip the retry engine entirely.
#[rstest]
fn permanent_failure_is_not_retried(observed: Arc<Observed>) {
    let collector = LogCollector::new(vec![Arc::new(BrokenSink) as Arc<dyn BatchSink>]);
    Observed::install(&observed, &collector);
    collector
        .initialize(CollectorConfig {
            max_retry_count: 10,
            ..manual_config()
        })
        .expect("initialize");

    assert!(collector.submit_log("lost", LogLevel::Info));
    assert!(collector.flush());
    assert_eq!(observed.error_count(), 1);
    assert_eq!(collector.stats().errors, 1);
}

/// A failed batch blocks later batches of the same sink until it succeeds.
#[rstest]
fn failed_head_batch_preserves_fifo_order() {
    let sink = CollectingSink::new("uplink");
    sink.set_available(false);
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    collector
        .initialize(CollectorConfig {
            batch_size: 10,
            flush_interval: Duration::from_secs(3600),
            retry_interval: Duration::from_millis(50),
            max_retry_count: 100,
            ..CollectorConfig::default()
        })
        .expect("initialize");

    assert!(collector.submit_log("first", LogLevel::Info));
    assert!(collector.flush());
    assert!(collector.submit_log("second", LogLevel::Info));
    assert!(collector.flush());
    assert_eq!(sink.batch_count(), 0);

    sink.set_available(true);
    assert!(wait_until(Duration::from_secs(2), || sink.batch_count() == 2));
    assert_eq!(sink.contents(), vec!["first", "second"]);
}

/// Two sinks have independent health: a dead uplink never delays the
/// session-side delivery.
#[rstest]
fn sinks_fail_independently(observed: Arc<Observed>) {
    let session = CollectingSink::new("session");
    let uplink = CollectingSink::new("uplink");
    uplink.set_available(false);
    let collector = LogCollector::new(vec![
        session.clone() as Arc<dyn BatchSink>,
        uplink.clone() as Arc<dyn BatchSink>,
    ]);
    Observed::install(&observed, &collector);
    collector
        .initialize(CollectorConfig {
            batch_size: 10,
            flush_interval: Duration::from_secs(3600),
            retry_interval: Duration::from_millis(50),
            max_retry_count: 50,
            ..CollectorConfig::default()
        })
        .expect("initialize");

    for i in 0..4 {
        assert!(collector.submit_log(format!("m{i}"), LogLevel::Info));
    }
    assert!(collector.flush());

    assert_eq!(session.batch_count(), 1, "session delivery is immediate");
    assert_eq!(uplink.batch_count(), 0);
    assert_eq!(observed.sent_total(), 0, "batch not finalized yet");

    uplink.set_available(true);
    assert!(wait_until(Duration::from_secs(2), || uplink.batch_count() == 1));
    assert!(wait_until(Duration::from_secs(1), || observed.sent_total() == 4));
    assert_eq!(collector.stats().errors, 0);
    assert_steady_state(collector.stats());
}

/// Panicking user callbacks are caught and discarded.
#[rstest]
fn panicking_callbacks_do_not_kill_the_pipeline() {
    let sink = CollectingSink::new("session");
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    collector.set_send_callback(|_| panic!("user callback exploded"));
    collector.initialize(manual_config()).expect("initialize");

    assert!(collector.submit_log("survives", LogLevel::Info));
    assert!(collector.flush());
    assert!(collector.is_running());
    assert!(collector.submit_log("still alive", LogLevel::Info));
    assert!(collector.flush());
    assert_eq!(sink.entries().len(), 2);
}

/// Flush from inside a worker-invoked callback must not deadlock.
#[rstest]
fn flush_from_callback_thread_degrades_to_enqueue() {
    let sink = CollectingSink::new("session");
    let collector = Arc::new(LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]));
    let reentrant = Arc::clone(&collector);
    collector.set_send_callback(move |_| {
        // Runs on a batch worker thread; a blocking flush here would wait on
        // itself when the pool has one worker.
        assert!(reentrant.flush());
    });
    collector
        .initialize(CollectorConfig {
            thread_pool_size: 1,
            ..manual_config()
        })
        .expect("initialize");

    assert!(collector.submit_log("ping", LogLevel::Info));
    assert!(collector.flush());
    assert_eq!(sink.entries().len(), 1);

    // Break the callback's reference cycle before dropping.
    collector.set_send_callback(|_| {});
    collector.shutdown();
}

#[rstest]
fn shutdown_is_idempotent() {
    let collector = LogCollector::disconnected();
    collector.initialize(manual_config()).expect("initialize");
    collector.shutdown();
    collector.shutdown();
    assert!(!collector.is_running());
}

#[rstest]
fn closed_collector_can_be_initialized_again() {
    let sink = CollectingSink::new("session");
    let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
    collector.initialize(manual_config()).expect("initialize");
    collector.shutdown();
    collector.initialize(manual_config()).expect("restart");
    assert!(collector.submit_log("reborn", LogLevel::Info));
    assert!(collector.flush());
    assert_eq!(sink.contents(), vec!["reborn".to_owned()]);
}

mod tailer {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    fn tailing_config() -> CollectorConfig {
        CollectorConfig {
            batch_size: 100,
            flush_interval: Duration::from_millis(30),
            min_level: LogLevel::Trace,
            ..CollectorConfig::default()
        }
    }

    #[rstest]
    fn missing_file_reports_exactly_one_error(observed: Arc<Observed>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let collector = LogCollector::disconnected();
        Observed::install(&observed, &collector);
        collector.initialize(tailing_config()).expect("initialize");
        collector
            .collect_from_file(
                dir.path().join("does-not-exist.log"),
                LogLevel::Info,
                Duration::from_millis(20),
                10,
            )
            .expect("start tailer");

        assert!(wait_until(Duration::from_secs(1), || {
            observed.error_count() == 1
        }));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(observed.error_count(), 1);
        assert!(collector.is_running(), "collector survives a dead tailer");
    }

    #[rstest]
    fn tailer_requires_a_running_collector() {
        let collector = LogCollector::disconnected();
        let err = collector
            .collect_from_file("/tmp/whatever.log", LogLevel::Info, Duration::from_millis(20), 10)
            .expect_err("not running");
        assert_eq!(err, CollectorError::NotRunning);
    }

    #[rstest]
    fn tailer_submits_only_appended_lines() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "old line").expect("seed file");
        file.flush().expect("flush seed");

        let sink = CollectingSink::new("session");
        let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
        collector.initialize(tailing_config()).expect("initialize");
        collector
            .collect_from_file(file.path(), LogLevel::Info, Duration::from_millis(20), 10)
            .expect("start tailer");

        writeln!(file, "new1").expect("append");
        writeln!(file, "new2").expect("append");
        file.flush().expect("flush appends");

        assert!(wait_until(Duration::from_secs(2), || {
            sink.contents().len() >= 2
        }));
        collector.shutdown();

        let contents = sink.contents();
        assert_eq!(contents, vec!["new1", "new2"]);
        assert!(sink.entries().iter().all(|(l, _)| *l == LogLevel::Info));
    }

    #[rstest]
    fn truncation_resets_the_offset() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "a longer line that will disappear").expect("seed file");
        file.flush().expect("flush seed");

        let sink = CollectingSink::new("session");
        let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
        collector.initialize(tailing_config()).expect("initialize");
        collector
            .collect_from_file(file.path(), LogLevel::Info, Duration::from_millis(20), 10)
            .expect("start tailer");

        let handle = file.as_file_mut();
        handle.set_len(0).expect("truncate");
        handle.seek(SeekFrom::Start(0)).expect("rewind");
        writeln!(handle, "fresh").expect("rewrite");
        handle.flush().expect("flush rewrite");

        assert!(wait_until(Duration::from_secs(2), || {
            sink.contents().contains(&"fresh".to_owned())
        }));
        collector.shutdown();
    }

    #[rstest]
    fn starting_a_second_tailer_replaces_the_first() {
        let mut first = tempfile::NamedTempFile::new().expect("tempfile");
        let mut second = tempfile::NamedTempFile::new().expect("tempfile");

        let sink = CollectingSink::new("session");
        let collector = LogCollector::new(vec![sink.clone() as Arc<dyn BatchSink>]);
        collector.initialize(tailing_config()).expect("initialize");
        collector
            .collect_from_file(first.path(), LogLevel::Info, Duration::from_millis(20), 10)
            .expect("first tailer");
        collector
            .collect_from_file(second.path(), LogLevel::Info, Duration::from_millis(20), 10)
            .expect("second tailer");

        // The first tailer thread is joined by the replacement, so appends to
        // its file can never be observed.
        writeln!(first, "from first").expect("append first");
        first.flush().expect("flush first");
        writeln!(second, "from second").expect("append second");
        second.flush().expect("flush second");

        assert!(wait_until(Duration::from_secs(2), || {
            sink.contents().contains(&"from second".to_owned())
        }));
        std::thread::sleep(Duration::from_millis(100));
        collector.shutdown();
        assert!(!sink.contents().contains(&"from first".to_owned()));
    }
}
