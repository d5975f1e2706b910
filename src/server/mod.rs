//! The collector server: control sessions, per-session collectors, and the
//! dual fan-out.
//!
//! Each accepted connection may own at most one [`LogCollector`]. A `start`
//! command builds the collector with two construction-time sinks (the session
//! socket and the shared processor uplink) and attaches a file tailer; `stop`
//! or a disconnect tears it down. The uplink is lifecycle-scoped to the
//! server: connected on `start`, closed on `stop`.

pub mod protocol;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::collector::batch::LogBatch;
use crate::collector::{CollectorConfig, LogCollector};
use crate::filter::{Filter, KeywordFilter};
use crate::net::transport::{TcpTransport, TransportError};
use crate::net::uplink::{UplinkClient, UplinkConfig};
use crate::sink::{BatchSink, SinkError};

use protocol::{ControlCommand, StartCommand};

/// Server-wide configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub name: String,
    pub listen_addr: String,
    pub port: u16,
    /// Callback worker threads for the transport; `0` means hardware
    /// concurrency.
    pub num_threads: usize,
    pub processor_addr: String,
    pub processor_port: u16,
    /// Entries per pushed batch.
    pub batch_size: usize,
    pub max_queue_size: usize,
    pub thread_pool_size: usize,
    pub enable_retry: bool,
    pub max_retry_count: u32,
    pub retry_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "collector-server".to_owned(),
            listen_addr: "127.0.0.1".to_owned(),
            port: 9000,
            num_threads: 4,
            processor_addr: "127.0.0.1".to_owned(),
            processor_port: 9001,
            batch_size: 10,
            max_queue_size: 10_000,
            thread_pool_size: 2,
            enable_retry: true,
            max_retry_count: 3,
            retry_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Open,
    Closing,
    Closed,
}

struct Session {
    peer: Option<SocketAddr>,
    collector: LogCollector,
    state: SessionState,
}

type SessionMap = Arc<Mutex<HashMap<u64, Session>>>;

/// Delivers batches to the controlling session socket.
struct SessionSink {
    transport: Arc<TcpTransport>,
    session_id: u64,
}

impl BatchSink for SessionSink {
    fn name(&self) -> &str {
        "session"
    }

    fn deliver(&self, batch: &LogBatch) -> Result<(), SinkError> {
        let payload = protocol::session_payload(batch)
            .map_err(|err| SinkError::Permanent(format!("serialization failed: {err}")))?;
        let mut payload = batch
            .finalize_payload(payload)
            .map_err(|err| SinkError::Permanent(format!("compression failed: {err}")))?;
        payload.push(b'\n');
        match self.transport.send(self.session_id, payload) {
            Ok(()) => Ok(()),
            // The session is gone for good; retrying cannot help.
            Err(TransportError::UnknownSession(_)) => {
                Err(SinkError::Permanent("session closed".into()))
            }
            Err(err) => Err(SinkError::Unavailable(err.to_string())),
        }
    }
}

/// Delivers batches to the shared processor uplink.
struct UplinkSink {
    client: Arc<UplinkClient>,
}

impl BatchSink for UplinkSink {
    fn name(&self) -> &str {
        "uplink"
    }

    fn deliver(&self, batch: &LogBatch) -> Result<(), SinkError> {
        let payload = protocol::processor_payload(batch)
            .map_err(|err| SinkError::Permanent(format!("serialization failed: {err}")))?;
        let mut payload = batch
            .finalize_payload(payload)
            .map_err(|err| SinkError::Permanent(format!("compression failed: {err}")))?;
        payload.push(b'\n');
        self.client
            .send(&payload)
            .map_err(|err| SinkError::Unavailable(err.to_string()))
    }
}

/// Hosts the transport, the uplink, and the per-session collectors.
pub struct CollectorServer {
    config: Arc<ServerConfig>,
    transport: Arc<TcpTransport>,
    uplink: Arc<UplinkClient>,
    sessions: SessionMap,
}

impl CollectorServer {
    pub fn new(config: ServerConfig) -> Self {
        let transport = Arc::new(TcpTransport::new(
            config.name.clone(),
            config.listen_addr.clone(),
            config.port,
            config.num_threads,
        ));
        let uplink = Arc::new(UplinkClient::new(UplinkConfig::new(
            config.processor_addr.clone(),
            config.processor_port,
        )));
        Self {
            config: Arc::new(config),
            transport,
            uplink,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Connect the uplink, wire the transport callbacks, and start accepting.
    ///
    /// A dead processor is tolerated: the uplink reconnects on demand and
    /// failed deliveries ride the retry engine. A bind failure is fatal and
    /// surfaces as an error.
    pub fn start(&self) -> Result<(), TransportError> {
        if let Err(err) = self.uplink.connect() {
            warn!(
                "CollectorServer [{}]: processor {}:{} unreachable at start: {err}",
                self.config.name, self.config.processor_addr, self.config.processor_port
            );
        }

        let sessions = Arc::clone(&self.sessions);
        // Weak, not Arc: the transport owns this callback and must not keep
        // itself alive through it.
        let transport = Arc::downgrade(&self.transport);
        let uplink = Arc::clone(&self.uplink);
        let config = Arc::clone(&self.config);
        self.transport.set_message_callback(move |session_id, line| {
            let Some(transport) = transport.upgrade() else {
                return;
            };
            handle_message(&sessions, &transport, &uplink, &config, session_id, line);
        });

        let sessions = Arc::clone(&self.sessions);
        self.transport
            .set_connection_callback(move |session_id, peer, connected| {
                if connected {
                    debug!("CollectorServer: session {session_id} connected from {peer}");
                } else {
                    // Disconnect implies stop.
                    stop_session(&sessions, session_id);
                }
            });

        self.transport.start()?;
        info!(
            "CollectorServer [{}] ready on {}:{}",
            self.config.name,
            self.transport.listen_addr(),
            self.transport.port()
        );
        Ok(())
    }

    /// Stop accepting, tear every session down, and close the uplink.
    /// Idempotent.
    pub fn stop(&self) {
        self.transport.stop();
        let drained: Vec<(u64, Session)> = self.sessions.lock().drain().collect();
        for (session_id, mut session) in drained {
            session.state = SessionState::Closing;
            session.collector.shutdown();
            session.state = SessionState::Closed;
            debug!("CollectorServer: session {session_id} shut down");
        }
        self.uplink.close();
    }

    /// Number of sessions currently owning a collector.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn transport(&self) -> &TcpTransport {
        &self.transport
    }

    pub fn uplink(&self) -> &UplinkClient {
        &self.uplink
    }
}

impl Drop for CollectorServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_message(
    sessions: &SessionMap,
    transport: &Arc<TcpTransport>,
    uplink: &Arc<UplinkClient>,
    config: &Arc<ServerConfig>,
    session_id: u64,
    line: &str,
) {
    match protocol::parse_command(line) {
        Ok(ControlCommand::Start(cmd)) => {
            start_session(sessions, transport, uplink, config, session_id, cmd);
        }
        Ok(ControlCommand::Stop) => stop_session(sessions, session_id),
        Err(err) => {
            warn!("CollectorServer: session {session_id} sent an unrecognized command: {err}");
        }
    }
}

fn start_session(
    sessions: &SessionMap,
    transport: &Arc<TcpTransport>,
    uplink: &Arc<UplinkClient>,
    config: &Arc<ServerConfig>,
    session_id: u64,
    cmd: StartCommand,
) {
    let interval = Duration::from_millis(cmd.interval.max(1));
    let collector_config = CollectorConfig {
        collector_id: format!("session-{session_id}"),
        server_addr: config.processor_addr.clone(),
        server_port: config.processor_port,
        batch_size: config.batch_size,
        flush_interval: interval,
        max_queue_size: config.max_queue_size,
        thread_pool_size: config.thread_pool_size,
        min_level: cmd.level,
        compress_batches: cmd.compress,
        enable_retry: config.enable_retry,
        max_retry_count: config.max_retry_count,
        retry_interval: config.retry_interval,
        ..CollectorConfig::default()
    };

    let sinks: Vec<Arc<dyn BatchSink>> = vec![
        Arc::new(SessionSink {
            transport: Arc::clone(transport),
            session_id,
        }),
        Arc::new(UplinkSink {
            client: Arc::clone(uplink),
        }),
    ];
    let collector = LogCollector::new(sinks);
    collector.set_error_callback(move |msg| {
        warn!("CollectorServer: session {session_id} collector error: {msg}");
    });
    if let Err(err) = collector.initialize(collector_config) {
        warn!("CollectorServer: session {session_id} start rejected: {err}");
        return;
    }
    if !cmd.keywords.is_empty() {
        collector.add_filter(Filter::Keyword(KeywordFilter::rejecting(cmd.keywords)));
    }
    if let Err(err) = collector.collect_from_file(&cmd.file, cmd.level, interval, cmd.max_lines) {
        warn!("CollectorServer: session {session_id} tailer start failed: {err}");
    }

    // A repeated start replaces the session's collector.
    stop_session(sessions, session_id);
    sessions.lock().insert(
        session_id,
        Session {
            peer: transport.peer_addr(session_id),
            collector,
            state: SessionState::Open,
        },
    );
    info!(
        "CollectorServer: session {session_id} collecting from {} every {interval:?}",
        cmd.file
    );
}

/// Tear one session down. The collector is shut down outside the map lock so
/// slow joins never stall other sessions.
fn stop_session(sessions: &SessionMap, session_id: u64) {
    let session = sessions.lock().remove(&session_id);
    if let Some(mut session) = session {
        session.state = SessionState::Closing;
        session.collector.shutdown();
        session.state = SessionState::Closed;
        debug!(
            "CollectorServer: session {session_id} ({:?}) now {:?}",
            session.peer, session.state
        );
    }
}
