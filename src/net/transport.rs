//! Multi-threaded TCP transport hosting control sessions.
//!
//! A dedicated accept thread assigns each connection a monotonically
//! increasing session id that is never reused for the lifetime of the
//! process. Per-connection reader threads produce line-delimited messages,
//! per-connection writer threads drain a bounded outbound channel (callers
//! post a send task and return), and a pool of callback workers dispatches
//! message and connection events to the host.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

/// How long `start` waits for the accept loop to come up.
const START_TIMEOUT: Duration = Duration::from_secs(5);
/// Outbound bytes queued per connection before sends fail.
const OUTBOUND_CAPACITY: usize = 1024;
/// Events queued for the callback workers.
const EVENT_CAPACITY: usize = 1024;
/// How often the accept loop checks for a stop request.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Errors reported by the transport surface.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listener could not be bound.
    #[error("failed to bind {0}")]
    BindFailed(String),
    /// The accept loop did not come up within the start timeout.
    #[error("transport start timed out")]
    StartTimeout,
    /// The operation requires a running transport.
    #[error("transport is not running")]
    NotRunning,
    /// No live session carries this id.
    #[error("unknown session {0}")]
    UnknownSession(u64),
    /// The session exists but the send could not be queued.
    #[error("send to session {0} failed")]
    SendFailed(u64),
}

/// Callback invoked with `(session_id, line)` for each received message.
pub type MessageCallback = Arc<dyn Fn(u64, &str) + Send + Sync>;
/// Callback invoked with `(session_id, peer, connected)` on session events.
pub type ConnectionCallback = Arc<dyn Fn(u64, SocketAddr, bool) + Send + Sync>;

enum TransportEvent {
    Connected { session_id: u64, peer: SocketAddr },
    Message { session_id: u64, line: String },
    Disconnected { session_id: u64, peer: SocketAddr },
}

struct ConnectionHandle {
    peer: SocketAddr,
    outbound: Sender<Vec<u8>>,
    /// Clone kept for shutdown; reader and writer own their own clones.
    stream: TcpStream,
}

struct TransportInner {
    name: String,
    running: AtomicBool,
    next_session_id: AtomicU64,
    bound_port: AtomicU16,
    connections: Mutex<HashMap<u64, ConnectionHandle>>,
    message_cb: RwLock<Option<MessageCallback>>,
    connection_cb: RwLock<Option<ConnectionCallback>>,
}

impl TransportInner {
    fn remove_connection(&self, session_id: u64) -> Option<ConnectionHandle> {
        self.connections.lock().remove(&session_id)
    }
}

struct RunningTransport {
    accept_handle: JoinHandle<()>,
    event_workers: Vec<JoinHandle<()>>,
    stop_tx: Sender<()>,
}

/// The session-facing TCP server.
pub struct TcpTransport {
    listen_addr: String,
    port: u16,
    num_threads: usize,
    inner: Arc<TransportInner>,
    control: Mutex<Option<RunningTransport>>,
}

impl TcpTransport {
    /// Create a transport listening on `listen_addr:port` once started.
    ///
    /// `num_threads` sizes the callback worker pool; `0` means hardware
    /// concurrency.
    pub fn new(
        name: impl Into<String>,
        listen_addr: impl Into<String>,
        port: u16,
        num_threads: usize,
    ) -> Self {
        let num_threads = if num_threads == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            num_threads
        };
        Self {
            listen_addr: listen_addr.into(),
            port,
            num_threads,
            inner: Arc::new(TransportInner {
                name: name.into(),
                running: AtomicBool::new(false),
                next_session_id: AtomicU64::new(1),
                bound_port: AtomicU16::new(0),
                connections: Mutex::new(HashMap::new()),
                message_cb: RwLock::new(None),
                connection_cb: RwLock::new(None),
            }),
            control: Mutex::new(None),
        }
    }

    /// Install the message callback. Set before `start`.
    pub fn set_message_callback(&self, callback: impl Fn(u64, &str) + Send + Sync + 'static) {
        *self.inner.message_cb.write() = Some(Arc::new(callback));
    }

    /// Install the connection callback. Set before `start`.
    pub fn set_connection_callback(
        &self,
        callback: impl Fn(u64, SocketAddr, bool) + Send + Sync + 'static,
    ) {
        *self.inner.connection_cb.write() = Some(Arc::new(callback));
    }

    /// Bind and start accepting. Blocks until the accept loop is live or the
    /// bind error is reported; gives up after five seconds.
    pub fn start(&self) -> Result<(), TransportError> {
        let mut control = self.control.lock();
        if control.is_some() {
            warn!("TcpTransport [{}] already running", self.inner.name);
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<u16, TransportError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (event_tx, event_rx) = bounded::<TransportEvent>(EVENT_CAPACITY);

        let mut event_workers = Vec::with_capacity(self.num_threads);
        for _ in 0..self.num_threads {
            let inner = Arc::clone(&self.inner);
            let rx = event_rx.clone();
            event_workers.push(thread::spawn(move || event_worker(inner, rx)));
        }
        drop(event_rx);

        let inner = Arc::clone(&self.inner);
        let addr = format!("{}:{}", self.listen_addr, self.port);
        let accept_handle = thread::spawn(move || {
            let listener = match TcpListener::bind(&addr) {
                Ok(listener) => listener,
                Err(err) => {
                    let _ = ready_tx.send(Err(TransportError::BindFailed(format!("{addr}: {err}"))));
                    return;
                }
            };
            let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();
            inner.bound_port.store(port, Ordering::Release);
            inner.running.store(true, Ordering::Release);
            let _ = ready_tx.send(Ok(port));
            accept_loop(&inner, listener, event_tx, stop_rx);
            inner.running.store(false, Ordering::Release);
        });

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(port)) => {
                info!(
                    "TcpTransport [{}] listening on {}:{port} with {} callback workers",
                    self.inner.name, self.listen_addr, self.num_threads
                );
                *control = Some(RunningTransport {
                    accept_handle,
                    event_workers,
                    stop_tx,
                });
                Ok(())
            }
            Ok(Err(err)) => {
                if accept_handle.join().is_err() {
                    warn!("TcpTransport [{}] accept thread panicked", self.inner.name);
                }
                for worker in event_workers {
                    let _ = worker.join();
                }
                Err(err)
            }
            Err(_) => {
                warn!("TcpTransport [{}] start timed out", self.inner.name);
                Err(TransportError::StartTimeout)
            }
        }
    }

    /// Stop accepting, close every session, and join the accept thread.
    /// Idempotent.
    pub fn stop(&self) {
        let mut control = self.control.lock();
        let Some(running) = control.take() else {
            return;
        };
        self.inner.running.store(false, Ordering::Release);
        drop(running.stop_tx);

        let handles: Vec<ConnectionHandle> = {
            let mut conns = self.inner.connections.lock();
            conns.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.stream.shutdown(Shutdown::Both);
        }

        if running.accept_handle.join().is_err() {
            warn!("TcpTransport [{}] accept thread panicked", self.inner.name);
        }
        for worker in running.event_workers {
            if worker.join().is_err() {
                warn!("TcpTransport [{}] event worker panicked", self.inner.name);
            }
        }
        info!("TcpTransport [{}] stopped", self.inner.name);
    }

    /// Queue `bytes` for delivery to one session. Returns immediately; the
    /// session's writer thread performs the socket write.
    pub fn send(&self, session_id: u64, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::NotRunning);
        }
        let conns = self.inner.connections.lock();
        let Some(conn) = conns.get(&session_id) else {
            return Err(TransportError::UnknownSession(session_id));
        };
        conn.outbound
            .try_send(bytes)
            .map_err(|_| TransportError::SendFailed(session_id))
    }

    /// Queue `bytes` to every live session; returns how many accepted it.
    pub fn broadcast(&self, bytes: &[u8]) -> usize {
        let targets: Vec<Sender<Vec<u8>>> = {
            let conns = self.inner.connections.lock();
            conns.values().map(|c| c.outbound.clone()).collect()
        };
        targets
            .into_iter()
            .filter(|tx| tx.try_send(bytes.to_vec()).is_ok())
            .count()
    }

    /// Shut one session's socket down; its reader performs the cleanup.
    pub fn close_connection(&self, session_id: u64) -> bool {
        let conns = self.inner.connections.lock();
        match conns.get(&session_id) {
            Some(conn) => {
                let _ = conn.stream.shutdown(Shutdown::Both);
                true
            }
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Peer address of a live session.
    pub fn peer_addr(&self, session_id: u64) -> Option<SocketAddr> {
        self.inner.connections.lock().get(&session_id).map(|c| c.peer)
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// The actual bound port (useful when constructed with port 0).
    pub fn port(&self) -> u16 {
        let bound = self.inner.bound_port.load(Ordering::Acquire);
        if bound != 0 { bound } else { self.port }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    inner: &Arc<TransportInner>,
    listener: TcpListener,
    event_tx: Sender<TransportEvent>,
    stop_rx: Receiver<()>,
) {
    if let Err(err) = listener.set_nonblocking(true) {
        warn!("TcpTransport [{}] accept setup failed: {err}", inner.name);
        return;
    }
    loop {
        match listener.accept() {
            Ok((stream, peer)) => handle_accept(inner, stream, peer, &event_tx),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                match stop_rx.recv_timeout(ACCEPT_POLL) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
            Err(err) => {
                warn!("TcpTransport [{}] accept error: {err}", inner.name);
                match stop_rx.recv_timeout(ACCEPT_POLL) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
        }
    }
}

fn handle_accept(
    inner: &Arc<TransportInner>,
    stream: TcpStream,
    peer: SocketAddr,
    event_tx: &Sender<TransportEvent>,
) {
    if stream.set_nonblocking(false).is_err() {
        warn!("TcpTransport [{}] could not configure socket from {peer}", inner.name);
        return;
    }
    let session_id = inner.next_session_id.fetch_add(1, Ordering::Relaxed);
    debug!(
        "TcpTransport [{}] new session {session_id} from {peer}",
        inner.name
    );

    let (out_tx, out_rx) = bounded::<Vec<u8>>(OUTBOUND_CAPACITY);
    let writer_stream = match stream.try_clone() {
        Ok(clone) => clone,
        Err(err) => {
            warn!("TcpTransport [{}] socket clone failed for {peer}: {err}", inner.name);
            return;
        }
    };
    let shutdown_stream = match stream.try_clone() {
        Ok(clone) => clone,
        Err(err) => {
            warn!("TcpTransport [{}] socket clone failed for {peer}: {err}", inner.name);
            return;
        }
    };

    thread::spawn(move || writer_loop(writer_stream, out_rx));

    inner.connections.lock().insert(
        session_id,
        ConnectionHandle {
            peer,
            outbound: out_tx,
            stream: shutdown_stream,
        },
    );

    let reader_inner = Arc::clone(inner);
    let reader_events = event_tx.clone();
    thread::spawn(move || reader_loop(reader_inner, stream, session_id, peer, reader_events));

    let _ = event_tx.send(TransportEvent::Connected { session_id, peer });
}

/// Drain the outbound channel onto the socket until it closes or errs.
fn writer_loop(mut stream: TcpStream, out_rx: Receiver<Vec<u8>>) {
    for bytes in out_rx.iter() {
        if let Err(err) = stream.write_all(&bytes).and_then(|()| stream.flush()) {
            debug!("TcpTransport writer stopping: {err}");
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

/// Read newline-delimited messages until the peer goes away, then clean the
/// session up.
fn reader_loop(
    inner: Arc<TransportInner>,
    stream: TcpStream,
    session_id: u64,
    peer: SocketAddr,
    event_tx: Sender<TransportEvent>,
) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if !trimmed.is_empty()
                    && event_tx
                        .send(TransportEvent::Message {
                            session_id,
                            line: trimmed.to_owned(),
                        })
                        .is_err()
                {
                    break;
                }
            }
            Err(err) => {
                debug!("TcpTransport session {session_id} read error: {err}");
                break;
            }
        }
    }
    // Dropping the handle closes the outbound channel, stopping the writer.
    inner.remove_connection(session_id);
    let _ = event_tx.send(TransportEvent::Disconnected { session_id, peer });
    debug!("TcpTransport session {session_id} from {peer} closed");
}

/// Dispatch events to the host callbacks. Panicking callbacks are caught so
/// a misbehaving host never takes the transport down.
fn event_worker(inner: Arc<TransportInner>, rx: Receiver<TransportEvent>) {
    for event in rx.iter() {
        match event {
            TransportEvent::Connected { session_id, peer } => {
                if let Some(cb) = inner.connection_cb.read().clone()
                    && catch_unwind(AssertUnwindSafe(|| cb(session_id, peer, true))).is_err()
                {
                    warn!("TcpTransport [{}] connection callback panicked", inner.name);
                }
            }
            TransportEvent::Message { session_id, line } => {
                if let Some(cb) = inner.message_cb.read().clone()
                    && catch_unwind(AssertUnwindSafe(|| cb(session_id, &line))).is_err()
                {
                    warn!("TcpTransport [{}] message callback panicked", inner.name);
                }
            }
            TransportEvent::Disconnected { session_id, peer } => {
                if let Some(cb) = inner.connection_cb.read().clone()
                    && catch_unwind(AssertUnwindSafe(|| cb(session_id, peer, false))).is_err()
                {
                    warn!("TcpTransport [{}] connection callback panicked", inner.name);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
