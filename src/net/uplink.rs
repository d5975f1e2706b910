//! Persistent client connection to the downstream processor.
//!
//! The uplink is a single long-lived TCP connection shared by every session's
//! uplink sink. Writes are serialized behind a mutex; health is readable
//! lock-free so collectors can poll it cheaply. Reconnects happen lazily on
//! send and are gated by a jittered exponential backoff so a dead processor
//! is not hammered faster than the retry cadence.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Default connection timeout applied when establishing the uplink.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default write timeout applied to uplink writes.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
/// Default base delay between reconnect attempts.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Default maximum delay between reconnect attempts.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Exponential backoff policy for reconnection attempts.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

/// Configuration for the [`UplinkClient`].
#[derive(Clone, Debug)]
pub struct UplinkConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl UplinkConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            backoff: BackoffPolicy::default(),
        }
    }

    fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|iter| iter.collect())
    }
}

/// Gates reconnect attempts with jittered exponential delays.
struct ReconnectGate {
    policy: BackoffPolicy,
    current: Duration,
    next_attempt: Option<Instant>,
    rng: StdRng,
}

impl ReconnectGate {
    fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.base,
            next_attempt: None,
            rng: StdRng::from_entropy(),
            policy,
        }
    }

    fn attempt_allowed(&self, now: Instant) -> bool {
        self.next_attempt.is_none_or(|at| now >= at)
    }

    fn record_success(&mut self) {
        self.current = self.policy.base;
        self.next_attempt = None;
    }

    fn record_failure(&mut self, now: Instant) {
        const MIN_DELAY_MS: u64 = 10;
        let max_ms = (self.current.as_millis().min(u128::from(u64::MAX)) as u64).max(MIN_DELAY_MS);
        let delay_ms = if max_ms <= MIN_DELAY_MS {
            max_ms
        } else {
            self.rng.gen_range(MIN_DELAY_MS..=max_ms)
        };
        self.next_attempt = Some(now + Duration::from_millis(delay_ms));
        self.current = self.current.saturating_mul(2).min(self.policy.cap);
    }
}

struct UplinkState {
    stream: Option<TcpStream>,
    gate: ReconnectGate,
}

/// The shared processor connection.
pub struct UplinkClient {
    config: UplinkConfig,
    state: Mutex<UplinkState>,
    connected: AtomicBool,
}

impl UplinkClient {
    pub fn new(config: UplinkConfig) -> Self {
        let gate = ReconnectGate::new(config.backoff.clone());
        Self {
            config,
            state: Mutex::new(UplinkState { stream: None, gate }),
            connected: AtomicBool::new(false),
        }
    }

    /// Eagerly establish the connection. Failure leaves the client usable;
    /// the next send retries through the backoff gate.
    pub fn connect(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.stream.is_some() {
            return Ok(());
        }
        match self.open_stream() {
            Ok(stream) => {
                state.gate.record_success();
                state.stream = Some(stream);
                self.connected.store(true, Ordering::Release);
                debug!(
                    "UplinkClient connected to {}:{}",
                    self.config.host, self.config.port
                );
                Ok(())
            }
            Err(err) => {
                state.gate.record_failure(Instant::now());
                self.connected.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Whether the last operation left a live connection. Lock-free.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Write `bytes` to the processor, reconnecting first when necessary.
    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.stream.is_none() {
            let now = Instant::now();
            if !state.gate.attempt_allowed(now) {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "uplink reconnect backoff active",
                ));
            }
            match self.open_stream() {
                Ok(stream) => {
                    state.gate.record_success();
                    state.stream = Some(stream);
                    self.connected.store(true, Ordering::Release);
                }
                Err(err) => {
                    state.gate.record_failure(now);
                    self.connected.store(false, Ordering::Release);
                    return Err(err);
                }
            }
        }
        let Some(stream) = state.stream.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "uplink down"));
        };
        match stream.write_all(bytes).and_then(|()| stream.flush()) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("UplinkClient write failed: {err}");
                state.stream = None;
                state.gate.record_failure(Instant::now());
                self.connected.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Drop the connection. The next send reconnects.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.stream = None;
        self.connected.store(false, Ordering::Release);
    }

    fn open_stream(&self) -> io::Result<TcpStream> {
        let addrs = self.config.socket_addrs()?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => {
                    stream.set_nonblocking(false)?;
                    stream.set_write_timeout(Some(self.config.write_timeout))?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no addresses for {}:{}", self.config.host, self.config.port),
            )
        }))
    }
}
