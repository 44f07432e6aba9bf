//! HTTP exposition server.
//!
//! One dedicated thread owns the listening socket and serves one connection
//! at a time:
//!
//! - `GET /debug`: server counters ([`build_debug_json`])
//! - `GET /state` or `GET / `: telemetry document ([`build_state_json`])
//! - anything else: 404 with an empty body
//!
//! The loop waits at most one second for a connection so it notices
//! [`HttpServer::stop`] promptly. Accept failures that indicate a broken
//! listening socket trigger a close/reopen cycle (see [`recovery`]). A reopen
//! binds the port the first listener actually got, so port 0 stays stable.
//!
//! After an accept failure that does not trigger recovery, `stage` reports
//! `AcceptFailed` while the socket stays open and `listening` stays true; the
//! next successful accept puts it back to `Serving`.
//!
//! A client gets at most `client_read_timeout_ms` to send its request, read
//! in short slices so a `stop()` is never held up by a silent client.
//!
//! ## Counters
//!
//! [`ServerStatus`] fields other than `running` are written only by the
//! serving thread and read by anyone for diagnostics. They are `Relaxed`
//! atomics: the values are advisory and nothing makes decisions on them.

pub mod recovery;
pub mod routes;
mod socket;

pub use recovery::{AcceptAction, AcceptErrorTracker, ACCEPT_ERROR_STREAK_LIMIT};
pub use routes::Route;

use std::borrow::Cow;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use dca_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::encode::{build_debug_json, build_state_json};
use crate::logging::event_names;
use crate::telemetry::SharedTelemetry;

/// Longest single wait for an incoming connection.
pub const WAIT_TIMEOUT_MS: i32 = 1000;

/// Pause between closing a bad listener and reopening it.
pub const REOPEN_DELAY: Duration = Duration::from_millis(500);

/// Extra pause after a failed reopen.
pub const REOPEN_FAILURE_BACKOFF: Duration = Duration::from_millis(1000);

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Longest single blocking read on a client socket.
const CLIENT_READ_SLICE: Duration = Duration::from_millis(100);

/// Socket lifecycle stage, reported on the debug endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i32")]
pub enum ServerStage {
    Idle,
    CreatingSocket,
    Binding,
    Listening,
    Serving,
    SocketCreateFailed,
    BindFailed,
    ListenFailed,
    WaitFailed,
    AcceptFailed,
}

impl ServerStage {
    pub fn code(self) -> i32 {
        match self {
            ServerStage::Idle => 0,
            ServerStage::CreatingSocket => 1,
            ServerStage::Binding => 2,
            ServerStage::Listening => 3,
            ServerStage::Serving => 4,
            ServerStage::SocketCreateFailed => -1,
            ServerStage::BindFailed => -2,
            ServerStage::ListenFailed => -3,
            ServerStage::WaitFailed => -4,
            ServerStage::AcceptFailed => -5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ServerStage::Idle,
            1 => ServerStage::CreatingSocket,
            2 => ServerStage::Binding,
            3 => ServerStage::Listening,
            4 => ServerStage::Serving,
            -1 => ServerStage::SocketCreateFailed,
            -2 => ServerStage::BindFailed,
            -3 => ServerStage::ListenFailed,
            -4 => ServerStage::WaitFailed,
            -5 => ServerStage::AcceptFailed,
            _ => return None,
        })
    }

    pub fn is_failure(self) -> bool {
        self.code() < 0
    }
}

impl From<ServerStage> for i32 {
    fn from(stage: ServerStage) -> Self {
        stage.code()
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// IPv4 address to bind.
    pub bind: Ipv4Addr,
    /// TCP port; 0 picks an ephemeral port.
    pub port: u16,
    /// `listen(2)` backlog.
    pub backlog: i32,
    /// Read timeout for a client's request; 0 disables it.
    pub client_read_timeout_ms: u64,
    /// Reopen the listener when waiting for connections fails, instead of
    /// stopping the serving loop.
    pub recover_on_wait_error: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: Ipv4Addr::UNSPECIFIED,
            port: 8080,
            backlog: 4,
            client_read_timeout_ms: 2000,
            recover_on_wait_error: false,
        }
    }
}

impl HttpConfig {
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.bind, self.port)
    }
}

/// Point-in-time copy of [`ServerStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerDebug {
    pub running: bool,
    pub listening: bool,
    pub stage: ServerStage,
    pub listen_fd: i32,
    pub port: u16,
    pub accepted_count: u64,
    pub request_count: u64,
    pub last_errno: i32,
}

/// Live server counters.
#[derive(Debug)]
pub struct ServerStatus {
    running: AtomicBool,
    listening: AtomicBool,
    stage: AtomicI32,
    listen_fd: AtomicI32,
    port: AtomicU16,
    accepted_count: AtomicU64,
    request_count: AtomicU64,
    last_errno: AtomicI32,
    recovery_count: AtomicU64,
}

impl ServerStatus {
    pub fn new(port: u16) -> Self {
        Self {
            running: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            stage: AtomicI32::new(ServerStage::Idle.code()),
            listen_fd: AtomicI32::new(-1),
            port: AtomicU16::new(port),
            accepted_count: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
            last_errno: AtomicI32::new(0),
            recovery_count: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stage(&self) -> ServerStage {
        ServerStage::from_code(self.stage.load(Ordering::Relaxed)).unwrap_or(ServerStage::Idle)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    pub fn listen_fd(&self) -> i32 {
        self.listen_fd.load(Ordering::Relaxed)
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted_count.load(Ordering::Relaxed)
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn last_errno(&self) -> i32 {
        self.last_errno.load(Ordering::Relaxed)
    }

    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Relaxed)
    }

    /// Close/reopen cycles started by the serving loop.
    pub fn recovery_count(&self) -> u64 {
        self.recovery_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ServerDebug {
        ServerDebug {
            running: self.is_running(),
            listening: self.is_listening(),
            stage: self.stage(),
            listen_fd: self.listen_fd(),
            port: self.port(),
            accepted_count: self.accepted_count(),
            request_count: self.request_count(),
            last_errno: self.last_errno(),
        }
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn set_stage(&self, stage: ServerStage) {
        self.stage.store(stage.code(), Ordering::Relaxed);
    }

    pub(crate) fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::Relaxed);
    }

    pub(crate) fn set_listen_fd(&self, fd: i32) {
        self.listen_fd.store(fd, Ordering::Relaxed);
    }

    pub(crate) fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::Relaxed);
    }

    pub(crate) fn record_accept(&self) {
        self.accepted_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_errno(&self, errno: i32) {
        self.last_errno.store(errno, Ordering::Relaxed);
    }

    pub(crate) fn record_recovery(&self) {
        self.recovery_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle to a running server. Dropping it stops the server.
#[derive(Debug)]
pub struct HttpServer {
    status: Arc<ServerStatus>,
    thread: Option<thread::JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl HttpServer {
    /// Start serving `telemetry` on a background thread.
    ///
    /// Returns once the listener is open. Fails if the thread cannot be
    /// spawned or the initial socket setup fails; in the latter case the
    /// thread has already exited and been joined.
    pub fn start(telemetry: SharedTelemetry, config: HttpConfig) -> Result<Self> {
        Self::spawn(telemetry, config, ListenerSource)
    }

    /// [`HttpServer::start`] with a custom connection source.
    pub(crate) fn spawn<S: ConnectionSource>(
        telemetry: SharedTelemetry,
        config: HttpConfig,
        source: S,
    ) -> Result<Self> {
        let status = Arc::new(ServerStatus::new(config.port));
        status.set_running(true);

        let (ready_tx, ready_rx) = mpsc::channel();
        let serving = Serving {
            status: status.clone(),
            telemetry,
            config,
            source,
        };
        let thread = thread::Builder::new()
            .name("dca-http".to_string())
            .spawn(move || serving.run(ready_tx))
            .map_err(|e| {
                status.set_running(false);
                error!(error = %e, "failed to spawn http thread");
                Error::ThreadSpawn(e.to_string())
            })?;

        let ready = ready_rx.recv();
        match ready {
            Ok(Ok(local_addr)) => Ok(Self {
                status,
                thread: Some(thread),
                local_addr,
            }),
            Ok(Err(e)) => {
                status.set_running(false);
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                status.set_running(false);
                let _ = thread.join();
                Err(Error::ServerVanished)
            }
        }
    }

    pub fn status(&self) -> &ServerStatus {
        &self.status
    }

    /// Address the listener was bound to at start.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Signal the serving thread, unblock its wait and join it. Idempotent.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.status.set_running(false);
        socket::shutdown_fd(self.status.listen_fd());
        if thread.join().is_err() {
            error!("http serving thread panicked");
        }
        info!(target: event_names::HTTP_STOPPED, "http: server stopped");
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Where the serving loop waits for and accepts connections.
pub(crate) trait ConnectionSource: Send + 'static {
    /// Wait up to `timeout_ms` for a pending connection.
    fn wait_readable(&mut self, listener: &TcpListener, timeout_ms: i32) -> io::Result<bool> {
        socket::wait_readable(listener.as_raw_fd(), timeout_ms)
    }

    fn accept(&mut self, listener: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
        listener.accept()
    }
}

/// The listening socket itself.
pub(crate) struct ListenerSource;

impl ConnectionSource for ListenerSource {}

/// State owned by the serving thread.
struct Serving<S> {
    status: Arc<ServerStatus>,
    telemetry: SharedTelemetry,
    config: HttpConfig,
    source: S,
}

impl<S: ConnectionSource> Serving<S> {
    fn run(mut self, ready: mpsc::Sender<Result<SocketAddr>>) {
        let addr = self.config.socket_addr();
        let mut listener = match socket::open_listener(&self.status, addr, self.config.backlog) {
            Ok(listener) => {
                let local = listener.local_addr().map_err(Error::from);
                let failed = local.is_err();
                let _ = ready.send(local);
                if failed {
                    return;
                }
                Some(listener)
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        drop(ready);

        let mut tracker = AcceptErrorTracker::new();
        while self.status.is_running() {
            let Some(active) = listener.as_ref() else {
                listener = self.reopen();
                continue;
            };

            match self.source.wait_readable(active, WAIT_TIMEOUT_MS) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let errno = e.raw_os_error().unwrap_or(0);
                    self.status.record_errno(errno);
                    self.status.set_stage(ServerStage::WaitFailed);
                    if self.config.recover_on_wait_error {
                        warn!(target: event_names::HTTP_WAIT_FAILED, errno, "http: wait failed; reopening listener");
                        listener = self.recover(listener.take());
                        continue;
                    }
                    error!(
                        target: event_names::HTTP_WAIT_FAILED,
                        errno,
                        "http: wait failed; serving loop stops while the server still reports running"
                    );
                    break;
                }
            }
            if !self.status.is_running() {
                break;
            }

            match self.source.accept(active) {
                Ok((stream, peer)) => {
                    tracker.record_success();
                    self.status.record_accept();
                    if self.status.stage() == ServerStage::AcceptFailed {
                        self.status.set_stage(ServerStage::Serving);
                    }
                    debug!(%peer, "http: accepted");
                    self.handle_client(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => {
                    let errno = e.raw_os_error().unwrap_or(0);
                    let action = tracker.record_failure(errno);
                    if action == AcceptAction::Ignore {
                        continue;
                    }
                    self.status.record_errno(errno);
                    self.status.set_stage(ServerStage::AcceptFailed);
                    warn!(target: event_names::HTTP_ACCEPT_FAILED, errno, streak = tracker.streak(), "http: accept failed");
                    if action == AcceptAction::Reopen {
                        info!(target: event_names::HTTP_RECOVER, errno, "http: reopening listener");
                        listener = self.recover(listener.take());
                    }
                }
            }
        }

        self.status.set_listening(false);
        self.status.set_listen_fd(-1);
        drop(listener);
        info!(target: event_names::HTTP_THREAD_STOPPED, "http: thread stopped");
    }

    /// Close the current listener, wait, and try to open a new one.
    fn recover(&self, listener: Option<TcpListener>) -> Option<TcpListener> {
        drop(listener);
        self.status.set_listening(false);
        self.status.set_listen_fd(-1);
        self.status.record_recovery();
        self.sleep_while_running(REOPEN_DELAY);
        if !self.status.is_running() {
            return None;
        }
        self.reopen()
    }

    fn reopen(&self) -> Option<TcpListener> {
        let addr = SocketAddrV4::new(self.config.bind, self.status.port());
        match socket::open_listener(&self.status, addr, self.config.backlog) {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!(target: event_names::HTTP_REOPEN_FAILED, error = %e, "http: reopen failed");
                self.sleep_while_running(REOPEN_FAILURE_BACKOFF);
                None
            }
        }
    }

    fn sleep_while_running(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.status.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// Read the request once. `Ok(None)` means the server is stopping.
    fn read_request(&self, stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let deadline = match self.config.client_read_timeout_ms {
            0 => None,
            ms => Some(Instant::now() + Duration::from_millis(ms)),
        };
        loop {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(io::Error::from(ErrorKind::TimedOut));
                    }
                    CLIENT_READ_SLICE.min(deadline - now)
                }
                None => CLIENT_READ_SLICE,
            };
            stream.set_read_timeout(Some(slice))?;
            match stream.read(buf) {
                Ok(len) => return Ok(Some(len)),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    if !self.status.is_running() {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_client(&self, mut stream: TcpStream) {
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WAIT_TIMEOUT_MS as u64)));

        let mut buf = [0u8; routes::MAX_REQUEST_BYTES];
        let len = match self.read_request(&mut stream, &mut buf) {
            Ok(Some(len)) => len,
            Ok(None) => {
                debug!("http: client dropped on shutdown");
                return;
            }
            Err(e) => {
                warn!(
                    target: event_names::HTTP_RECV_FAILED,
                    errno = e.raw_os_error().unwrap_or(0),
                    "http: recv failed"
                );
                return;
            }
        };
        self.status.record_request();

        let route = routes::classify(&buf[..len]);
        let response: Cow<'static, [u8]> = match route {
            Route::Debug => routes::json_response(&build_debug_json(&self.status)).into(),
            Route::State => routes::json_response(&build_state_json(&self.telemetry)).into(),
            Route::NotFound => routes::NOT_FOUND_RESPONSE.into(),
        };
        if let Err(e) = stream.write_all(&response) {
            debug!(error = %e, ?route, "http: send failed");
        }
    }
}
