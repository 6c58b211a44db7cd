//! Sandboxed runtime provisioner.
//!
//! A [`SandboxedRuntime`] owns the full lifecycle of one runtime process: it
//! sets up the host socket, spawns the (optionally bubblewrap-sandboxed)
//! child, performs the protocol handshake and extended initialization, and
//! supervises the process with exponential-backoff restart. Consumers talk to
//! whatever process is currently alive through [`SandboxedRuntime::call`] and
//! observe lifecycle changes through the event stream.

use crate::connection::Connection;
use crate::process::{BindMount, ProcessConfig, ProcessError, ProcessHandle};
use crate::protocol::{Body, HostInfo, ProtocolError};
use peridot_types::{CapabilityTee, Namespace, Version};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Deadline for the runtime to connect back to the host socket.
pub const RUNTIME_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for the protocol handshake.
pub const RUNTIME_INIT_TIMEOUT: Duration = Duration::from_secs(1);
/// Deadline for extended initialization. Attestation may require network
/// round-trips, so this is much longer than the handshake timeout.
pub const RUNTIME_EXTENDED_INIT_TIMEOUT: Duration = Duration::from_secs(120);
/// Deadline for a graceful abort before the process is killed.
pub const RUNTIME_INTERRUPT_TIMEOUT: Duration = Duration::from_secs(1);
/// After this much continuous health, the restart backoff is reset.
pub const RESET_TICKER_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Socket path visible inside the sandbox.
const GUEST_SOCKET_PATH: &str = "/host.sock";
/// Environment variable carrying the socket path to the runtime.
pub const WORKER_HOST_ENV: &str = "PERIDOT_WORKER_HOST";

const CTRL_CHANNEL_CAPACITY: usize = 16;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Restart backoff: immediate first attempt, then exponentially spaced.
struct BackoffTicker {
    delay: Duration,
    first: bool,
}

impl BackoffTicker {
    const INITIAL: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(60);
    const MULTIPLIER: f64 = 2.0;

    fn new() -> Self {
        Self {
            delay: Self::INITIAL,
            first: true,
        }
    }

    async fn tick(&mut self) {
        if self.first {
            // First attempt fires immediately.
            self.first = false;
            return;
        }
        tokio::time::sleep(self.delay).await;
        self.delay = Duration::from_secs_f64(
            (self.delay.as_secs_f64() * Self::MULTIPLIER).min(Self::MAX.as_secs_f64()),
        );
    }
}

/// Sandbox provisioner configuration.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Host environment information sent during the handshake.
    pub host_info: HostInfo,
    /// Path to the runtime binary.
    pub runtime_binary: PathBuf,
    /// Arguments passed to the runtime binary.
    pub runtime_args: Vec<String>,
    /// Version the runtime is expected to report.
    pub runtime_version: Version,
    /// Path to the bubblewrap binary.
    pub sandbox_binary: PathBuf,
    /// Run the runtime directly instead of inside a sandbox.
    pub insecure_no_sandbox: bool,
    /// Additional read-only mounts into the sandbox.
    pub bind_ro: Vec<BindMount>,
    /// Additional read-write mounts into the sandbox.
    pub bind_rw: Vec<BindMount>,
    /// Additional environment for the runtime process.
    pub env: Vec<(String, String)>,
}

/// Event broadcast when a runtime becomes available.
#[derive(Debug, Clone)]
pub struct StartedEvent {
    /// Version the runtime reported.
    pub version: Version,
    /// Attestation capability, if attestation completed.
    pub capability_tee: Option<CapabilityTee>,
}

/// Lifecycle events of a hosted runtime.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The runtime started and completed initialization.
    Started(StartedEvent),
    /// The runtime's attestation capability was refreshed.
    Updated {
        capability_tee: Option<CapabilityTee>,
    },
    /// A start attempt failed; the supervisor will back off and retry.
    FailedToStart { error: String },
    /// The runtime process is gone.
    Stopped,
}

/// Errors from starting a runtime process.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("failed to create temporary directory: {0}")]
    TempDir(#[source] std::io::Error),

    #[error("failed to create host socket: {0}")]
    Socket(#[source] std::io::Error),

    #[error(transparent)]
    Spawn(#[from] ProcessError),

    #[error("timed out while waiting for runtime to connect")]
    ConnectTimeout,

    #[error("terminated while waiting for runtime to connect")]
    TerminatedWhileConnecting,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("version mismatch (runtime reported: {reported}, configured: {configured})")]
    VersionMismatch {
        reported: Version,
        configured: Version,
    },

    #[error("extended initialization timed out")]
    InitTimeout,

    #[error("host initializer failed: {0}")]
    Initializer(String),

    #[error("runtime is stopped")]
    Stopped,
}

/// Errors from talking to a hosted runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime is not yet ready")]
    NotReady,

    #[error("runtime is stopped")]
    Stopped,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Runtime-specific host initialization, typically attestation.
#[async_trait::async_trait]
pub trait HostInitializer: Send + Sync + 'static {
    /// Complete initialization of a freshly connected runtime.
    async fn initialize(
        &self,
        conn: &Connection,
        version: Version,
    ) -> Result<StartedEvent, StartError>;

    /// Re-evaluate the runtime's attestation capability.
    ///
    /// Returns `Ok(None)` when there is nothing to refresh.
    async fn update_capability_tee(
        &self,
        conn: &Connection,
        version: Version,
    ) -> Result<Option<CapabilityTee>, StartError> {
        let _ = (conn, version);
        Ok(None)
    }
}

/// Initializer for runtimes without attestation.
pub struct DefaultHostInitializer;

#[async_trait::async_trait]
impl HostInitializer for DefaultHostInitializer {
    async fn initialize(
        &self,
        _conn: &Connection,
        version: Version,
    ) -> Result<StartedEvent, StartError> {
        Ok(StartedEvent {
            version,
            capability_tee: None,
        })
    }
}

/// Narrow runtime surface the committee node depends on.
#[async_trait::async_trait]
pub trait RuntimeHandle: Send + Sync + 'static {
    /// The hosted runtime's namespace.
    fn id(&self) -> Namespace;

    /// Issue a protocol call against the currently live runtime process.
    ///
    /// Waits for the runtime to become ready; may suspend for the full
    /// runtime-processing time.
    async fn call(&self, body: Body) -> Result<Body, RuntimeError>;

    /// Ask the manager to abort the runtime. On failure (or with `force`)
    /// the process is restarted.
    async fn abort(&self, force: bool) -> Result<(), RuntimeError>;
}

enum ControlRequest {
    Abort {
        force: bool,
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

#[derive(Default)]
struct ActiveState {
    conn: Option<Arc<Connection>>,
    capability_tee: Option<CapabilityTee>,
    version: Option<Version>,
}

struct Inner {
    cfg: SandboxConfig,
    initializer: Arc<dyn HostInitializer>,
    ctrl_tx: mpsc::Sender<ControlRequest>,
    stop: CancellationToken,
    events_tx: broadcast::Sender<RuntimeEvent>,
    update_tee_tx: mpsc::Sender<()>,
    /// Read-mostly fields shared with callers; the supervisor holds the
    /// write side.
    active: RwLock<ActiveState>,
}

impl Inner {
    async fn clear_active(&self) {
        let mut active = self.active.write().await;
        if let Some(conn) = active.conn.take() {
            conn.close().await;
        }
        active.capability_tee = None;
        active.version = None;
    }

    fn broadcast(&self, event: RuntimeEvent) {
        // Only fails when there are no subscribers, which is fine.
        let _ = self.events_tx.send(event);
    }
}

/// A supervised, sandboxed runtime instance.
pub struct SandboxedRuntime {
    inner: Arc<Inner>,
    started: AtomicBool,
    ctrl_rx: parking_lot::Mutex<Option<mpsc::Receiver<ControlRequest>>>,
    update_tee_rx: parking_lot::Mutex<Option<mpsc::Receiver<()>>>,
}

impl SandboxedRuntime {
    /// Create a new runtime instance. Nothing is spawned until
    /// [`SandboxedRuntime::start`].
    pub fn new(cfg: SandboxConfig, initializer: Arc<dyn HostInitializer>) -> Self {
        let (ctrl_tx, ctrl_rx) = mpsc::channel(CTRL_CHANNEL_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (update_tee_tx, update_tee_rx) = mpsc::channel(1);

        Self {
            inner: Arc::new(Inner {
                cfg,
                initializer,
                ctrl_tx,
                stop: CancellationToken::new(),
                events_tx,
                update_tee_tx,
                active: RwLock::new(ActiveState::default()),
            }),
            started: AtomicBool::new(false),
            ctrl_rx: parking_lot::Mutex::new(Some(ctrl_rx)),
            update_tee_rx: parking_lot::Mutex::new(Some(update_tee_rx)),
        }
    }

    /// Start the supervisor task. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let ctrl_rx = self.ctrl_rx.lock().take().expect("start is gated by the flag");
        let update_tee_rx = self
            .update_tee_rx
            .lock()
            .take()
            .expect("start is gated by the flag");
        tokio::spawn(supervisor(self.inner.clone(), ctrl_rx, update_tee_rx));
    }

    /// Request the supervisor to stop, killing any live process. Idempotent.
    pub fn stop(&self) {
        self.inner.stop.cancel();
    }

    /// Subscribe to runtime lifecycle events.
    ///
    /// The buffer is finite; slow subscribers may lose events.
    pub fn watch_events(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.inner.events_tx.subscribe()
    }

    /// The version of the currently live runtime.
    pub async fn get_active_version(&self) -> Result<Version, RuntimeError> {
        let active = self.inner.active.read().await;
        if active.conn.is_none() {
            return Err(RuntimeError::NotReady);
        }
        active.version.ok_or(RuntimeError::NotReady)
    }

    /// The attestation capability of the currently live runtime.
    pub async fn get_capability_tee(&self) -> Result<Option<CapabilityTee>, RuntimeError> {
        let active = self.inner.active.read().await;
        if active.conn.is_none() {
            return Err(RuntimeError::NotReady);
        }
        Ok(active.capability_tee.clone())
    }

    /// Request a capability re-evaluation. Coalescing: any number of
    /// requests while the supervisor is busy produce at most one
    /// re-evaluation.
    pub fn update_capability_tee(&self) {
        let _ = self.inner.update_tee_tx.try_send(());
    }

    /// Wait for the runtime connection to become ready.
    async fn get_connection(&self) -> Result<Arc<Connection>, RuntimeError> {
        let mut delay = Duration::from_millis(10);
        loop {
            if self.inner.stop.is_cancelled() {
                return Err(RuntimeError::Stopped);
            }
            {
                let active = self.inner.active.read().await;
                if let Some(conn) = &active.conn {
                    return Ok(conn.clone());
                }
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(1));
        }
    }
}

#[async_trait::async_trait]
impl RuntimeHandle for SandboxedRuntime {
    fn id(&self) -> Namespace {
        self.inner.cfg.host_info.runtime_id
    }

    async fn call(&self, body: Body) -> Result<Body, RuntimeError> {
        let conn = self.get_connection().await?;
        Ok(conn.call(body).await?)
    }

    async fn abort(&self, force: bool) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .ctrl_tx
            .send(ControlRequest::Abort { force, reply })
            .await
            .map_err(|_| RuntimeError::Stopped)?;
        rx.await.map_err(|_| RuntimeError::Stopped)?
    }
}

enum Wake {
    Stop,
    Ctrl(ControlRequest),
    ProcessExited,
    ResetTicker,
    UpdateTee,
    Event(RuntimeEvent),
}

async fn supervisor(
    inner: Arc<Inner>,
    mut ctrl_rx: mpsc::Receiver<ControlRequest>,
    mut update_tee_rx: mpsc::Receiver<()>,
) {
    // Subscribe to our own events so the cached capability stays fresh no
    // matter where an update originates.
    let mut events_rx = inner.events_tx.subscribe();

    let mut ticker: Option<BackoffTicker> = None;
    let mut attempt: u32 = 0;
    let mut process: Option<ProcessHandle> = None;
    let mut conn: Option<Arc<Connection>> = None;

    loop {
        if process.is_none() {
            if inner.stop.is_cancelled() {
                break;
            }
            if ticker.is_none() {
                ticker = Some(BackoffTicker::new());
                attempt = 0;
            }
            let backoff = ticker.as_mut().expect("just initialized");
            tokio::select! {
                _ = inner.stop.cancelled() => break,
                _ = backoff.tick() => {}
            }

            attempt += 1;
            info!(attempt, "starting runtime");

            match start_process(&inner).await {
                Ok((new_process, new_conn)) => {
                    process = Some(new_process);
                    conn = Some(new_conn);
                }
                Err(StartError::Stopped) => break,
                Err(err) => {
                    error!(err = %err, "failed to start runtime");
                    inner.broadcast(RuntimeEvent::FailedToStart {
                        error: err.to_string(),
                    });
                    continue;
                }
            }
        }

        let wake = {
            let live = process.as_ref().expect("process is alive in this arm");
            tokio::select! {
                _ = inner.stop.cancelled() => Wake::Stop,
                request = ctrl_rx.recv() => match request {
                    Some(request) => Wake::Ctrl(request),
                    None => Wake::Stop,
                },
                _ = live.wait() => Wake::ProcessExited,
                _ = tokio::time::sleep(RESET_TICKER_TIMEOUT) => Wake::ResetTicker,
                _ = update_tee_rx.recv() => Wake::UpdateTee,
                event = events_rx.recv() => match event {
                    Ok(event) => Wake::Event(event),
                    Err(_) => continue,
                },
            }
        };

        match wake {
            Wake::Stop => break,
            Wake::Ctrl(ControlRequest::Abort { force, reply }) => {
                let result =
                    handle_abort_request(&inner, &mut process, &mut conn, force).await;
                if matches!(result, Err(RuntimeError::Stopped)) {
                    let _ = reply.send(result);
                    break;
                }
                let _ = reply.send(result);
            }
            Wake::ProcessExited => {
                let live = process.take().expect("woken by process exit");
                let pid = live.pid();
                let status = live.wait().await;
                error!(
                    pid = pid,
                    status = %status,
                    "runtime process has terminated unexpectedly"
                );
                conn = None;
                inner.clear_active().await;
                inner.broadcast(RuntimeEvent::Stopped);
            }
            Wake::ResetTicker => {
                // Process has been healthy for a while; the next restart
                // starts from a fresh backoff.
                ticker = None;
            }
            Wake::UpdateTee => {
                if let Some(live_conn) = &conn {
                    let version = inner.active.read().await.version;
                    let version = match version {
                        Some(version) => version,
                        None => continue,
                    };
                    match inner
                        .initializer
                        .update_capability_tee(live_conn, version)
                        .await
                    {
                        Ok(Some(capability_tee)) => {
                            inner.active.write().await.capability_tee =
                                Some(capability_tee.clone());
                            inner.broadcast(RuntimeEvent::Updated {
                                capability_tee: Some(capability_tee),
                            });
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(err = %err, "capability re-evaluation failed");
                        }
                    }
                }
            }
            Wake::Event(RuntimeEvent::Updated { capability_tee }) => {
                inner.active.write().await.capability_tee = capability_tee;
            }
            Wake::Event(_) => {}
        }
    }

    // Shutdown: kill any live process, clear shared state and notify.
    warn!("terminating runtime");
    if let Some(live) = process.take() {
        live.kill();
        live.wait().await;
    }
    drop(conn.take());
    inner.clear_active().await;
    inner.broadcast(RuntimeEvent::Stopped);
}

/// Gracefully interrupt the runtime, killing and restarting it on failure
/// or when `force` is set.
async fn handle_abort_request(
    inner: &Arc<Inner>,
    process: &mut Option<ProcessHandle>,
    conn: &mut Option<Arc<Connection>>,
    force: bool,
) -> Result<(), RuntimeError> {
    warn!("interrupting runtime");

    let live_conn = conn.clone().ok_or(RuntimeError::NotReady)?;
    let response =
        tokio::time::timeout(RUNTIME_INTERRUPT_TIMEOUT, live_conn.call(Body::AbortRequest)).await;
    if let Ok(Ok(Body::AbortResponse)) = &response {
        if !force {
            // Graceful interrupt succeeded and no restart was demanded.
            return Ok(());
        }
    }

    warn!(force, "restarting runtime");

    // Kill the process; the manager loop respawns it after it dies.
    let live = process.take().expect("abort is only handled while alive");
    live.kill();
    tokio::select! {
        _ = live.wait() => {}
        _ = inner.stop.cancelled() => return Err(RuntimeError::Stopped),
    }

    warn!("runtime terminated due to restart request");

    conn.take();
    inner.clear_active().await;
    inner.broadcast(RuntimeEvent::Stopped);

    Ok(())
}

/// Spawn one runtime process and drive it to the initialized state.
async fn start_process(inner: &Arc<Inner>) -> Result<(ProcessHandle, Arc<Connection>), StartError> {
    let cfg = &inner.cfg;

    // The socket directory only needs to outlive process spawn; it is
    // removed when this function returns.
    let runtime_dir = tempfile::tempdir().map_err(StartError::TempDir)?;
    let socket_path = runtime_dir.path().join("host.sock");
    let listener = UnixListener::bind(&socket_path).map_err(StartError::Socket)?;

    let mut process_cfg = ProcessConfig {
        binary: cfg.runtime_binary.clone(),
        args: cfg.runtime_args.clone(),
        env: cfg.env.clone(),
        bind_ro: cfg.bind_ro.clone(),
        bind_rw: cfg.bind_rw.clone(),
        sandbox_binary: cfg.sandbox_binary.clone(),
    };

    let process = if cfg.insecure_no_sandbox {
        warn!("starting an UNSANDBOXED runtime");
        process_cfg.env.push((
            WORKER_HOST_ENV.to_string(),
            socket_path.display().to_string(),
        ));
        ProcessHandle::spawn_naked(&process_cfg)?
    } else {
        process_cfg.bind_rw.push(BindMount {
            host: socket_path.clone(),
            guest: GUEST_SOCKET_PATH.into(),
        });
        process_cfg
            .env
            .push((WORKER_HOST_ENV.to_string(), GUEST_SOCKET_PATH.to_string()));
        ProcessHandle::spawn_sandboxed(&process_cfg)?
    };

    info!(pid = process.pid(), "waiting for runtime to connect");

    let stream = tokio::select! {
        accepted = tokio::time::timeout(RUNTIME_CONNECT_TIMEOUT, listener.accept()) => {
            match accepted {
                Ok(Ok((stream, _))) => stream,
                Ok(Err(err)) => {
                    kill_and_reap(&process).await;
                    return Err(StartError::Socket(err));
                }
                Err(_) => {
                    kill_and_reap(&process).await;
                    return Err(StartError::ConnectTimeout);
                }
            }
        }
        _ = process.wait() => {
            return Err(StartError::TerminatedWhileConnecting);
        }
        _ = inner.stop.cancelled() => {
            kill_and_reap(&process).await;
            return Err(StartError::Stopped);
        }
    };

    info!(pid = process.pid(), "runtime connected");

    let conn = Arc::new(Connection::new(stream));

    let init = async {
        let version = conn.init_host(&cfg.host_info, RUNTIME_INIT_TIMEOUT).await?;
        if version != cfg.runtime_version {
            return Err(StartError::VersionMismatch {
                reported: version,
                configured: cfg.runtime_version,
            });
        }

        tokio::time::timeout(
            RUNTIME_EXTENDED_INIT_TIMEOUT,
            inner.initializer.initialize(&conn, version),
        )
        .await
        .map_err(|_| StartError::InitTimeout)?
    };

    let started = tokio::select! {
        result = init => result,
        _ = inner.stop.cancelled() => Err(StartError::Stopped),
    };

    let started = match started {
        Ok(started) => started,
        Err(err) => {
            conn.close().await;
            kill_and_reap(&process).await;
            return Err(err);
        }
    };

    {
        let mut active = inner.active.write().await;
        active.conn = Some(conn.clone());
        active.capability_tee = started.capability_tee.clone();
        active.version = Some(started.version);
    }
    inner.broadcast(RuntimeEvent::Started(started));

    Ok((process, conn))
}

async fn kill_and_reap(process: &ProcessHandle) {
    process.kill();
    process.wait().await;
}
