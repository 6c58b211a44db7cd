//! Child runtime process lifecycle.
//!
//! A runtime binary runs either directly ([`ProcessHandle::spawn_naked`]) or
//! inside a bubblewrap namespace ([`ProcessHandle::spawn_sandboxed`]) with
//! explicit read-only and read-write mount bindings. The child's stdout and
//! stderr are forwarded line-by-line into `tracing`.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A host path mounted into the sandbox at a guest path.
#[derive(Debug, Clone)]
pub struct BindMount {
    pub host: PathBuf,
    pub guest: PathBuf,
}

/// Configuration for spawning a runtime process.
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    /// Path to the runtime binary.
    pub binary: PathBuf,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Environment visible to the child. The child environment is otherwise
    /// cleared.
    pub env: Vec<(String, String)>,
    /// Read-only mounts (sandboxed mode only).
    pub bind_ro: Vec<BindMount>,
    /// Read-write mounts (sandboxed mode only).
    pub bind_rw: Vec<BindMount>,
    /// Path to the bubblewrap binary.
    pub sandbox_binary: PathBuf,
}

/// Errors from process lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),
}

/// How a child process exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if killed.
    pub signal: Option<i32>,
}

impl ProcessExit {
    /// Exit status when the real status could not be observed.
    pub const UNKNOWN: Self = Self {
        code: None,
        signal: None,
    };

    /// Whether the process exited cleanly.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt as _;
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with code {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => write!(f, "exited with unknown status"),
        }
    }
}

/// Handle to a spawned runtime process.
///
/// The child is owned by a monitor task; the handle only signals it. `wait`
/// can be awaited from any number of tasks, and `kill` is idempotent.
pub struct ProcessHandle {
    pid: u32,
    kill: CancellationToken,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessHandle {
    /// Spawn the runtime binary directly, without any sandbox.
    pub fn spawn_naked(cfg: &ProcessConfig) -> Result<Self, ProcessError> {
        let mut cmd = Command::new(&cfg.binary);
        cmd.args(&cfg.args);
        cmd.env_clear();
        cmd.envs(cfg.env.iter().map(|(k, v)| (k, v)));
        Self::spawn(cmd)
    }

    /// Spawn the runtime binary inside a bubblewrap namespace.
    ///
    /// The runtime binary is bind-mounted read-only at its own path; all
    /// other visibility into the host comes from the configured bind mounts.
    pub fn spawn_sandboxed(cfg: &ProcessConfig) -> Result<Self, ProcessError> {
        let mut cmd = Command::new(&cfg.sandbox_binary);
        cmd.arg("--unshare-all")
            .arg("--die-with-parent")
            .arg("--new-session")
            .args(["--proc", "/proc"])
            .args(["--dev", "/dev"])
            .args(["--chdir", "/"]);

        cmd.arg("--ro-bind").arg(&cfg.binary).arg(&cfg.binary);
        for bind in &cfg.bind_ro {
            cmd.arg("--ro-bind").arg(&bind.host).arg(&bind.guest);
        }
        for bind in &cfg.bind_rw {
            cmd.arg("--bind").arg(&bind.host).arg(&bind.guest);
        }
        for (key, value) in &cfg.env {
            cmd.arg("--setenv").arg(key).arg(value);
        }

        cmd.arg("--").arg(&cfg.binary).args(&cfg.args);
        cmd.env_clear();
        Self::spawn(cmd)
    }

    fn spawn(mut cmd: Command) -> Result<Self, ProcessError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(ProcessError::Spawn)?;
        let pid = child.id().unwrap_or(0);

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, pid, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, pid, "stderr");
        }

        let kill = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);

        let kill_signal = kill.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_signal.cancelled() => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let exit = status.map(ProcessExit::from).unwrap_or(ProcessExit::UNKNOWN);
            let _ = exit_tx.send(Some(exit));
        });

        Ok(Self { pid, kill, exit_rx })
    }

    /// The child's process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Kill the child (SIGKILL). Idempotent; the actual exit is observed via
    /// [`ProcessHandle::wait`].
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Wait for the child to exit.
    pub async fn wait(&self) -> ProcessExit {
        let mut rx = self.exit_rx.clone();
        let result = match rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => exit.expect("checked by wait_for"),
            Err(_) => ProcessExit::UNKNOWN,
        };
        result
    }

    /// The exit status, if the child has already exited.
    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }
}

/// Forward a child output stream into tracing, line by line.
fn forward_output<R: AsyncRead + Unpin + Send + 'static>(stream: R, pid: u32, channel: &'static str) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "peridot_host::runtime_log", pid, channel, "{}", line);
        }
    });
}
