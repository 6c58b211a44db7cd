//! Runtime process host for the Peridot worker.
//!
//! Three layers build on each other:
//!
//! - [`process`] spawns and supervises a single child process, sandboxed
//!   with bubblewrap or naked;
//! - [`connection`] multiplexes correlated request/response frames over the
//!   unix socket the runtime connects back on;
//! - [`sandbox`] ties both into a supervised runtime instance with
//!   handshake, extended initialization and backoff restart.

pub mod connection;
pub mod process;
pub mod protocol;
pub mod sandbox;

pub use connection::Connection;
pub use process::{BindMount, ProcessConfig, ProcessError, ProcessExit, ProcessHandle};
pub use protocol::{Body, Frame, HostInfo, ProtocolError, MAX_FRAME_SIZE};
pub use sandbox::{
    DefaultHostInitializer, HostInitializer, RuntimeError, RuntimeEvent, RuntimeHandle,
    SandboxConfig, SandboxedRuntime, StartError, StartedEvent, RESET_TICKER_TIMEOUT,
    RUNTIME_CONNECT_TIMEOUT, RUNTIME_EXTENDED_INIT_TIMEOUT, RUNTIME_INIT_TIMEOUT,
    RUNTIME_INTERRUPT_TIMEOUT, WORKER_HOST_ENV,
};
