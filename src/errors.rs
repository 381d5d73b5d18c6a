use std::time::Duration;
use thiserror::Error;

/// Errors surfaced at the shim boundary.
///
/// Callers get one specific value per failure category so the
/// orchestration layer above can decide between retrying the whole
/// container creation and treating the failure as permanent.
#[derive(Debug, Error)]
pub enum ShimError {
    /// The handle is not backed by a named pipe on disk, or its name is
    /// empty. Anonymous pipes cannot be re-attached after a daemon
    /// restart, which defeats the point of running a shim at all.
    #[error("shim: IO is not a valid fifo on disk")]
    NotFifo,

    /// `start` (or an exec-style call) against a process key that was
    /// never created through this controller instance.
    #[error("shim: init process does not exist")]
    InitProcessNotExist,

    /// The shim binary could not be found on the system.
    #[error("{name} not installed on system")]
    NotInstalled { name: String },

    /// The init shim died before the runtime `start` command completed
    /// its work. The command was killed and reaped before this was
    /// returned.
    #[error("shim: process exited before runtime start completed")]
    ShimExited,

    /// The create handshake did not complete within the configured
    /// timeout. The partially-launched process is NOT killed; reaping it
    /// is the caller's decision.
    #[error("shim: timed out waiting for create after {0:?}")]
    CreateTimeout(Duration),

    /// The supervised process exited before the create handshake
    /// completed.
    #[error("shim: process exited before create completed")]
    EarlyExit,

    /// A delegate operation needed a pid before the handshake recorded
    /// one.
    #[error("shim: process has not reported a pid")]
    NoPid,

    #[error("runtime name must not be empty")]
    EmptyRuntimeName,

    /// A runtime command exited non-zero; `output` carries its combined
    /// stdout/stderr for diagnosability.
    #[error("runtime {command} failed: {output}")]
    RuntimeCommand { command: String, output: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("decoding state: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("os: {0}")]
    Os(#[from] nix::Error),
}
