//! Tether is a container shim supervisor. It sits between a high-level
//! container daemon and an OCI-compliant runtime binary, owning each
//! container's init process so the daemon can exit, crash, or upgrade
//! without losing running containers. A restarted daemon re-attaches by
//! loading the state record Tether persists under its root directory.
//!
//! The crate exposes:
//!
//! - [`Shim`]: the controller owning the on-disk root, the process
//!   registry, and the runtime invoker.
//! - [`ShimProcess`]: one supervised OS process (the shim binary backing a
//!   container's init), with its create handshake and background exit
//!   watcher.
//! - [`OciRuntime`]: thin invoker for the external OCI runtime executable.
//! - [`ShimState`]: the crash-recoverable configuration record.

pub mod config;
pub mod container;
pub mod errors;
pub mod fifo;
pub mod oci;
pub mod process;
pub mod runtime_spec;
pub mod shim;
pub mod state;

pub use container::Container;
pub use errors::ShimError;
pub use fifo::{require_fifo, Fifo, IoHandle};
pub use oci::{CreateOpts, OciRuntime, RuntimeOpts};
pub use process::{ExitSignal, ProcessDelegate, ShimProcess};
pub use shim::{Shim, ShimOpts, INIT_PROCESS};
pub use state::ShimState;
