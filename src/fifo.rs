//! Fifo-backed stdio validation.
//!
//! A shim only makes sense with stdio that survives daemon restarts, so
//! every stdio handle wired to a container must be backed by a named pipe
//! on disk. Rather than inspecting concrete types at runtime, handles
//! expose the capability through [`IoHandle::fifo_path`] and callers
//! narrow with [`require_fifo`].

use std::path::{Path, PathBuf};

use nix::sys::stat::{stat, SFlag};

use crate::errors::ShimError;

/// An I/O handle that may be backed by a durable named pipe.
pub trait IoHandle {
    /// Path of the backing named pipe, if there is one.
    fn fifo_path(&self) -> Option<&Path>;
}

/// Narrow a handle to its fifo path, rejecting handles with no fifo
/// backing or an empty name.
pub fn require_fifo(io: &dyn IoHandle) -> Result<&Path, ShimError> {
    match io.fifo_path() {
        Some(p) if !p.as_os_str().is_empty() => Ok(p),
        _ => Err(ShimError::NotFifo),
    }
}

/// A validated named pipe on disk.
#[derive(Debug, Clone)]
pub struct Fifo {
    path: PathBuf,
}

impl Fifo {
    /// Open an existing fifo, verifying via `stat` that the path really
    /// is a named pipe.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ShimError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ShimError::NotFifo);
        }
        let st = stat(path).map_err(|_| ShimError::NotFifo)?;
        if st.st_mode & SFlag::S_IFMT.bits() != SFlag::S_IFIFO.bits() {
            return Err(ShimError::NotFifo);
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IoHandle for Fifo {
    fn fifo_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
