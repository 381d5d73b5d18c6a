//! Crash-recoverable shim state.
//!
//! [`ShimState`] is the exact and only information needed to rebuild a
//! controller and its runtime invoker after the supervising daemon
//! restarts. It is written once when the shim is constructed and read
//! once by [`crate::Shim::load`]. Conversion to and from the live
//! controller lives on the controller; this module only defines the
//! record and its on-disk location.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ShimError;

/// File name of the persisted record inside the shim root.
pub const STATE_FILE: &str = "state.json";

/// The persisted configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShimState {
    /// Path to the container's bundle.
    pub bundle: PathBuf,
    /// OCI runtime binary name.
    pub runtime: String,
    /// OCI runtime arguments.
    #[serde(rename = "runtimeArgs", default)]
    pub runtime_args: Vec<String>,
    /// Shim binary name.
    #[serde(rename = "shim")]
    pub shim: String,
    #[serde(rename = "noPivotRoot", default)]
    pub no_pivot_root: bool,
    /// Timeout for the create handshake, in milliseconds.
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: u64,
}

impl ShimState {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

/// Write the record to `root/state.json`, readable only by the owner.
pub fn save(root: &Path, state: &ShimState) -> Result<(), ShimError> {
    let path = state_path(root);
    let json = serde_json::to_vec_pretty(state)?;
    fs::write(&path, json)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Read the record back from `root/state.json`.
pub fn load(root: &Path) -> Result<ShimState, ShimError> {
    let data = fs::read(state_path(root))?;
    let state: ShimState = serde_json::from_slice(&data)?;
    Ok(state)
}
