//! The container descriptor consumed by the shim.
//!
//! Container and process domain objects belong to the orchestration
//! layer; the shim only needs an identifier, the bundle path, the OCI
//! spec (for user-namespace id translation), and the stdio handles to
//! validate as fifos.

use std::path::Path;

use crate::fifo::IoHandle;
use crate::runtime_spec::Spec;

pub trait Container {
    /// Container identifier, used as the runtime's container id.
    fn id(&self) -> &str;

    /// Path to the container's OCI bundle directory.
    fn bundle(&self) -> &Path;

    /// The container's runtime spec, when the orchestration layer has
    /// one loaded. Absent means no user-namespace translation.
    fn spec(&self) -> Option<&Spec> {
        None
    }

    fn stdin(&self) -> &dyn IoHandle;
    fn stdout(&self) -> &dyn IoHandle;
    fn stderr(&self) -> &dyn IoHandle;
}
