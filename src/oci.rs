//! Invoker for the external OCI-compliant runtime binary.
//!
//! Pure delegation to subprocess execution: the runtime's own CLI
//! protocol is not modelled here beyond `create`/`start`/`delete` and
//! the convention that failures carry combined stdout/stderr.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::debug;

use crate::errors::ShimError;

/// Configuration for an [`OciRuntime`].
#[derive(Debug, Clone)]
pub struct RuntimeOpts {
    /// Runtime binary name (resolved through PATH) or absolute path.
    pub name: String,
    /// Arguments prepended to every invocation, e.g. `--root`.
    pub args: Vec<String>,
}

/// Options for the runtime `create` command.
#[derive(Debug, Clone, Default)]
pub struct CreateOpts {
    pub no_pivot_root: bool,
    pub checkpoint: Option<String>,
    pub pid_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct OciRuntime {
    name: String,
    args: Vec<String>,
}

impl OciRuntime {
    pub fn new(opts: RuntimeOpts) -> Result<Self, ShimError> {
        if opts.name.is_empty() {
            return Err(ShimError::EmptyRuntimeName);
        }
        Ok(Self {
            name: opts.name,
            args: opts.args,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Build a runtime invocation with the configured global arguments
    /// followed by `args`. Callers that need to race or cancel the
    /// command spawn it themselves; `create`/`start`/`delete` below run
    /// to completion.
    pub fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.name);
        cmd.args(&self.args);
        cmd.args(args);
        cmd
    }

    pub async fn create(
        &self,
        id: &str,
        bundle: &Path,
        opts: &CreateOpts,
    ) -> Result<(), ShimError> {
        let mut args: Vec<String> = vec!["create".into(), "--bundle".into()];
        args.push(bundle.display().to_string());
        if opts.no_pivot_root {
            args.push("--no-pivot".into());
        }
        if let Some(checkpoint) = &opts.checkpoint {
            args.push("--checkpoint".into());
            args.push(checkpoint.clone());
        }
        if let Some(pid_file) = &opts.pid_file {
            args.push("--pid-file".into());
            args.push(pid_file.display().to_string());
        }
        args.push(id.to_string());
        self.run_checked("create", self.command(args)).await
    }

    pub async fn start(&self, id: &str) -> Result<(), ShimError> {
        self.run_checked("start", self.command(["start", id])).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ShimError> {
        self.run_checked("delete", self.command(["delete", id]))
            .await
    }

    async fn run_checked(&self, verb: &str, mut cmd: Command) -> Result<(), ShimError> {
        debug!("runtime {} - invoking {}", verb, self.name);
        let out = cmd.output().await?;
        if !out.status.success() {
            return Err(ShimError::RuntimeCommand {
                command: verb.to_string(),
                output: combined_output(&out),
            });
        }
        Ok(())
    }
}

/// Merge a finished command's stdout and stderr into one diagnostic
/// string, the way callers expect to see runtime failures reported.
pub(crate) fn combined_output(out: &Output) -> String {
    let mut s = String::from_utf8_lossy(&out.stdout).trim().to_string();
    let err = String::from_utf8_lossy(&out.stderr);
    let err = err.trim();
    if !err.is_empty() {
        if !s.is_empty() {
            s.push('\n');
        }
        s.push_str(err);
    }
    s
}
