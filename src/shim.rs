//! The shim controller.
//!
//! Owns the on-disk root, the registry of supervised processes, and the
//! runtime invoker. `create` launches and registers a container's init
//! shim; `start` races the runtime's start command against an early init
//! death; `load` rebuilds a controller from persisted state after the
//! daemon restarts.

use std::collections::HashMap;
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::container::Container;
use crate::errors::ShimError;
use crate::oci::{OciRuntime, RuntimeOpts};
use crate::process::{exit_code, ShimProcess};
use crate::state::{self, ShimState};

/// Registry key for a container's init process.
pub const INIT_PROCESS: &str = "init";

/// Options for constructing a fresh [`Shim`].
#[derive(Debug, Clone)]
pub struct ShimOpts {
    /// Name of the shim binary to launch for each supervised process.
    pub name: String,
    /// OCI runtime binary name.
    pub runtime_name: String,
    /// Arguments prepended to every runtime invocation.
    pub runtime_args: Vec<String>,
    pub no_pivot_root: bool,
    /// Root directory for this shim's on-disk state. Must not exist yet.
    pub root: PathBuf,
    /// Path to the container's bundle.
    pub bundle: PathBuf,
    pub checkpoint: Option<String>,
    /// Create-handshake timeout.
    pub timeout: Duration,
}

/// A container shim controller.
///
/// Adds a long-lived supervisory parent above the container's init
/// process so higher-level daemons can exit and later re-attach to
/// running containers. Uses an OCI-compliant runtime as its executor.
#[derive(Debug)]
pub struct Shim {
    root: PathBuf,
    name: String,
    timeout: Duration,
    no_pivot_root: bool,
    bundle: PathBuf,
    checkpoint: Option<String>,
    runtime: OciRuntime,
    /// Supervised processes keyed by logical role. The lock is held only
    /// for map access, never across a blocking wait.
    processes: Mutex<HashMap<String, Arc<ShimProcess>>>,
}

impl Shim {
    /// Create a fresh shim: make the root directory (fails if it already
    /// exists, one shim instance per root) and persist the state record
    /// immediately so a crash right after construction is recoverable.
    pub fn new(opts: ShimOpts) -> Result<Self, ShimError> {
        DirBuilder::new().mode(0o711).create(&opts.root)?;
        let runtime = OciRuntime::new(RuntimeOpts {
            name: opts.runtime_name,
            args: opts.runtime_args,
        })?;
        let s = Self {
            root: opts.root,
            name: opts.name,
            timeout: opts.timeout,
            no_pivot_root: opts.no_pivot_root,
            bundle: opts.bundle,
            checkpoint: opts.checkpoint,
            runtime,
            processes: Mutex::new(HashMap::new()),
        };
        state::save(&s.root, &s.snapshot())?;
        info!(
            "shim created - root={}, runtime={}, timeout={:?}",
            s.root.display(),
            s.runtime.name(),
            s.timeout
        );
        Ok(s)
    }

    /// Rebuild a shim from the state record persisted under `root`.
    ///
    /// The process registry starts empty: supervisors for processes that
    /// were running before the restart are not re-attached.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, ShimError> {
        let root = root.into();
        let st = state::load(&root)?;
        let runtime = OciRuntime::new(RuntimeOpts {
            name: st.runtime,
            args: st.runtime_args,
        })?;
        info!(
            "shim loaded - root={}, runtime={}",
            root.display(),
            runtime.name()
        );
        Ok(Self {
            root,
            name: st.shim,
            timeout: Duration::from_millis(st.timeout_ms),
            no_pivot_root: st.no_pivot_root,
            bundle: st.bundle,
            checkpoint: None,
            runtime,
            processes: Mutex::new(HashMap::new()),
        })
    }

    /// The persisted view of this controller's configuration.
    pub fn snapshot(&self) -> ShimState {
        ShimState {
            bundle: self.bundle.clone(),
            runtime: self.runtime.name().to_string(),
            runtime_args: self.runtime.args().to_vec(),
            shim: self.name.clone(),
            no_pivot_root: self.no_pivot_root,
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runtime(&self) -> &OciRuntime {
        &self.runtime
    }

    /// Launch and supervise the container's init process.
    ///
    /// The shim binary is exec'd inside `root/init/` with the container
    /// id, bundle path, and runtime name as arguments, in its own
    /// process group so signals aimed at the daemon's group do not take
    /// it down. Registers the supervisor under `"init"` once the create
    /// handshake completes.
    pub async fn create<C: Container + ?Sized>(
        &self,
        container: &C,
    ) -> Result<Arc<ShimProcess>, ShimError> {
        let dir = self.root.join(INIT_PROCESS);
        fs::create_dir_all(&dir)?;
        let mut cmd = Command::new(&self.name);
        cmd.arg(container.id())
            .arg(container.bundle())
            .arg(self.runtime.name())
            .current_dir(&dir)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let p = self.start_command(container, cmd, dir).await?;
        self.processes
            .lock()
            .unwrap()
            .insert(INIT_PROCESS.to_string(), Arc::clone(&p));
        info!(
            "create succeeded - id={}, pid={:?}",
            container.id(),
            crate::process::ProcessDelegate::pid(p.as_ref())
        );
        Ok(p)
    }

    async fn start_command<C: Container + ?Sized>(
        &self,
        container: &C,
        mut cmd: Command,
        dir: PathBuf,
    ) -> Result<Arc<ShimProcess>, ShimError> {
        let p = Arc::new(ShimProcess::new(
            dir,
            self.no_pivot_root,
            self.checkpoint.clone(),
            container,
        )?);
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // No watcher will run; release anyone parked on the
                // done signal before reporting the launch failure.
                p.abort();
                if e.kind() == io::ErrorKind::NotFound {
                    return Err(ShimError::NotInstalled {
                        name: self.name.clone(),
                    });
                }
                return Err(e.into());
            }
        };
        // Watch for death before we have the container's pid
        p.watch(child);
        p.wait_for_create(self.timeout).await?;
        Ok(p)
    }

    /// Start the created container.
    ///
    /// Issues the runtime's `start` command while simultaneously waiting
    /// on the init supervisor's done signal. The init shim can die at any
    /// point before `start` returns; without the race this call could
    /// hang on a command whose target no longer exists, or report a
    /// low-level runtime error instead of the real cause.
    pub async fn start<C: Container + ?Sized>(&self, container: &C) -> Result<(), ShimError> {
        let init = self.process(INIT_PROCESS)?;
        let mut cmd = self.runtime.command(["start", container.id()]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;
        let output = collect_output(&mut child);

        tokio::select! {
            // Deterministic tie-break: a completed command is checked
            // before a concurrent init exit.
            biased;
            status = child.wait() => finish_start(status?, output).await,
            _ = init.done() => {
                if !init.success() {
                    // The init shim died during/before its create
                    // handshake; the start command's target is gone.
                    // Kill it and reap it. Cleanup errors are
                    // best-effort, ShimExited already explains this.
                    if let Err(e) = child.start_kill() {
                        warn!("start race: killing runtime command failed: {}", e);
                    }
                    let _ = child.wait().await;
                    output.abort();
                    return Err(ShimError::ShimExited);
                }
                // A legitimate success signal arriving concurrently;
                // surface the start command's own result.
                let status = child.wait().await?;
                finish_start(status, output).await
            }
        }
    }

    /// Delete the container through the runtime and drop its registry
    /// entry. Removal never blocks: waiters on the supervisor's done
    /// signal hold their own reference.
    pub async fn delete<C: Container + ?Sized>(&self, container: &C) -> Result<(), ShimError> {
        self.runtime.delete(container.id()).await?;
        self.processes.lock().unwrap().remove(INIT_PROCESS);
        info!("delete succeeded - id={}", container.id());
        Ok(())
    }

    /// Look up a supervised process by its registry key.
    pub fn process(&self, key: &str) -> Result<Arc<ShimProcess>, ShimError> {
        self.processes
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(ShimError::InitProcessNotExist)
    }
}

/// Drain the command's stdout/stderr concurrently so the child can never
/// block on a full pipe while the race is undecided.
fn collect_output(child: &mut Child) -> JoinHandle<String> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let (out, err) = tokio::join!(drain(stdout), drain(stderr));
        let mut s = String::from_utf8_lossy(&out).trim().to_string();
        let err = String::from_utf8_lossy(&err);
        let err = err.trim();
        if !err.is_empty() {
            if !s.is_empty() {
                s.push('\n');
            }
            s.push_str(err);
        }
        s
    })
}

async fn drain(stream: Option<impl tokio::io::AsyncRead + Unpin>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut s) = stream {
        let _ = s.read_to_end(&mut buf).await;
    }
    buf
}

async fn finish_start(
    status: std::process::ExitStatus,
    output: JoinHandle<String>,
) -> Result<(), ShimError> {
    let out = output.await.unwrap_or_default();
    if status.success() {
        return Ok(());
    }
    Err(ShimError::RuntimeCommand {
        command: format!("start exited with {}", exit_code(status)),
        output: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::{Fifo, IoHandle};
    use crate::runtime_spec::Spec;
    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;
    use std::time::Instant;
    use tempfile::TempDir;

    struct TestContainer {
        id: String,
        bundle: PathBuf,
        stdin: Fifo,
        stdout: Fifo,
        stderr: Fifo,
    }

    impl TestContainer {
        fn new(dir: &Path, id: &str) -> Self {
            let mk = |name: &str| {
                let path = dir.join(name);
                mkfifo(&path, Mode::from_bits_truncate(0o600)).unwrap();
                Fifo::open(&path).unwrap()
            };
            Self {
                id: id.to_string(),
                bundle: dir.join("bundle"),
                stdin: mk("stdin"),
                stdout: mk("stdout"),
                stderr: mk("stderr"),
            }
        }
    }

    impl Container for TestContainer {
        fn id(&self) -> &str {
            &self.id
        }
        fn bundle(&self) -> &Path {
            &self.bundle
        }
        fn spec(&self) -> Option<&Spec> {
            None
        }
        fn stdin(&self) -> &dyn IoHandle {
            &self.stdin
        }
        fn stdout(&self) -> &dyn IoHandle {
            &self.stdout
        }
        fn stderr(&self) -> &dyn IoHandle {
            &self.stderr
        }
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn shim_opts(tmp: &TempDir, shim: &Path, runtime: &Path) -> ShimOpts {
        ShimOpts {
            name: shim.display().to_string(),
            runtime_name: runtime.display().to_string(),
            runtime_args: vec![],
            no_pivot_root: false,
            root: tmp.path().join("root"),
            bundle: tmp.path().join("bundle"),
            checkpoint: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_new_fails_when_root_exists() {
        let tmp = TempDir::new().unwrap();
        let shim = write_script(tmp.path(), "shim.sh", "exit 0");
        let mut opts = shim_opts(&tmp, &shim, Path::new("true"));
        opts.root = tmp.path().to_path_buf(); // already exists
        assert!(matches!(Shim::new(opts), Err(ShimError::Io(_))));
    }

    #[test]
    fn test_start_before_create_fails() {
        let tmp = TempDir::new().unwrap();
        let shim = write_script(tmp.path(), "shim.sh", "exit 0");
        let s = Shim::new(shim_opts(&tmp, &shim, Path::new("true"))).unwrap();
        assert!(matches!(
            s.process(INIT_PROCESS),
            Err(ShimError::InitProcessNotExist)
        ));
    }

    #[tokio::test]
    async fn test_start_runtime_command_failure_carries_output() {
        let tmp = TempDir::new().unwrap();
        let shim = write_script(tmp.path(), "shim.sh", "exit 0");
        let runtime = write_script(tmp.path(), "runtime.sh", "echo start refused >&2; exit 1");
        let s = Shim::new(shim_opts(&tmp, &shim, &runtime)).unwrap();

        let init_dir = s.root().join(INIT_PROCESS);
        fs::create_dir_all(&init_dir).unwrap();
        let p = Arc::new(ShimProcess::stub(init_dir));
        s.processes
            .lock()
            .unwrap()
            .insert(INIT_PROCESS.to_string(), p);

        let c = TestContainer::new(tmp.path(), "ctr1");
        let err = s.start(&c).await.unwrap_err();
        match err {
            ShimError::RuntimeCommand { output, .. } => {
                assert!(output.contains("start refused"), "got: {output}")
            }
            other => panic!("expected RuntimeCommand, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_race_early_exit_kills_runtime_command() {
        let tmp = TempDir::new().unwrap();
        let shim = write_script(tmp.path(), "shim.sh", "exit 0");
        // A start command that would outlive the test by far
        let runtime = write_script(tmp.path(), "runtime.sh", "sleep 30");
        let s = Shim::new(shim_opts(&tmp, &shim, &runtime)).unwrap();

        let init_dir = s.root().join(INIT_PROCESS);
        fs::create_dir_all(&init_dir).unwrap();
        let p = Arc::new(ShimProcess::stub(init_dir));
        p.force_exit(false, 1); // died before the create handshake
        s.processes
            .lock()
            .unwrap()
            .insert(INIT_PROCESS.to_string(), p);

        let c = TestContainer::new(tmp.path(), "ctr1");
        let started = Instant::now();
        let err = s.start(&c).await.unwrap_err();
        assert!(matches!(err, ShimError::ShimExited));
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "start must not wait for the killed command's full sleep"
        );
    }

    #[tokio::test]
    async fn test_start_race_legit_exit_surfaces_command_result() {
        let tmp = TempDir::new().unwrap();
        let shim = write_script(tmp.path(), "shim.sh", "exit 0");
        let runtime = write_script(tmp.path(), "runtime.sh", "exit 0");
        let s = Shim::new(shim_opts(&tmp, &shim, &runtime)).unwrap();

        let init_dir = s.root().join(INIT_PROCESS);
        fs::create_dir_all(&init_dir).unwrap();
        let p = Arc::new(ShimProcess::stub(init_dir));
        p.force_exit(true, 0); // clean lifecycle exit racing the start
        s.processes
            .lock()
            .unwrap()
            .insert(INIT_PROCESS.to_string(), p);

        let c = TestContainer::new(tmp.path(), "ctr1");
        s.start(&c).await.expect("command's own result is success");
    }

    #[test]
    fn test_snapshot_matches_options() {
        let tmp = TempDir::new().unwrap();
        let shim = write_script(tmp.path(), "shim.sh", "exit 0");
        let mut opts = shim_opts(&tmp, &shim, Path::new("runc"));
        opts.runtime_args = vec!["--debug".into()];
        opts.no_pivot_root = true;
        let s = Shim::new(opts.clone()).unwrap();
        let snap = s.snapshot();
        assert_eq!(snap.runtime, "runc");
        assert_eq!(snap.runtime_args, vec!["--debug".to_string()]);
        assert_eq!(snap.shim, opts.name);
        assert!(snap.no_pivot_root);
        assert_eq!(snap.bundle, opts.bundle);
        assert_eq!(snap.timeout_ms, 5000);
    }
}
