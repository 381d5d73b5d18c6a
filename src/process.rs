//! Per-process supervision: the create handshake and the exit watcher.
//!
//! A [`ShimProcess`] owns one OS process, the shim binary backing a
//! container's init (or an exec'd process). Two asynchronous events
//! matter for its lifetime: the create confirmation (the `pid` file in
//! the control directory becoming readable) and the process's own exit.
//! They can land in either order and must be reconciled without blocking
//! the exit watcher behind any lock.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{chown, Gid, Pid, Uid};
use serde::Serialize;
use tokio::process::Child;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::container::Container;
use crate::errors::ShimError;
use crate::fifo::require_fifo;
use crate::runtime_spec::resolve_root_ids;

/// How often the create handshake re-reads the pid file.
const CREATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Name of the pid file the shim binary writes into its control
/// directory once the container process has been created.
pub const PID_FILE: &str = "pid";

/// Name of the process descriptor written for the shim binary to read.
pub const PROCESS_FILE: &str = "process.json";

/// A one-shot exit notification.
///
/// Fires at most once no matter how many times [`signal`](Self::signal)
/// is called, and any number of concurrent waiters observe it. Waiting
/// after the signal has fired returns immediately.
#[derive(Debug, Default)]
pub struct ExitSignal {
    fired: AtomicBool,
    notify: Notify,
}

impl ExitSignal {
    pub fn signal(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_signalled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before re-checking the flag so a signal() between the
        // check and the await cannot be missed.
        notified.as_mut().enable();
        if self.fired.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

/// Validated stdio fifo paths for a supervised process.
#[derive(Debug, Clone, Serialize)]
pub struct StdioPaths {
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

/// Descriptor dropped into the control directory for the shim binary.
#[derive(Debug, Serialize)]
struct ProcessRecord<'a> {
    id: &'a str,
    bundle: &'a Path,
    #[serde(rename = "noPivotRoot")]
    no_pivot_root: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint: Option<&'a str>,
    stdio: &'a StdioPaths,
    #[serde(rename = "rootUID")]
    root_uid: u32,
    #[serde(rename = "rootGID")]
    root_gid: u32,
}

/// One supervised OS process backing a container's init.
#[derive(Debug)]
pub struct ShimProcess {
    dir: PathBuf,
    stdio: StdioPaths,
    /// Container pid reported through the pid file. 0 means not yet known.
    pid: AtomicI32,
    /// Set once the create confirmation has been observed.
    created: AtomicBool,
    /// Final outcome, meaningful only after `done` has fired: true when
    /// the process reached a confirmed running state before exiting.
    success: AtomicBool,
    /// Shim process exit code, meaningful only after `done` has fired.
    exit_status: AtomicI32,
    done: ExitSignal,
}

impl ShimProcess {
    /// Prepare supervision state for a process about to be launched in
    /// `dir`: validate the container's stdio fifos, resolve the mapped
    /// root identity, write the process descriptor, and chown the
    /// control directory so a user-namespaced init can use it.
    pub fn new<C: Container + ?Sized>(
        dir: PathBuf,
        no_pivot_root: bool,
        checkpoint: Option<String>,
        container: &C,
    ) -> Result<Self, ShimError> {
        let stdio = StdioPaths {
            stdin: require_fifo(container.stdin())?.to_path_buf(),
            stdout: require_fifo(container.stdout())?.to_path_buf(),
            stderr: require_fifo(container.stderr())?.to_path_buf(),
        };
        let (root_uid, root_gid) = resolve_root_ids(container.spec());
        let record = ProcessRecord {
            id: container.id(),
            bundle: container.bundle(),
            no_pivot_root,
            checkpoint: checkpoint.as_deref(),
            stdio: &stdio,
            root_uid,
            root_gid,
        };
        fs::write(dir.join(PROCESS_FILE), serde_json::to_vec_pretty(&record)?)?;
        if root_uid != 0 || root_gid != 0 {
            // The control dir holds fifos and exit files created on the
            // init process's behalf; ownership must match its mapped root.
            chown(
                &dir,
                Some(Uid::from_raw(root_uid)),
                Some(Gid::from_raw(root_gid)),
            )?;
        }
        Ok(Self {
            dir,
            stdio,
            pid: AtomicI32::new(0),
            created: AtomicBool::new(false),
            success: AtomicBool::new(false),
            exit_status: AtomicI32::new(0),
            done: ExitSignal::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stdio(&self) -> &StdioPaths {
        &self.stdio
    }

    /// True once the exit watcher has observed termination.
    pub fn exited(&self) -> bool {
        self.done.is_signalled()
    }

    /// Wait until the exit watcher observes termination. Usable by any
    /// number of concurrent callers, before or after the fact.
    pub async fn done(&self) {
        self.done.wait().await
    }

    /// Whether the process reached a confirmed running state before it
    /// exited. Only meaningful once [`exited`](Self::exited) is true or
    /// the create handshake has completed.
    pub fn success(&self) -> bool {
        self.success.load(Ordering::SeqCst)
    }

    /// Start the background exit watcher for the launched child. Called
    /// exactly once, immediately after the OS-level spawn succeeds. The
    /// watcher blocks only on process exit; it takes no locks.
    pub fn watch(self: &Arc<Self>, mut child: Child) {
        let p = Arc::clone(self);
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!("exit watcher: wait failed: {}", e);
                    -1
                }
            };
            p.exit_status.store(code, Ordering::SeqCst);
            // An exit before the create confirmation is an early/crash
            // exit; record the distinction before releasing waiters.
            p.success.store(p.created.load(Ordering::SeqCst), Ordering::SeqCst);
            debug!(
                "exit watcher: process exited, code={}, created={}",
                code,
                p.created.load(Ordering::SeqCst)
            );
            p.done.signal();
        });
    }

    /// Release anyone waiting on the done signal when the spawn itself
    /// failed and no watcher will ever run.
    pub(crate) fn abort(&self) {
        self.done.signal();
    }

    /// Block until the create confirmation (a readable pid file) arrives,
    /// the process exits early, or `timeout` elapses.
    ///
    /// A pid file that is already present wins over a concurrent exit:
    /// the handshake did complete, even if the process is now gone. On
    /// timeout the partially-launched process is left running; killing it
    /// is deliberately the caller's decision.
    pub async fn wait_for_create(&self, timeout: Duration) -> Result<(), ShimError> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            if let Some(pid) = self.read_pid_file() {
                self.pid.store(pid, Ordering::SeqCst);
                self.created.store(true, Ordering::SeqCst);
                debug!("create handshake complete, pid={}", pid);
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = self.done.wait() => {
                    // One last look: the pid file may have landed in the
                    // same instant the process died.
                    if let Some(pid) = self.read_pid_file() {
                        self.pid.store(pid, Ordering::SeqCst);
                        self.created.store(true, Ordering::SeqCst);
                        return Ok(());
                    }
                    return Err(ShimError::EarlyExit);
                }
                _ = &mut deadline => return Err(ShimError::CreateTimeout(timeout)),
                _ = tokio::time::sleep(CREATE_POLL_INTERVAL) => {}
            }
        }
    }

    fn read_pid_file(&self) -> Option<i32> {
        let s = fs::read_to_string(self.dir.join(PID_FILE)).ok()?;
        let pid: i32 = s.trim().parse().ok()?;
        (pid > 0).then_some(pid)
    }
}

/// Process-control surface handed back to the orchestration layer.
#[async_trait]
pub trait ProcessDelegate: Send + Sync {
    /// Pid of the container process, once the create handshake has
    /// reported it.
    fn pid(&self) -> Option<i32>;

    /// Send a signal to the container process.
    fn signal(&self, sig: Signal) -> Result<(), ShimError>;

    /// Wait for termination and return the recorded exit code.
    async fn wait(&self) -> i32;

    /// Exit code, if the process has already terminated.
    fn exit_status(&self) -> Option<i32>;
}

#[async_trait]
impl ProcessDelegate for ShimProcess {
    fn pid(&self) -> Option<i32> {
        let pid = self.pid.load(Ordering::SeqCst);
        (pid > 0).then_some(pid)
    }

    fn signal(&self, sig: Signal) -> Result<(), ShimError> {
        let pid = self.pid().ok_or(ShimError::NoPid)?;
        kill(Pid::from_raw(pid), sig)?;
        Ok(())
    }

    async fn wait(&self) -> i32 {
        self.done.wait().await;
        self.exit_status.load(Ordering::SeqCst)
    }

    fn exit_status(&self) -> Option<i32> {
        self.exited()
            .then(|| self.exit_status.load(Ordering::SeqCst))
    }
}

/// Collapse an `ExitStatus` into the shell convention: the exit code, or
/// 128 + signal number for a signalled process.
pub(crate) fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(test)]
impl ShimProcess {
    /// Bare supervisor for tests that drive the signals by hand.
    pub(crate) fn stub(dir: PathBuf) -> Self {
        Self {
            dir,
            stdio: StdioPaths {
                stdin: PathBuf::from("/dev/null"),
                stdout: PathBuf::from("/dev/null"),
                stderr: PathBuf::from("/dev/null"),
            },
            pid: AtomicI32::new(0),
            created: AtomicBool::new(false),
            success: AtomicBool::new(false),
            exit_status: AtomicI32::new(0),
            done: ExitSignal::default(),
        }
    }

    /// Simulate the watcher observing termination.
    pub(crate) fn force_exit(&self, success: bool, code: i32) {
        self.exit_status.store(code, Ordering::SeqCst);
        self.success.store(success, Ordering::SeqCst);
        self.done.signal();
    }
}
