//! Live load generator processes
//!
//! Each running generator is tracked twice: in an in-memory table owned by the
//! engine, and in a PID side file in the work directory so that a stop issued
//! from another process can still find it. Claiming a handle removes it from
//! both places atomically, so at most one stopper ever signals a process.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::ExecutionError;
use crate::models::TestId;
use crate::utils::fs::file_safe;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

type HandleKey = (String, TestId);

/// How a terminated process went away
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace period after SIGTERM
    Graceful,
    /// Still alive after the grace period and sent SIGKILL
    Killed,
}

/// Table of live generator processes keyed by `(run_id, test_id)`
pub struct ProcessTable {
    dir: PathBuf,
    live: Mutex<HashMap<HandleKey, u32>>,
}

impl ProcessTable {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Side file for a pair: `locust_<run>_<test>.pid`
    pub fn side_file(&self, run_id: &str, test_id: TestId) -> PathBuf {
        self.dir
            .join(format!("locust_{}_{}.pid", file_safe(run_id), test_id))
    }

    /// Record a live process in memory and on disk
    pub fn register(&self, run_id: &str, test_id: TestId, pid: u32) -> Result<(), ExecutionError> {
        let path = self.side_file(run_id, test_id);
        write_pid(&path, pid).map_err(|e| ExecutionError::ProcessHandleUnavailable {
            run_id: run_id.to_string(),
            test_id,
            reason: format!("cannot write {}: {e}", path.display()),
        })?;

        lock(&self.live).insert((run_id.to_string(), test_id), pid);
        debug!(run_id = %run_id, test_id, pid, "Registered process handle");
        Ok(())
    }

    /// Forget a process after it exited on its own
    pub fn release(&self, run_id: &str, test_id: TestId) {
        lock(&self.live).remove(&(run_id.to_string(), test_id));
        remove_quietly(&self.side_file(run_id, test_id));
    }

    /// Take exclusive ownership of a process handle.
    ///
    /// The in-memory table is consulted first; otherwise the side file is
    /// renamed to a claim file, which succeeds for exactly one caller.
    pub fn claim(&self, run_id: &str, test_id: TestId) -> Result<u32, ExecutionError> {
        let side_file = self.side_file(run_id, test_id);

        if let Some(pid) = lock(&self.live).remove(&(run_id.to_string(), test_id)) {
            remove_quietly(&side_file);
            return Ok(pid);
        }

        let unavailable = |reason: String| ExecutionError::ProcessHandleUnavailable {
            run_id: run_id.to_string(),
            test_id,
            reason,
        };

        let claimed = side_file.with_extension(format!("pid.claim.{}", std::process::id()));
        match fs::rename(&side_file, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(unavailable(format!(
                    "no live handle and no side file at {}",
                    side_file.display()
                )));
            }
            Err(e) => {
                return Err(unavailable(format!(
                    "cannot claim {}: {e}",
                    side_file.display()
                )))
            }
        }

        let content = fs::read_to_string(&claimed);
        remove_quietly(&claimed);
        let content = content.map_err(|e| unavailable(format!("cannot read side file: {e}")))?;
        content
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or_else(|| unavailable(format!("side file holds no pid: {:?}", content.trim())))
    }

    #[cfg(test)]
    pub fn is_registered(&self, run_id: &str, test_id: TestId) -> bool {
        lock(&self.live).contains_key(&(run_id.to_string(), test_id))
    }

    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        lock(&self.live).len()
    }
}

/// Send SIGTERM, wait up to `grace` for the process to go away, then SIGKILL.
///
/// Fails with `ProcessNotFound` if the process no longer exists when the
/// first signal is sent.
pub async fn terminate(pid: u32, grace: Duration) -> Result<Termination, ExecutionError> {
    signal(pid, Signal::Term)?;
    info!(pid, "Sent SIGTERM");

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return Ok(Termination::Graceful);
        }
        sleep(POLL_INTERVAL).await;
    }

    if !is_alive(pid) {
        return Ok(Termination::Graceful);
    }

    warn!(pid, "Process still alive after {:?}, sending SIGKILL", grace);
    match signal(pid, Signal::Kill) {
        Ok(()) | Err(ExecutionError::ProcessNotFound(_)) => Ok(Termination::Killed),
        Err(e) => Err(e),
    }
}

#[derive(Clone, Copy, Debug)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal(pid: u32, signal: Signal) -> Result<(), ExecutionError> {
    let signo = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };

    let rc = unsafe { libc::kill(pid as libc::pid_t, signo) };
    if rc == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Err(ExecutionError::ProcessNotFound(format!("pid {pid}")))
    } else {
        Err(ExecutionError::Launch(format!(
            "failed to signal pid {pid}: {err}"
        )))
    }
}

#[cfg(not(unix))]
fn signal(pid: u32, _signal: Signal) -> Result<(), ExecutionError> {
    Err(ExecutionError::Launch(format!(
        "signalling pid {pid} is only supported on unix"
    )))
}

/// Whether a process with this pid exists
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

fn write_pid(path: &Path, pid: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("pid.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        writeln!(file, "{pid}")?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_side_file_name() {
        let table = ProcessTable::new("/work");
        assert_eq!(
            table.side_file("run-B", 9),
            PathBuf::from("/work/locust_run-B_9.pid")
        );
    }

    #[test]
    fn test_register_claim_from_memory() {
        let dir = tempdir().unwrap();
        let table = ProcessTable::new(dir.path());

        table.register("run-A", 7, 4242).unwrap();
        assert!(table.side_file("run-A", 7).exists());
        assert!(table.is_registered("run-A", 7));

        assert_eq!(table.claim("run-A", 7).unwrap(), 4242);
        assert!(!table.side_file("run-A", 7).exists());
        assert!(matches!(
            table.claim("run-A", 7),
            Err(ExecutionError::ProcessHandleUnavailable { .. })
        ));
    }

    #[test]
    fn test_claim_from_side_file_is_single_use() {
        let dir = tempdir().unwrap();
        let writer = ProcessTable::new(dir.path());
        writer.register("run-A", 7, 4242).unwrap();

        // A separate table sees only the side file
        let other = ProcessTable::new(dir.path());
        assert_eq!(other.claim("run-A", 7).unwrap(), 4242);
        assert!(other.claim("run-A", 7).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_side_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let table = ProcessTable::new(dir.path());
        let err = table.claim("run-B", 9).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::ProcessHandleUnavailable { test_id: 9, .. }
        ));
    }

    #[test]
    fn test_garbage_side_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let table = ProcessTable::new(dir.path());
        std::fs::write(table.side_file("r", 1), "not-a-pid").unwrap();
        assert!(table.claim("r", 1).is_err());
        assert!(!table.side_file("r", 1).exists());
    }

    #[test]
    fn test_release_removes_both_tiers() {
        let dir = tempdir().unwrap();
        let table = ProcessTable::new(dir.path());
        table.register("r", 1, 99).unwrap();
        table.release("r", 1);
        assert_eq!(table.live_count(), 0);
        assert!(!table.side_file("r", 1).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_live_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let waiter = tokio::spawn(async move { child.wait().await });

        let outcome = terminate(pid, Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, Termination::Graceful);

        let status = waiter.await.unwrap().unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; exec sleep 30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        // give the shell time to install the trap
        sleep(Duration::from_millis(200)).await;
        let waiter = tokio::spawn(async move { child.wait().await });

        let outcome = terminate(pid, Duration::from_millis(300)).await.unwrap();
        assert_eq!(outcome, Termination::Killed);
        assert!(waiter.await.unwrap().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_exited_process_is_not_found() {
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();

        assert!(matches!(
            terminate(pid, Duration::from_secs(1)).await,
            Err(ExecutionError::ProcessNotFound(_))
        ));
    }
}
