//! Host proxy PID file handling
//!
//! The PID file is a hint, never a lock: staleness is decided by process
//! liveness, not file presence, so a crashed proxy can always be
//! superseded without manual cleanup.

use crate::errors::Result;
use crate::fsutil;
use std::path::Path;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

/// Record the current process ID atomically.
pub fn write_pid_file(path: &Path) -> Result<()> {
    fsutil::atomic_write(path, std::process::id().to_string().as_bytes())
}

/// Read a PID from the file; `None` on missing or malformed content.
pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.trim().parse::<u32>().ok())
}

/// Remove the PID file if present.
pub fn remove_pid_file(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Whether the given PID names a live process.
pub fn process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    system.process(Pid::from_u32(pid)).is_some()
}

/// Whether a daemon recorded in the PID file is still alive. A file whose
/// PID names a dead process is stale and treated as absent.
pub fn is_daemon_running(path: &Path) -> bool {
    match read_pid(path) {
        Some(pid) => process_alive(pid),
        None => false,
    }
}

/// Drop a stale PID file (present but naming a dead process).
pub fn clear_stale(path: &Path) {
    if path.exists() && !is_daemon_running(path) {
        debug!(path = %path.display(), "Clearing stale PID file");
        remove_pid_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn own_pid_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn missing_or_malformed_file_reads_none() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("proxy.pid");
        assert_eq!(read_pid(&path), None);
        assert!(!is_daemon_running(&path));

        std::fs::write(&path, "not-a-pid").unwrap();
        assert_eq!(read_pid(&path), None);
        assert!(!is_daemon_running(&path));
    }

    #[test]
    fn live_pid_file_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("proxy.pid");
        write_pid_file(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
        assert!(is_daemon_running(&path));
        // A live PID is not stale.
        clear_stale(&path);
        assert!(path.exists());
    }

    #[test]
    fn dead_pid_is_stale_and_cleared() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("proxy.pid");
        // PID max on Linux defaults to 4194304; this is never a live
        // process on any supported platform.
        std::fs::write(&path, "999999999").unwrap();
        assert!(!is_daemon_running(&path));
        clear_stale(&path);
        assert!(!path.exists());
    }
}
