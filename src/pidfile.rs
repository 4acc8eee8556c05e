//! Pid-file bookkeeping for supervised targets.

use std::fs;
use std::path::Path;

use crate::error::{Result, VigilError};
use crate::process::process_exists;

/// What a pid file says about its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidFileState {
    /// No pid file present.
    Absent,
    /// Pid file names a live process.
    Running(u32),
    /// Pid file named a dead process; the file has been removed.
    Stale(u32),
}

pub fn write(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, pid.to_string())?;
    Ok(())
}

pub fn read(path: &Path) -> Result<u32> {
    let contents = fs::read_to_string(path)?;
    contents.trim().parse().map_err(|_| {
        VigilError::PidFile(format!("invalid pid file {}", path.display()))
    })
}

/// Best-effort removal; a missing file is not an error.
pub fn remove(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Read the pid file and verify its process is alive. A file naming a dead
/// process is cleaned up and reported as stale.
pub fn inspect(path: &Path) -> Result<PidFileState> {
    if !path.exists() {
        return Ok(PidFileState::Absent);
    }
    let pid = read(path)?;
    if process_exists(pid) {
        Ok(PidFileState::Running(pid))
    } else {
        remove(path);
        Ok(PidFileState::Stale(pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ChildHandle, ChildStatus};
    use std::time::{Duration, Instant};

    #[test]
    fn write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("target.pid");

        write(&path, 4242).unwrap();
        assert_eq!(read(&path).unwrap(), 4242);

        remove(&path);
        assert!(!path.exists());
    }

    #[test]
    fn garbage_content_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.pid");
        std::fs::write(&path, "not-a-pid").unwrap();
        assert!(matches!(read(&path), Err(VigilError::PidFile(_))));
    }

    #[test]
    fn inspect_reports_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.pid");
        assert_eq!(inspect(&path).unwrap(), PidFileState::Absent);
    }

    #[test]
    fn inspect_reports_running_and_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.pid");

        let command = vec!["sleep".to_string(), "5".to_string()];
        let mut child = ChildHandle::spawn(&command, None, None).unwrap();
        write(&path, child.pid()).unwrap();
        assert_eq!(inspect(&path).unwrap(), PidFileState::Running(child.pid()));

        child.terminate(Duration::from_secs(2)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while child.poll() == ChildStatus::Running && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(inspect(&path).unwrap(), PidFileState::Stale(child.pid()));
        // Stale files are cleaned up on inspection.
        assert!(!path.exists());
    }
}
