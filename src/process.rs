//! Spawning and observing the supervised child process.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Result, VigilError};

const TERM_POLL: Duration = Duration::from_millis(25);

/// Outcome of a non-blocking liveness check on an owned child handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    Running,
    /// Exit code is `None` when the child was killed by a signal.
    Exited(Option<i32>),
}

/// An owned handle to a spawned target process.
///
/// Liveness is always judged via this handle, never by matching the process
/// table, so an unrelated process with a similar command line can never be
/// mistaken for the target.
pub struct ChildHandle {
    child: Child,
    pid: u32,
    spawned_at: Instant,
}

impl ChildHandle {
    /// Launch the target with stdin closed and, when a log path is given,
    /// stdout/stderr appended into the shared log file.
    pub fn spawn(
        command: &[String],
        working_dir: Option<&Path>,
        log_path: Option<&Path>,
    ) -> Result<Self> {
        if command.is_empty() {
            return Err(VigilError::InvalidConfiguration(
                "command cannot be empty".to_string(),
            ));
        }

        let mut cmd = Command::new(&command[0]);
        cmd.args(&command[1..]);
        cmd.stdin(Stdio::null());

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        match log_path {
            Some(path) => {
                let out = OpenOptions::new().create(true).append(true).open(path)?;
                let err = out.try_clone()?;
                cmd.stdout(Stdio::from(out));
                cmd.stderr(Stdio::from(err));
            }
            None => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::null());
            }
        }

        let child = cmd.spawn()?;
        let pid = child.id();

        Ok(Self {
            child,
            pid,
            spawned_at: Instant::now(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Time since the child was spawned.
    pub fn uptime(&self) -> Duration {
        self.spawned_at.elapsed()
    }

    /// Check liveness without blocking; a failed wait counts as exited.
    pub fn poll(&mut self) -> ChildStatus {
        match self.child.try_wait() {
            Ok(Some(status)) => ChildStatus::Exited(status.code()),
            Ok(None) => ChildStatus::Running,
            Err(_) => ChildStatus::Exited(None),
        }
    }

    /// Ask the child to exit, escalating to a hard kill after `grace`.
    ///
    /// On Unix the child first receives SIGTERM; elsewhere it is killed
    /// outright. The child is reaped before returning.
    pub fn terminate(&mut self, grace: Duration) -> io::Result<Option<i32>> {
        if let ChildStatus::Exited(code) = self.poll() {
            return Ok(code);
        }

        #[cfg(unix)]
        {
            unsafe {
                libc::kill(self.pid as libc::pid_t, libc::SIGTERM);
            }
            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                if let ChildStatus::Exited(code) = self.poll() {
                    return Ok(code);
                }
                thread::sleep(TERM_POLL);
            }
        }
        #[cfg(not(unix))]
        let _ = grace;

        // The child may exit between the last poll and the kill, in which
        // case kill reports an error we can ignore; wait still reaps.
        let _ = self.child.kill();
        let status = self.child.wait()?;
        Ok(status.code())
    }
}

/// Whether a process with `pid` currently exists.
///
/// Used for pid-file staleness and the status display only; supervision
/// liveness goes through [`ChildHandle::poll`].
pub fn process_exists(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new(&format!("/proc/{}", pid)).exists()
    }

    #[cfg(not(target_os = "linux"))]
    {
        use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[Pid::from(pid as usize)]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system.process(Pid::from(pid as usize)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn wait_for_exit(child: &mut ChildHandle, timeout: Duration) -> ChildStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match child.poll() {
                ChildStatus::Running if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(10))
                }
                status => return status,
            }
        }
    }

    #[test]
    fn short_child_reports_exit_code() {
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let mut child = ChildHandle::spawn(&command, None, None).unwrap();
        let status = wait_for_exit(&mut child, Duration::from_secs(5));
        assert_eq!(status, ChildStatus::Exited(Some(3)));
    }

    #[test]
    fn missing_executable_fails_to_spawn() {
        let command = vec!["/nonexistent/vigil-test-binary".to_string()];
        assert!(ChildHandle::spawn(&command, None, None).is_err());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(ChildHandle::spawn(&[], None, None).is_err());
    }

    #[test]
    fn terminate_stops_long_running_child() {
        let command = vec!["sleep".to_string(), "30".to_string()];
        let mut child = ChildHandle::spawn(&command, None, None).unwrap();
        assert_eq!(child.poll(), ChildStatus::Running);

        let started = Instant::now();
        child.terminate(Duration::from_secs(2)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(child.poll(), ChildStatus::Exited(_)));
    }

    #[test]
    fn child_output_is_appended_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("target.log");
        fs::write(&log, "existing line\n").unwrap();

        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo hello-from-child".to_string(),
        ];
        let mut child = ChildHandle::spawn(&command, None, Some(&log)).unwrap();
        wait_for_exit(&mut child, Duration::from_secs(5));

        let contents = fs::read_to_string(&log).unwrap();
        assert!(contents.starts_with("existing line\n"));
        assert!(contents.contains("hello-from-child"));
    }

    #[test]
    fn working_dir_is_applied() {
        let dir = tempfile::tempdir().unwrap();

        let command = vec!["sh".to_string(), "-c".to_string(), "touch marker".to_string()];
        let mut child = ChildHandle::spawn(&command, Some(dir.path()), None).unwrap();
        wait_for_exit(&mut child, Duration::from_secs(5));

        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn exited_child_no_longer_exists() {
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 0".to_string()];
        let mut child = ChildHandle::spawn(&command, None, None).unwrap();
        wait_for_exit(&mut child, Duration::from_secs(5));
        // try_wait has reaped the child; the pid must be gone.
        assert!(!process_exists(child.pid()));
    }
}
