//! The supervision loop: keep a target process running.
//!
//! A [`Supervisor`] owns its configuration and an injected event sink and
//! runs a single sequential control loop until it is cancelled or its
//! restart budget is spent. Multiple supervisors can coexist in one process;
//! nothing here is global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{Strategy, SupervisorConfig};
use crate::error::Result;
use crate::events::{Event, EventKind, EventSink};
use crate::pidfile;
use crate::policy::RestartBudget;
use crate::process::{ChildHandle, ChildStatus};

const WAIT_TICK: Duration = Duration::from_millis(25);

/// Why [`Supervisor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop flag was set.
    Cancelled,
    /// The restart budget was spent.
    Exhausted,
}

/// Summary of a supervision session.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub reason: StopReason,
    /// Successful launches.
    pub starts: u32,
    /// Relaunch attempts that were actually scheduled.
    pub restarts: u32,
    pub last_exit: Option<i32>,
    pub duration: Duration,
}

enum Attempt {
    Retry,
    GiveUp,
    Cancelled,
}

pub struct Supervisor {
    config: SupervisorConfig,
    sink: Box<dyn EventSink>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, sink: Box<dyn EventSink>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, sink })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run until `stop` is set or the restart budget is spent.
    ///
    /// At most one child instance is live at any point. Setting `stop`
    /// schedules no further restarts; a live child receives SIGTERM and is
    /// force-killed after the configured stop grace.
    pub fn run(&mut self, stop: Arc<AtomicBool>) -> Result<RunReport> {
        match self.config.strategy {
            Strategy::Await => self.run_await(&stop),
            Strategy::Poll => self.run_poll(&stop),
        }
    }

    /// Blocking relaunch loop: wait on the owned handle, restart on exit.
    fn run_await(&mut self, stop: &AtomicBool) -> Result<RunReport> {
        let session_start = Instant::now();
        let mut budget = RestartBudget::new(self.config.max_restarts, self.config.restart_window);
        let mut starts = 0u32;
        let mut restarts = 0u32;
        let mut last_exit = None;

        loop {
            if stop.load(Ordering::SeqCst) {
                return Ok(report(StopReason::Cancelled, starts, restarts, last_exit, session_start));
            }

            self.record(
                Event::new(EventKind::Starting).with_detail(self.config.command.join(" ")),
            );
            let mut child = match self.spawn() {
                Ok(child) => child,
                Err(err) => {
                    warn!("failed to spawn {}: {}", self.config.command[0], err);
                    self.record(Event::new(EventKind::StartFailed).with_detail(err.to_string()));
                    match self.next_attempt(&mut budget, stop) {
                        Attempt::Retry => {
                            restarts += 1;
                            continue;
                        }
                        Attempt::GiveUp => {
                            return Ok(report(StopReason::Exhausted, starts, restarts, last_exit, session_start))
                        }
                        Attempt::Cancelled => {
                            return Ok(report(StopReason::Cancelled, starts, restarts, last_exit, session_start))
                        }
                    }
                }
            };

            starts += 1;
            info!("target running with pid {}", child.pid());
            self.record(Event::new(EventKind::Started).with_pid(child.pid()));
            self.write_pid_file(child.pid());

            let exit = loop {
                if stop.load(Ordering::SeqCst) {
                    let code = child.terminate(self.config.stop_grace).ok().flatten();
                    self.record(
                        Event::new(EventKind::Stopped)
                            .with_pid(child.pid())
                            .with_exit_code(code),
                    );
                    self.clear_pid_file();
                    return Ok(report(StopReason::Cancelled, starts, restarts, code.or(last_exit), session_start));
                }
                match child.poll() {
                    ChildStatus::Running => thread::sleep(WAIT_TICK),
                    ChildStatus::Exited(code) => break code,
                }
            };

            last_exit = exit;
            self.record(
                Event::new(EventKind::Exited)
                    .with_pid(child.pid())
                    .with_exit_code(exit)
                    .with_detail(format!("after {:.1}s", child.uptime().as_secs_f64())),
            );
            self.clear_pid_file();

            match self.next_attempt(&mut budget, stop) {
                Attempt::Retry => restarts += 1,
                Attempt::GiveUp => {
                    return Ok(report(StopReason::Exhausted, starts, restarts, last_exit, session_start))
                }
                Attempt::Cancelled => {
                    return Ok(report(StopReason::Cancelled, starts, restarts, last_exit, session_start))
                }
            }
        }
    }

    /// Polling watchdog loop: probe the owned handle on an interval and
    /// re-verify liveness after a startup grace period on each (re)launch.
    fn run_poll(&mut self, stop: &AtomicBool) -> Result<RunReport> {
        let session_start = Instant::now();
        let mut budget = RestartBudget::new(self.config.max_restarts, self.config.restart_window);
        let mut starts = 0u32;
        let mut restarts = 0u32;
        let mut last_exit = None;
        let mut child: Option<ChildHandle> = None;

        loop {
            if stop.load(Ordering::SeqCst) {
                if let Some(mut handle) = child.take() {
                    let code = handle.terminate(self.config.stop_grace).ok().flatten();
                    self.record(
                        Event::new(EventKind::Stopped)
                            .with_pid(handle.pid())
                            .with_exit_code(code),
                    );
                    self.clear_pid_file();
                    last_exit = code.or(last_exit);
                }
                return Ok(report(StopReason::Cancelled, starts, restarts, last_exit, session_start));
            }

            if let Some(handle) = child.as_mut() {
                match handle.poll() {
                    ChildStatus::Running => {
                        debug!("target pid {} alive, next probe in {:?}", handle.pid(), self.config.poll_interval);
                        sleep_unless_stopped(self.config.poll_interval, stop);
                        continue;
                    }
                    ChildStatus::Exited(code) => {
                        let pid = handle.pid();
                        let uptime = handle.uptime();
                        child = None;
                        last_exit = code;
                        self.record(
                            Event::new(EventKind::Exited)
                                .with_pid(pid)
                                .with_exit_code(code)
                                .with_detail(format!("after {:.1}s", uptime.as_secs_f64())),
                        );
                        self.clear_pid_file();
                        match self.next_attempt(&mut budget, stop) {
                            Attempt::Retry => {
                                restarts += 1;
                                continue;
                            }
                            Attempt::GiveUp => {
                                return Ok(report(StopReason::Exhausted, starts, restarts, last_exit, session_start))
                            }
                            Attempt::Cancelled => {
                                return Ok(report(StopReason::Cancelled, starts, restarts, last_exit, session_start))
                            }
                        }
                    }
                }
            }

            // No live child: attempt a launch and judge it after the grace
            // period rather than trusting the spawn alone.
            self.record(
                Event::new(EventKind::Starting).with_detail(self.config.command.join(" ")),
            );
            match self.spawn() {
                Err(err) => {
                    warn!("failed to spawn {}: {}", self.config.command[0], err);
                    self.record(Event::new(EventKind::StartFailed).with_detail(err.to_string()));
                    match self.next_attempt(&mut budget, stop) {
                        Attempt::Retry => restarts += 1,
                        Attempt::GiveUp => {
                            return Ok(report(StopReason::Exhausted, starts, restarts, last_exit, session_start))
                        }
                        Attempt::Cancelled => {
                            return Ok(report(StopReason::Cancelled, starts, restarts, last_exit, session_start))
                        }
                    }
                }
                Ok(mut handle) => {
                    self.write_pid_file(handle.pid());
                    sleep_unless_stopped(self.config.grace_period, stop);
                    match handle.poll() {
                        ChildStatus::Running => {
                            starts += 1;
                            info!("target running with pid {}", handle.pid());
                            self.record(Event::new(EventKind::Started).with_pid(handle.pid()));
                            child = Some(handle);
                        }
                        ChildStatus::Exited(code) => {
                            last_exit = code;
                            self.record(
                                Event::new(EventKind::StartFailed)
                                    .with_pid(handle.pid())
                                    .with_exit_code(code)
                                    .with_detail("exited during grace period"),
                            );
                            self.clear_pid_file();
                            match self.next_attempt(&mut budget, stop) {
                                Attempt::Retry => restarts += 1,
                                Attempt::GiveUp => {
                                    return Ok(report(StopReason::Exhausted, starts, restarts, last_exit, session_start))
                                }
                                Attempt::Cancelled => {
                                    return Ok(report(StopReason::Cancelled, starts, restarts, last_exit, session_start))
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn spawn(&self) -> Result<ChildHandle> {
        ChildHandle::spawn(
            &self.config.command,
            self.config.working_dir.as_deref(),
            self.config.log_path.as_deref(),
        )
    }

    /// Charge the budget, then either schedule the next attempt or give up.
    fn next_attempt(&mut self, budget: &mut RestartBudget, stop: &AtomicBool) -> Attempt {
        budget.charge();
        if budget.exhausted() {
            let window = budget.window();
            self.record(Event::new(EventKind::GaveUp).with_detail(format!(
                "{} failures within {:.0}s",
                budget.recent(),
                window.as_secs_f64()
            )));
            return Attempt::GiveUp;
        }
        let delay = self.config.policy.delay_after(budget.recent());
        self.record(
            Event::new(EventKind::Restarting)
                .with_detail(format!("retry in {:.1}s", delay.as_secs_f64())),
        );
        if sleep_unless_stopped(delay, stop) {
            Attempt::Retry
        } else {
            Attempt::Cancelled
        }
    }

    fn record(&mut self, event: Event) {
        self.sink.record(&event);
    }

    fn write_pid_file(&mut self, pid: u32) {
        if let Some(path) = &self.config.pid_file {
            if let Err(err) = pidfile::write(path, pid) {
                warn!("failed to write pid file {}: {}", path.display(), err);
            }
        }
    }

    fn clear_pid_file(&self) {
        if let Some(path) = &self.config.pid_file {
            pidfile::remove(path);
        }
    }
}

fn report(
    reason: StopReason,
    starts: u32,
    restarts: u32,
    last_exit: Option<i32>,
    session_start: Instant,
) -> RunReport {
    RunReport {
        reason,
        starts,
        restarts,
        last_exit,
        duration: session_start.elapsed(),
    }
}

/// Sleep in small ticks so a stop request interrupts the wait.
/// Returns false when interrupted.
fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        thread::sleep(remaining.min(WAIT_TICK));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;

    fn config_for(command: Vec<String>) -> SupervisorConfig {
        SupervisorConfig::builder()
            .command(command)
            .restart_delay_ms(10)
            .max_restarts(1)
            .restart_window_secs(60)
            .build()
            .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = SupervisorConfig {
            command: Vec::new(),
            ..config_for(vec!["true".to_string()])
        };
        assert!(Supervisor::new(config, Box::new(MemorySink::new())).is_err());
    }

    #[test]
    fn preset_stop_flag_cancels_before_any_start() {
        let sink = MemorySink::new();
        let events = sink.handle();
        let mut supervisor =
            Supervisor::new(config_for(vec!["sleep".to_string(), "5".to_string()]), Box::new(sink))
                .unwrap();

        let stop = Arc::new(AtomicBool::new(true));
        let report = supervisor.run(stop).unwrap();

        assert_eq!(report.reason, StopReason::Cancelled);
        assert_eq!(report.starts, 0);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn unspawnable_command_exhausts_budget() {
        let sink = MemorySink::new();
        let events = sink.handle();
        let mut supervisor = Supervisor::new(
            config_for(vec!["/nonexistent/vigil-test-binary".to_string()]),
            Box::new(sink),
        )
        .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let report = supervisor.run(stop).unwrap();

        assert_eq!(report.reason, StopReason::Exhausted);
        assert_eq!(report.starts, 0);
        assert_eq!(report.restarts, 1);

        let events = events.lock().unwrap();
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Starting,
                EventKind::StartFailed,
                EventKind::Restarting,
                EventKind::Starting,
                EventKind::StartFailed,
                EventKind::GaveUp,
            ]
        );
    }
}
