//! Supervisor configuration and its validating builder.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, VigilError};
use crate::policy::RestartPolicy;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);
pub const DEFAULT_RESTART_WINDOW: Duration = Duration::from_secs(300);
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// How the supervisor observes the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Spawn the child and block on its handle until it exits.
    Await,
    /// Spawn the child, then probe its liveness on a fixed interval,
    /// re-verifying after a startup grace period on each (re)launch.
    Poll,
}

impl FromStr for Strategy {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "await" => Ok(Strategy::Await),
            "poll" => Ok(Strategy::Poll),
            other => Err(VigilError::InvalidConfiguration(format!(
                "unknown strategy '{}' (expected 'await' or 'poll')",
                other
            ))),
        }
    }
}

/// Everything a [`Supervisor`](crate::Supervisor) needs for its lifetime.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Executable and arguments of the target.
    pub command: Vec<String>,
    /// Working directory for the target.
    pub working_dir: Option<PathBuf>,
    /// Append-only event log; the child's stdout/stderr lands here too.
    pub log_path: Option<PathBuf>,
    /// Pid file updated on every (re)start and removed on exit.
    pub pid_file: Option<PathBuf>,
    pub strategy: Strategy,
    /// Liveness-check interval (poll strategy).
    pub poll_interval: Duration,
    /// Delay after a (re)launch before liveness is re-verified (poll strategy).
    pub grace_period: Duration,
    pub policy: RestartPolicy,
    /// Restart cap within `restart_window`; `None` retries forever.
    pub max_restarts: Option<u32>,
    pub restart_window: Duration,
    /// How long the child gets to exit after SIGTERM before it is killed.
    pub stop_grace: Duration,
}

impl SupervisorConfig {
    /// A config for `command` with default timings.
    pub fn new(command: Vec<String>) -> Result<Self> {
        Self::builder().command(command).build()
    }

    pub fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(VigilError::InvalidConfiguration(
                "command cannot be empty".to_string(),
            ));
        }
        if self.command[0].is_empty() {
            return Err(VigilError::InvalidConfiguration(
                "executable path cannot be empty".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(VigilError::InvalidConfiguration(
                "poll interval must be positive".to_string(),
            ));
        }
        if self.grace_period.is_zero() {
            return Err(VigilError::InvalidConfiguration(
                "grace period must be positive".to_string(),
            ));
        }
        if self.restart_window.is_zero() {
            return Err(VigilError::InvalidConfiguration(
                "restart window must be positive".to_string(),
            ));
        }
        self.policy.validate()
    }
}

/// Builder for [`SupervisorConfig`]; `build` validates the result.
#[derive(Debug, Clone)]
pub struct SupervisorConfigBuilder {
    command: Vec<String>,
    working_dir: Option<PathBuf>,
    log_path: Option<PathBuf>,
    pid_file: Option<PathBuf>,
    strategy: Strategy,
    poll_interval: Duration,
    grace_period: Duration,
    policy: RestartPolicy,
    max_restarts: Option<u32>,
    restart_window: Duration,
    stop_grace: Duration,
}

impl Default for SupervisorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorConfigBuilder {
    pub fn new() -> Self {
        Self {
            command: Vec::new(),
            working_dir: None,
            log_path: None,
            pid_file: None,
            strategy: Strategy::Await,
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            policy: RestartPolicy::default(),
            max_restarts: None,
            restart_window: DEFAULT_RESTART_WINDOW,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn log_path(mut self, path: PathBuf) -> Self {
        self.log_path = Some(path);
        self
    }

    pub fn pid_file(mut self, path: PathBuf) -> Self {
        self.pid_file = Some(path);
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval = Duration::from_millis(ms);
        self
    }

    pub fn grace_period_ms(mut self, ms: u64) -> Self {
        self.grace_period = Duration::from_millis(ms);
        self
    }

    pub fn restart_delay_ms(mut self, ms: u64) -> Self {
        self.policy.base_delay = Duration::from_millis(ms);
        if self.policy.max_delay < self.policy.base_delay {
            self.policy.max_delay = self.policy.base_delay;
        }
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.policy.backoff_factor = factor;
        self
    }

    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.policy.max_delay = Duration::from_millis(ms);
        self
    }

    /// Give up once more than `max` restarts land inside the restart window.
    pub fn max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = Some(max);
        self
    }

    pub fn restart_window_secs(mut self, secs: u64) -> Self {
        self.restart_window = Duration::from_secs(secs);
        self
    }

    pub fn stop_grace_ms(mut self, ms: u64) -> Self {
        self.stop_grace = Duration::from_millis(ms);
        self
    }

    pub fn build(self) -> Result<SupervisorConfig> {
        let config = SupervisorConfig {
            command: self.command,
            working_dir: self.working_dir,
            log_path: self.log_path,
            pid_file: self.pid_file,
            strategy: self.strategy,
            poll_interval: self.poll_interval,
            grace_period: self.grace_period,
            policy: self.policy,
            max_restarts: self.max_restarts,
            restart_window: self.restart_window,
            stop_grace: self.stop_grace,
        };
        config.validate()?;
        Ok(config)
    }
}
