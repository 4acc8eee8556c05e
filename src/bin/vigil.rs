use clap::{Parser, Subcommand};
use colored::*;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use vigil::events::format_timestamp;
use vigil::pidfile::{self, PidFileState};
use vigil::{
    Event, EventKind, EventSink, FileSink, OutputFormat, RunReport, StopReason, Strategy,
    Supervisor, SupervisorConfig,
};

/// Keep a target process running
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Supervise a command, restarting it whenever it exits
    Run {
        /// Command to run and supervise
        #[clap(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Supervision strategy: "await" blocks on the child, "poll" probes it
        #[clap(long, default_value = "await")]
        strategy: String,

        /// Event log file; the child's stdout/stderr is appended here too
        #[clap(short, long, value_name = "FILE")]
        log: Option<PathBuf>,

        /// Write events as JSON lines instead of plain text
        #[clap(long)]
        json: bool,

        /// Delay before a restart in milliseconds
        #[clap(long, default_value = "2000")]
        delay: u64,

        /// Grow the delay by this factor on consecutive failures (1.0 = fixed)
        #[clap(long, default_value = "1.0")]
        backoff: f64,

        /// Upper bound for the backoff delay in milliseconds
        #[clap(long, default_value = "60000")]
        max_delay: u64,

        /// Give up after this many restarts within the restart window
        #[clap(long)]
        max_restarts: Option<u32>,

        /// Restart window in seconds
        #[clap(long, default_value = "300")]
        restart_window: u64,

        /// Liveness probe interval in milliseconds (poll strategy)
        #[clap(long, default_value = "10000")]
        poll_interval: u64,

        /// Startup grace period in milliseconds (poll strategy)
        #[clap(long, default_value = "3000")]
        grace: u64,

        /// How long the child gets to exit on shutdown, in milliseconds
        #[clap(long, default_value = "5000")]
        stop_grace: u64,

        /// Working directory for the target
        #[clap(long, value_name = "DIR")]
        cwd: Option<PathBuf>,

        /// Write the child pid to this file
        #[clap(long, value_name = "FILE")]
        pid_file: Option<PathBuf>,

        /// Update a single status line instead of printing event lines
        #[clap(short, long)]
        update_in_place: bool,

        /// Suppress console event output
        #[clap(short, long)]
        quiet: bool,
    },

    /// Inspect a supervised target via its pid file
    Status {
        /// Pid file written by `vigil run --pid-file`
        #[clap(required = true, value_name = "FILE")]
        pid_file: PathBuf,
    },
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Run {
            command,
            strategy,
            log,
            json,
            delay,
            backoff,
            max_delay,
            max_restarts,
            restart_window,
            poll_interval,
            grace,
            stop_grace,
            cwd,
            pid_file,
            update_in_place,
            quiet,
        } => {
            let strategy: Strategy = match strategy.parse() {
                Ok(s) => s,
                Err(err) => {
                    eprintln!("Error: {}", err);
                    exit(1);
                }
            };

            let mut builder = SupervisorConfig::builder()
                .command(command)
                .strategy(strategy)
                .restart_delay_ms(delay)
                .backoff_factor(backoff)
                .max_delay_ms(max_delay)
                .restart_window_secs(restart_window)
                .poll_interval_ms(poll_interval)
                .grace_period_ms(grace)
                .stop_grace_ms(stop_grace);
            if let Some(max) = max_restarts {
                builder = builder.max_restarts(max);
            }
            if let Some(path) = &log {
                builder = builder.log_path(path.clone());
            }
            if let Some(dir) = cwd {
                builder = builder.working_dir(dir);
            }
            if let Some(path) = pid_file {
                builder = builder.pid_file(path);
            }

            let config = match builder.build() {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("Error: {}", err);
                    exit(1);
                }
            };

            run_supervised(config, log.as_deref(), json, update_in_place, quiet)
        }
        Commands::Status { pid_file } => show_status(&pid_file),
    }
}

fn run_supervised(
    config: SupervisorConfig,
    log: Option<&Path>,
    json: bool,
    update_in_place: bool,
    quiet: bool,
) -> io::Result<()> {
    let format = if json {
        OutputFormat::Jsonl
    } else {
        OutputFormat::Plain
    };
    let file_sink = match log {
        Some(path) => match FileSink::new(path, format) {
            Ok(sink) => Some(sink),
            Err(err) => {
                eprintln!("Error opening log file: {}", err);
                exit(1);
            }
        },
        None => None,
    };

    println!("Supervising: {}", config.command.join(" ").cyan());
    if let Some(path) = log {
        println!("Event log: {}", path.display().to_string().green());
    }
    println!("Press Ctrl+C to stop");
    println!();

    // Setup signal handling for clean shutdown
    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
        println!("\nReceived Ctrl-C, shutting down...");
    })
    .expect("Error setting Ctrl-C handler");

    let sink = ConsoleSink::new(file_sink, quiet, update_in_place);
    let mut supervisor = match Supervisor::new(config, Box::new(sink)) {
        Ok(supervisor) => supervisor,
        Err(err) => {
            eprintln!("Error: {}", err);
            exit(1);
        }
    };

    let report = match supervisor.run(stop) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("Supervision failed: {}", err);
            exit(1);
        }
    };

    if update_in_place {
        println!();
    }
    print_summary(&report);

    if report.reason == StopReason::Exhausted {
        exit(1);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!();
    match report.reason {
        StopReason::Cancelled => {
            println!(
                "Supervision stopped after {:.1} seconds",
                report.duration.as_secs_f64()
            );
        }
        StopReason::Exhausted => {
            println!(
                "{}",
                format!(
                    "Gave up after {} restarts ({:.1} seconds)",
                    report.restarts,
                    report.duration.as_secs_f64()
                )
                .red()
            );
        }
    }
    println!("Starts: {}  Restarts: {}", report.starts, report.restarts);
    if let Some(code) = report.last_exit {
        println!("Last exit code: {}", code);
    }
}

fn show_status(pid_file: &Path) -> io::Result<()> {
    match pidfile::inspect(pid_file) {
        Ok(PidFileState::Absent) => {
            println!("{}", "not running (no pid file)".yellow());
        }
        Ok(PidFileState::Stale(pid)) => {
            println!(
                "{}",
                format!("not running (stale pid file for {}, removed)", pid).yellow()
            );
        }
        Ok(PidFileState::Running(pid)) => {
            let mut table = Table::new(vec![process_row(pid)]);
            table.with(Style::sharp());
            println!("{}", table);
        }
        Err(err) => {
            eprintln!("{}", format!("Error reading pid file: {}", err).red());
            exit(1);
        }
    }
    Ok(())
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "UPTIME")]
    uptime: String,
    #[tabled(rename = "MEMORY")]
    memory: String,
    #[tabled(rename = "COMMAND")]
    command: String,
}

fn process_row(pid: u32) -> StatusRow {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[Pid::from(pid as usize)]),
        true,
        ProcessRefreshKind::everything(),
    );

    match system.process(Pid::from(pid as usize)) {
        Some(process) => StatusRow {
            pid: pid.to_string(),
            state: "running".to_string(),
            uptime: format_uptime(process.run_time()),
            memory: format_bytes(process.memory()),
            command: process
                .cmd()
                .iter()
                .map(|s| s.to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join(" "),
        },
        None => StatusRow {
            pid: pid.to_string(),
            state: "unknown".to_string(),
            uptime: "-".to_string(),
            memory: "-".to_string(),
            command: "-".to_string(),
        },
    }
}

/// Console event display; delegates to the file sink when one is configured.
struct ConsoleSink {
    file: Option<FileSink>,
    quiet: bool,
    update_in_place: bool,
    terminal_width: usize,
    progress_index: usize,
    started_at: Instant,
}

const PROGRESS_CHARS: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

impl ConsoleSink {
    fn new(file: Option<FileSink>, quiet: bool, update_in_place: bool) -> Self {
        let mut terminal_width = 80;
        if let Ok((w, _)) = crossterm::terminal::size() {
            terminal_width = w as usize;
        }
        Self {
            file,
            quiet,
            update_in_place,
            terminal_width,
            progress_index: 0,
            started_at: Instant::now(),
        }
    }
}

impl EventSink for ConsoleSink {
    fn record(&mut self, event: &Event) {
        if let Some(file) = &mut self.file {
            file.record(event);
        }
        if self.quiet {
            return;
        }

        let line = format!("[{}] {}", format_timestamp(event.ts_ms), event);
        let line = colorize(event.kind, &line);

        if self.update_in_place {
            // Clear line and print new content with spinner and elapsed time
            let spinner = PROGRESS_CHARS[self.progress_index % PROGRESS_CHARS.len()];
            let elapsed = self.started_at.elapsed().as_secs();
            print!(
                "\r{}\r{} [{}s] {}",
                " ".repeat(self.terminal_width.saturating_sub(1)),
                spinner.to_string().cyan(),
                elapsed.to_string().bright_black(),
                line
            );
            let _ = io::stdout().flush();
            self.progress_index += 1;
        } else {
            println!("{}", line);
        }
    }
}

fn colorize(kind: EventKind, line: &str) -> ColoredString {
    match kind {
        EventKind::Starting => line.cyan(),
        EventKind::Started => line.green(),
        EventKind::Exited | EventKind::Restarting | EventKind::Stopped => line.yellow(),
        EventKind::StartFailed => line.red(),
        EventKind::GaveUp => line.red().bold(),
    }
}

fn format_uptime(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
