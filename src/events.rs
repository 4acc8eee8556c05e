//! Lifecycle events and the sinks they are recorded to.
//!
//! The supervisor never writes its audit trail directly; it hands each event
//! to an injected [`EventSink`]. [`FileSink`] reproduces the classic append-only
//! log file, [`MemorySink`] lets tests assert on events without parsing text.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};
use serde::Serialize;

use crate::error::Result;

/// A lifecycle transition of the supervised target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A launch is about to be attempted.
    Starting,
    /// The target is confirmed running.
    Started,
    /// The target exited.
    Exited,
    /// A relaunch has been scheduled.
    Restarting,
    /// The target could not be started, or died within the grace period.
    StartFailed,
    /// The target was shut down on request.
    Stopped,
    /// The restart budget is spent; supervision ends.
    GaveUp,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EventKind::Starting => "starting",
            EventKind::Started => "started",
            EventKind::Exited => "exited",
            EventKind::Restarting => "restarting",
            EventKind::StartFailed => "failed to start",
            EventKind::Stopped => "stopped",
            EventKind::GaveUp => "gave up",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Milliseconds since the Unix epoch.
    pub ts_ms: u64,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            ts_ms: now_ms(),
            kind,
            pid: None,
            exit_code: None,
            detail: None,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// `None` means the child died without an exit code (e.g. by signal).
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(pid) = self.pid {
            write!(f, " pid={}", pid)?;
        }
        if let Some(code) = self.exit_code {
            write!(f, " code={}", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Render an epoch-millisecond timestamp as a local wall-clock string.
pub fn format_timestamp(ts_ms: u64) -> String {
    Local
        .timestamp_millis_opt(ts_ms as i64)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

/// Receiver for supervisor lifecycle events.
pub trait EventSink: Send {
    fn record(&mut self, event: &Event);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One `[YYYY-MM-DD HH:MM:SS] ...` line per event.
    Plain,
    /// One JSON object per line.
    Jsonl,
}

/// Append-only file sink. Shares its file with the child's redirected
/// output, so both only ever append.
pub struct FileSink {
    file: File,
    format: OutputFormat,
}

impl FileSink {
    pub fn new(path: &Path, format: OutputFormat) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file, format })
    }
}

impl EventSink for FileSink {
    fn record(&mut self, event: &Event) {
        let result = match self.format {
            OutputFormat::Jsonl => match serde_json::to_string(event) {
                Ok(json) => writeln!(self.file, "{}", json),
                Err(err) => {
                    log::warn!("failed to serialize event: {}", err);
                    return;
                }
            },
            OutputFormat::Plain => {
                writeln!(self.file, "[{}] {}", format_timestamp(event.ts_ms), event)
            }
        };
        if let Err(err) = result {
            log::warn!("failed to append event to log: {}", err);
        }
    }
}

/// In-memory sink; the handle stays readable after the sink moves into a
/// supervisor.
#[derive(Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<Event>>> {
        Arc::clone(&self.events)
    }
}

impl EventSink for MemorySink {
    fn record(&mut self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn display_composes_fields() {
        let event = Event::new(EventKind::Exited)
            .with_pid(4242)
            .with_exit_code(Some(3))
            .with_detail("after 1.5s");
        let text = event.to_string();
        assert_eq!(text, "exited pid=4242 code=3 (after 1.5s)");
    }

    #[test]
    fn jsonl_skips_absent_fields() {
        let event = Event::new(EventKind::Starting);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"starting\""));
        assert!(!json.contains("pid"));
        assert!(!json.contains("exit_code"));

        let event = Event::new(EventKind::StartFailed).with_exit_code(Some(1));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"start_failed\""));
        assert!(json.contains("\"exit_code\":1"));
    }

    #[test]
    fn file_sink_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");

        let mut sink = FileSink::new(&path, OutputFormat::Plain).unwrap();
        sink.record(&Event::new(EventKind::Starting));
        sink.record(&Event::new(EventKind::Started).with_pid(1));

        let first = fs::read_to_string(&path).unwrap();
        assert_eq!(first.lines().count(), 2);
        assert!(first.lines().all(|line| line.starts_with('[')));

        // A fresh sink on the same path must append, not truncate.
        let mut sink = FileSink::new(&path, OutputFormat::Plain).unwrap();
        sink.record(&Event::new(EventKind::Exited).with_exit_code(Some(0)));

        let second = fs::read_to_string(&path).unwrap();
        assert!(second.starts_with(&first));
        assert_eq!(second.lines().count(), 3);
    }

    #[test]
    fn jsonl_sink_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut sink = FileSink::new(&path, OutputFormat::Jsonl).unwrap();
        sink.record(&Event::new(EventKind::Started).with_pid(77));

        let contents = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(value["kind"], "started");
        assert_eq!(value["pid"], 77);
    }

    #[test]
    fn memory_sink_captures_events() {
        let sink = MemorySink::new();
        let events = sink.handle();

        let mut sink = sink;
        sink.record(&Event::new(EventKind::Starting));
        sink.record(&Event::new(EventKind::Started).with_pid(9));

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[1].kind, EventKind::Started);
        assert_eq!(captured[1].pid, Some(9));
    }
}
