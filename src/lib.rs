//! vigil: keep a target process running.
//!
//! A small process supervisor. It launches a configured command, observes it
//! either by blocking on the owned child handle or by probing liveness on an
//! interval, appends timestamped lifecycle events to a log, and relaunches
//! the target according to a restart policy — forever by default, or until a
//! windowed restart budget is spent.

pub mod config;
pub mod error;
pub mod events;
pub mod pidfile;
pub mod policy;
pub mod process;
pub mod supervisor;

pub use config::{Strategy, SupervisorConfig, SupervisorConfigBuilder};
pub use error::{Result, VigilError};
pub use events::{Event, EventKind, EventSink, FileSink, MemorySink, OutputFormat};
pub use policy::{RestartBudget, RestartPolicy};
pub use process::{ChildHandle, ChildStatus};
pub use supervisor::{RunReport, StopReason, Supervisor};
