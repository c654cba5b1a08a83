//! Append-only event log: seq allocation, filtering, and poll-based
//! watching, with in-memory, file, and exec-process backends.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod store;
pub mod types;
pub mod watcher;

pub use gas_core::{Error, Result};
pub use store::{ExecRecorder, FileRecorder, MemoryRecorder, Recorder, TracingRecorder};
pub use types::{Event, EventFilter};
pub use watcher::{Watcher, DEFAULT_POLL_INTERVAL};
