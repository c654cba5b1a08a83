//! The `Recorder` trait and its in-memory, file, and exec-process backends.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gas_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::types::{stamp, Event, EventFilter};

const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// A recorder is an append-only event log: `record` is fire-and-forget,
/// `list`/`latest_seq` are read-only, everything else follows spec.md §4.2.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Append an event, assigning it the next seq. Errors are logged, not
    /// propagated — callers that need to observe failures should use
    /// `try_record` instead.
    async fn record(&self, event: Event) {
        if let Err(err) = self.try_record(event).await {
            tracing::error!(error = %err, "event record failed, swallowing");
        }
    }

    /// Like `record`, but surfaces the error instead of swallowing it.
    async fn try_record(&self, event: Event) -> Result<Event>;

    /// Return every recorded event matching `filter`, in seq order.
    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>>;

    /// The highest seq recorded so far, or 0 if the log is empty.
    async fn latest_seq(&self) -> Result<u64>;
}

/// In-memory recorder. Seq allocation and storage are both guarded by one
/// mutex so concurrent writers serialize cleanly.
pub struct MemoryRecorder {
    events: Mutex<Vec<Event>>,
    next_seq: AtomicU64,
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn try_record(&self, event: Event) -> Result<Event> {
        let mut events = self.events.lock().await;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let stamped = stamp(event, seq, Utc::now());
        events.push(stamped.clone());
        Ok(stamped)
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let events = self.events.lock().await;
        Ok(events.iter().filter(|e| filter.matches(e)).cloned().collect())
    }

    async fn latest_seq(&self) -> Result<u64> {
        let events = self.events.lock().await;
        Ok(events.last().map(|e| e.seq).unwrap_or(0))
    }
}

/// File-backed recorder: one JSON object per line, append-only, opened with
/// `O_APPEND` so concurrent processes never tear each other's writes (spec.md
/// §4.2, "File recorder layout"). A per-process mutex serializes writers
/// within this process; cross-process ordering relies on the OS append
/// guarantee for writes under `PIPE_BUF`.
pub struct FileRecorder {
    path: PathBuf,
    state: Mutex<FileState>,
}

struct FileState {
    file: std::fs::File,
    next_seq: u64,
}

impl FileRecorder {
    /// Open (creating if absent) the log at `path`, scanning existing lines
    /// to recover the seq counter (spec.md §4.2, "On open the recorder scans
    /// existing lines").
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| Error::directory_creation_failed(dir, e))?;
            }
        }
        let mut max_seq = 0u64;
        if let Ok(file) = std::fs::File::open(&path) {
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|e| Error::file_read_failed(path.clone(), e))?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: Event = serde_json::from_str(&line).map_err(Error::json_parse_failed)?;
                max_seq = max_seq.max(event.seq);
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::file_write_failed(path.clone(), e))?;
        Ok(Self {
            path,
            state: Mutex::new(FileState {
                file,
                next_seq: max_seq + 1,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Recorder for FileRecorder {
    async fn try_record(&self, event: Event) -> Result<Event> {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        let stamped = stamp(event, seq, Utc::now());
        let mut line = serde_json::to_string(&stamped).map_err(Error::json_parse_failed)?;
        line.push('\n');
        state
            .file
            .write_all(line.as_bytes())
            .map_err(|e| Error::file_write_failed(self.path.clone(), e))?;
        state.file.flush().map_err(|e| Error::file_write_failed(self.path.clone(), e))?;
        state.next_seq = seq + 1;
        Ok(stamped)
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let file = std::fs::File::open(&self.path).map_err(|e| Error::file_read_failed(self.path.clone(), e))?;
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::file_read_failed(self.path.clone(), e))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line).map_err(Error::json_parse_failed)?;
            if filter.matches(&event) {
                out.push(event);
            }
        }
        Ok(out)
    }

    async fn latest_seq(&self) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.next_seq.saturating_sub(1))
    }
}

#[derive(Serialize)]
struct ExecFilter<'a> {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    event_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actor: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    after_seq: Option<u64>,
}

#[derive(Deserialize)]
struct ExecListResponse {
    events: Vec<Event>,
}

/// Delegates every operation to a child process speaking spec.md §6's "Exec
/// event provider protocol": op name as argv\[1\] (plus `afterSeq` for
/// `watch`), a JSON body on stdin for `record`/`list`, exit 0 success, 2
/// unknown-op-as-success, anything else an error from trimmed stderr.
/// `ensure-running` is invoked at most once per process lifetime.
pub struct ExecRecorder {
    command: PathBuf,
    args: Vec<String>,
    ensured: tokio::sync::OnceCell<()>,
}

impl ExecRecorder {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            ensured: tokio::sync::OnceCell::new(),
        }
    }

    async fn invoke(&self, op: &str, op_args: &[&str], body: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .arg(op)
            .args(op_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::transient(format!("failed to spawn recorder exec: {e}")))?;

        if let Some(body) = body {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(body)
                    .await
                    .map_err(|e| Error::transient(format!("failed to write recorder exec stdin: {e}")))?;
            }
        } else {
            child.stdin.take();
        }

        let output = tokio::time::timeout(EXEC_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| Error::timeout(format!("events.exec.{op}"), EXEC_TIMEOUT))?
            .map_err(|e| Error::transient(format!("recorder exec failed: {e}")))?;

        match output.status.code() {
            Some(0) => Ok(Some(output.stdout)),
            Some(2) => Ok(None),
            _ => Err(Error::transient(String::from_utf8_lossy(&output.stderr).trim().to_string())),
        }
    }

    /// Calls `ensure-running` at most once for the lifetime of this
    /// recorder (spec.md §6: "called at most once per process lifetime;
    /// exit 2 means 'stateless, no init needed'").
    async fn ensure_running(&self) -> Result<()> {
        self.ensured
            .get_or_try_init(|| async { self.invoke("ensure-running", &[], None).await.map(|_| ()) })
            .await
            .map(|_| ())
    }

    /// Streams one event per line from the backend's `watch <afterSeq>`
    /// NDJSON output, stopping (and killing the child) when `cancel`
    /// resolves (spec.md §6: "parent kills on cancellation").
    pub async fn watch(
        &self,
        after_seq: u64,
        mut cancel: impl std::future::Future<Output = ()> + Unpin,
    ) -> Result<Vec<Event>> {
        let after = after_seq.to_string();
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .arg("watch")
            .arg(&after)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::transient(format!("failed to spawn recorder watch: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transient("recorder watch produced no stdout"))?;
        let mut lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(stdout));

        let mut events = Vec::new();
        loop {
            tokio::select! {
                () = &mut cancel => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Ok(events);
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) if !line.trim().is_empty() => {
                            let event: Event = serde_json::from_str(&line).map_err(Error::json_parse_failed)?;
                            events.push(event);
                        }
                        Ok(Some(_)) => {}
                        Ok(None) => return Ok(events),
                        Err(e) => return Err(Error::transient(format!("recorder watch read failed: {e}"))),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Recorder for ExecRecorder {
    async fn try_record(&self, event: Event) -> Result<Event> {
        self.ensure_running().await?;
        let body = serde_json::to_vec(&event).map_err(Error::json_parse_failed)?;
        match self.invoke("record", &[], Some(&body)).await? {
            Some(stdout) if !stdout.is_empty() => {
                serde_json::from_slice(&stdout).map_err(Error::json_parse_failed)
            }
            _ => Ok(event),
        }
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        self.ensure_running().await?;
        let req = ExecFilter {
            event_type: filter.event_type.as_deref(),
            actor: filter.actor.as_deref(),
            after_seq: filter.after_seq,
        };
        let body = serde_json::to_vec(&req).map_err(Error::json_parse_failed)?;
        match self.invoke("list", &[], Some(&body)).await? {
            Some(stdout) if !stdout.is_empty() => {
                let resp: ExecListResponse =
                    serde_json::from_slice(&stdout).map_err(Error::json_parse_failed)?;
                Ok(resp.events.into_iter().filter(|e| filter.matches(e)).collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn latest_seq(&self) -> Result<u64> {
        self.ensure_running().await?;
        match self.invoke("latest-seq", &[], None).await? {
            Some(stdout) if !stdout.is_empty() => String::from_utf8_lossy(&stdout)
                .trim()
                .parse()
                .map_err(|_| Error::invalid("latest-seq did not return a decimal integer")),
            _ => Ok(0),
        }
    }
}

/// Wraps any `Recorder` with `tracing` spans, mirroring the teacher's
/// `TracingEventStore` decorator.
pub struct TracingRecorder<R: Recorder> {
    inner: R,
}

impl<R: Recorder> TracingRecorder<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: Recorder> Recorder for TracingRecorder<R> {
    async fn try_record(&self, event: Event) -> Result<Event> {
        tracing::debug!(event_type = %event.event_type, subject = %event.subject, "recording event");
        let result = self.inner.try_record(event).await;
        if let Ok(ref recorded) = result {
            tracing::trace!(seq = recorded.seq, "event recorded");
        }
        result
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        tracing::debug!(?filter.event_type, ?filter.actor, ?filter.after_seq, "listing events");
        self.inner.list(filter).await
    }

    async fn latest_seq(&self) -> Result<u64> {
        self.inner.latest_seq().await
    }
}
