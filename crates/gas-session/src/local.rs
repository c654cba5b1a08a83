//! `LocalProcessSessionProvider`: spawns each named session as a child OS
//! process. This is the one concrete backend the workspace ships so the
//! rest of the stack has something real to run against; the controller
//! itself never depends on this crate directly.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gas_core::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::provider::{SessionProvider, StartConfig};

/// Grace period between a graceful stop signal and a forceful kill.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// How many trailing output lines `peek` keeps per session.
const PEEK_BUFFER: usize = 200;

struct Session {
    child: Child,
    stdin: Option<tokio::process::ChildStdin>,
    recent_output: Arc<Mutex<VecDeque<String>>>,
    meta: HashMap<String, String>,
}

/// Runs each named session as a child process, captures trailing stdout
/// into a ring buffer for `peek`, and exposes a plain in-memory metadata
/// bag per session (mirroring the subprocess-spawning pattern the teacher
/// uses for its CLI bridge: `Command::new(..).stdin(Stdio::piped())`,
/// `.spawn()`, capturing output on a background reader task).
pub struct LocalProcessSessionProvider {
    sessions: Mutex<HashMap<String, Session>>,
}

impl Default for LocalProcessSessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalProcessSessionProvider {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionProvider for LocalProcessSessionProvider {
    async fn start(&self, name: &str, cfg: &StartConfig) -> Result<()> {
        let mut cmd = Command::new(&cfg.command);
        cmd.args(&cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = cfg.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &cfg.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::transient(format!("failed to start session '{name}': {e}")))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let recent_output = Arc::new(Mutex::new(VecDeque::with_capacity(PEEK_BUFFER)));

        if let Some(stdout) = stdout {
            let buffer = Arc::clone(&recent_output);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buffer = buffer.lock().await;
                    if buffer.len() == PEEK_BUFFER {
                        buffer.pop_front();
                    }
                    buffer.push_back(line);
                }
            });
        }

        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            name.to_string(),
            Session {
                child,
                stdin,
                recent_output,
                meta: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(name)
            .ok_or_else(|| Error::not_found("session", name))?;

        let graceful = tokio::time::timeout(STOP_GRACE, session.child.wait()).await;
        if graceful.is_err() {
            let _ = session.child.start_kill();
            let _ = session.child.wait().await;
        }
        sessions.remove(name);
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(name)
            .ok_or_else(|| Error::not_found("session", name))?;
        match session.child.try_wait() {
            Ok(Some(_)) => Ok(false),
            Ok(None) => Ok(true),
            Err(e) => Err(Error::transient(format!("failed to poll session '{name}': {e}"))),
        }
    }

    async fn peek(&self, name: &str, lines: usize) -> Result<Vec<String>> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(name)
            .ok_or_else(|| Error::not_found("session", name))?;
        let buffer = session.recent_output.lock().await;
        Ok(buffer.iter().rev().take(lines).rev().cloned().collect())
    }

    async fn nudge(&self, name: &str, text: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(name)
            .ok_or_else(|| Error::not_found("session", name))?;
        let stdin = session
            .stdin
            .as_mut()
            .ok_or_else(|| Error::transient(format!("session '{name}' has no stdin")))?;
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| Error::transient(format!("failed to nudge session '{name}': {e}")))?;
        Ok(())
    }

    async fn get_meta(&self, name: &str, key: &str) -> Result<Option<String>> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(name)
            .ok_or_else(|| Error::not_found("session", name))?;
        Ok(session.meta.get(key).cloned())
    }

    async fn set_meta(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(name)
            .ok_or_else(|| Error::not_found("session", name))?;
        session.meta.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn active_names(&self) -> Result<Vec<String>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.keys().cloned().collect())
    }
}
