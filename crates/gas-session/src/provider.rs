//! The `SessionProvider` contract (spec.md §4.4: "consumed, not
//! implemented"). The controller drives agent sessions through this narrow
//! capability set and never introspects how a provider implements it.

use async_trait::async_trait;
use gas_core::Result;

/// Launch configuration for one named session.
#[derive(Debug, Clone, Default)]
pub struct StartConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env: Vec<(String, String)>,
}

impl StartConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// The narrow capability set the agent controller drives sessions through
/// (spec.md §4.4). The contract says nothing about how a session is
/// actually run; implementations range from a bare subprocess to a
/// container or remote agent.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Spawn `cfg` under `name`, running any pre-start hooks first.
    async fn start(&self, name: &str, cfg: &StartConfig) -> Result<()>;

    /// Terminate gracefully, then forcefully after a grace period.
    async fn stop(&self, name: &str) -> Result<()>;

    /// Whether the program inside the session is still up — not merely
    /// whether a wrapper/container persists.
    async fn is_running(&self, name: &str) -> Result<bool>;

    /// Capture the last `lines` lines of output, for liveness diagnostics.
    async fn peek(&self, name: &str, lines: usize) -> Result<Vec<String>>;

    /// Deliver `text` to the session's stdin/pane.
    async fn nudge(&self, name: &str, text: &str) -> Result<()>;

    /// Read a metadata entry shared between the controller and the agent
    /// process (drain flags, restart-requested flags, and the like).
    async fn get_meta(&self, name: &str, key: &str) -> Result<Option<String>>;

    /// Write a metadata entry.
    async fn set_meta(&self, name: &str, key: &str, value: &str) -> Result<()>;

    /// Names of every session currently known to this provider (spec.md
    /// §4.3's "actual set": "the controller asks the session provider
    /// which sessions ... are currently running").
    async fn active_names(&self) -> Result<Vec<String>>;
}
