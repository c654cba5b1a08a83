//! Configuration and state types for the agent controller.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one agent instance, tracked by the controller's
/// in-memory registry (spec.md §3, "Agent registry entry").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    /// Declared but never successfully started.
    Pending,
    /// A session exists and was last observed running.
    Running,
    /// Crashed; waiting for `next_allowed` before the next start attempt.
    Backoff,
    /// Exceeded the failure threshold within the window; no further starts
    /// until an operator resets it.
    Quarantined,
    /// Excluded from the target set by configuration (`suspended: true`).
    Suspended,
    /// Removed from configuration; stopped and no longer tracked.
    Stopped,
}

/// How a single named agent is launched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl AgentCommand {
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

/// Fixed agent (exactly one instance under its bare name, unless suspended)
/// or pool agent (scaled between `min` and `max` by `probe`'s stdout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentKind {
    Fixed { suspended: bool },
    Pool { min: u32, max: u32, probe: AgentCommand },
}

/// One configured agent: its launch command and how many instances of it
/// should exist (spec.md §4.3, "Target set").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub command: AgentCommand,
    pub kind: AgentKind,
    /// Optional idle-timeout restart threshold (spec.md §4.3, "Idle-timeout
    /// restart"), checked via the session provider's `GC_LAST_ACTIVITY`
    /// metadata key.
    #[serde(default)]
    pub idle_timeout: Option<Duration>,
    /// When set, this agent is scoped to a named rig; the controller passes
    /// it through as `GC_RIG` (spec.md §6, "Agent environment").
    #[serde(default)]
    pub rig: Option<String>,
}

impl AgentConfig {
    pub fn fixed(name: impl Into<String>, command: AgentCommand) -> Self {
        Self {
            name: name.into(),
            command,
            kind: AgentKind::Fixed { suspended: false },
            idle_timeout: None,
            rig: None,
        }
    }

    pub fn pool(name: impl Into<String>, command: AgentCommand, min: u32, max: u32, probe: AgentCommand) -> Self {
        Self {
            name: name.into(),
            command,
            kind: AgentKind::Pool { min, max, probe },
            idle_timeout: None,
            rig: None,
        }
    }

    pub fn suspended(mut self, suspended: bool) -> Self {
        if let AgentKind::Fixed { suspended: s } = &mut self.kind {
            *s = suspended;
        }
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn with_rig(mut self, rig: impl Into<String>) -> Self {
        self.rig = Some(rig.into());
        self
    }
}

/// Exponential backoff with jitter, clamped to a ceiling (spec.md §4.3,
/// step 3: "`next_allowed = now + backoff(failures)` (exponential with
/// jitter, clamped to a ceiling)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: f64,
    pub ceiling: Duration,
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            ceiling: Duration::from_secs(300),
            jitter_fraction: 0.2,
        }
    }
}

/// Quarantine policy: crash more than `threshold` times within `window` and
/// the agent is quarantined (spec.md §4.3, step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineConfig {
    pub threshold: u32,
    pub window: Duration,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Declares every agent this controller should manage, plus the cadence
/// and failure-handling policy it reconciles under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityConfig {
    pub agents: Vec<AgentConfig>,
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub quarantine: QuarantineConfig,
    /// If true, the target set is empty regardless of per-agent config
    /// (spec.md §4.3, "If the city is globally suspended...").
    #[serde(default)]
    pub suspended: bool,
    /// Absolute path identifying this city, passed to every spawned agent
    /// as `GC_CITY` (spec.md §6, "Agent environment").
    #[serde(default)]
    pub city_path: Option<std::path::PathBuf>,
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for CityConfig {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            tick_interval: default_tick_interval(),
            backoff: BackoffConfig::default(),
            quarantine: QuarantineConfig::default(),
            suspended: false,
            city_path: None,
        }
    }
}

/// Builder for `CityConfig`, in the teacher's positional-argument-soup
/// avoidance style.
#[derive(Debug, Default)]
pub struct CityConfigBuilder {
    config: CityConfig,
}

impl CityConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.config.agents.push(agent);
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn quarantine(mut self, quarantine: QuarantineConfig) -> Self {
        self.config.quarantine = quarantine;
        self
    }

    pub fn suspended(mut self, suspended: bool) -> Self {
        self.config.suspended = suspended;
        self
    }

    pub fn city_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config.city_path = Some(path.into());
        self
    }

    pub fn build(self) -> CityConfig {
        self.config
    }
}

/// Outcome of one reconciliation tick (spec.md §4.3, "Events emitted":
/// `reconcile.cycle` "with counts of started/stopped/skipped").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub crashed: Vec<String>,
    pub quarantined: Vec<String>,
    pub idle_killed: Vec<String>,
    pub skipped: Vec<String>,
}

impl ReconcileResult {
    pub fn is_converged(&self) -> bool {
        self.started.is_empty()
            && self.stopped.is_empty()
            && self.crashed.is_empty()
            && self.quarantined.is_empty()
            && self.idle_killed.is_empty()
    }
}
