//! In-memory agent registry: the controller's view of each instance's
//! lifecycle state (spec.md §3, "Agent registry entry").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::backoff::BackoffPolicy;
use crate::types::{AgentState, QuarantineConfig};

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub state: AgentState,
    pub failures: u32,
    pub next_allowed: Option<Instant>,
    pub failure_window_start: Option<Instant>,
    pub last_seen: Option<Instant>,
}

impl Default for RegistryEntry {
    fn default() -> Self {
        Self {
            state: AgentState::Pending,
            failures: 0,
            next_allowed: None,
            failure_window_start: None,
            last_seen: None,
        }
    }
}

impl RegistryEntry {
    /// Whether a start attempt is currently disallowed (spec.md §4.3, step
    /// 1: "subject to this instance not being in `Backoff` or
    /// `Quarantined`").
    pub fn blocks_start(&self, now: Instant) -> bool {
        match self.state {
            AgentState::Quarantined => true,
            AgentState::Backoff => self.next_allowed.map(|deadline| now < deadline).unwrap_or(false),
            _ => false,
        }
    }
}

/// Tracks one `RegistryEntry` per instance name across reconciliation
/// ticks. Every method is async purely to share the lock-acquisition style
/// used by the bead stores; there is no I/O here.
pub struct AgentRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn entry(&self, name: &str) -> RegistryEntry {
        let entries = self.entries.lock().await;
        entries.get(name).cloned().unwrap_or_default()
    }

    pub async fn names(&self) -> Vec<String> {
        self.entries.lock().await.keys().cloned().collect()
    }

    pub async fn mark_pending(&self, name: &str) {
        let mut entries = self.entries.lock().await;
        entries.entry(name.to_string()).or_default();
    }

    /// Starts (or restarts) an instance. Deliberately does *not* reset the
    /// failure counter or failure window — spec.md §4.3 step 3 makes
    /// `mark_alive` ("a successful run observed alive across a tick") the
    /// sole reset point, so a restart immediately following a crash doesn't
    /// erase the crash count before a second crash can be observed.
    pub async fn mark_started(&self, name: &str, now: Instant) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(name.to_string()).or_default();
        entry.state = AgentState::Running;
        entry.next_allowed = None;
        entry.last_seen = Some(now);
    }

    pub async fn mark_alive(&self, name: &str, now: Instant) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(name.to_string()).or_default();
        entry.state = AgentState::Running;
        entry.failures = 0;
        entry.failure_window_start = None;
        entry.last_seen = Some(now);
    }

    pub async fn mark_stopped(&self, name: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(name);
    }

    pub async fn mark_suspended(&self, name: &str) {
        let mut entries = self.entries.lock().await;
        entries.entry(name.to_string()).or_default().state = AgentState::Suspended;
    }

    /// Records a crash, returning the resulting state (`Backoff` or, once
    /// the failure window threshold is exceeded, `Quarantined`).
    pub async fn mark_crashed(
        &self,
        name: &str,
        now: Instant,
        backoff: &BackoffPolicy,
        quarantine: &QuarantineConfig,
    ) -> AgentState {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(name.to_string()).or_default();

        let window_start = *entry.failure_window_start.get_or_insert(now);
        if now.duration_since(window_start) > quarantine.window {
            entry.failure_window_start = Some(now);
            entry.failures = 0;
        }

        entry.failures += 1;

        if entry.failures > quarantine.threshold {
            entry.state = AgentState::Quarantined;
            entry.next_allowed = None;
        } else {
            entry.state = AgentState::Backoff;
            entry.next_allowed = Some(now + backoff.next_delay(entry.failures));
        }
        entry.state
    }

    /// Operator intervention: clears quarantine/backoff state so the agent
    /// is eligible to start on the next tick (spec.md §8, "Quarantine:
    /// ... until operator intervention (external state reset)").
    pub async fn reset(&self, name: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(name);
    }

    pub async fn backoff_remaining(&self, name: &str, now: Instant) -> Option<Duration> {
        let entries = self.entries.lock().await;
        entries
            .get(name)
            .and_then(|e| e.next_allowed)
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}
