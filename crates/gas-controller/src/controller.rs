//! The reconciliation loop (spec.md §4.3): computes the target set, compares
//! it against the session provider's actual set, and converges the two.

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gas_core::Result;
use gas_events::{Event, Recorder};
use gas_session::{SessionProvider, StartConfig};
use serde_json::json;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::registry::AgentRegistry;
use crate::types::{AgentCommand, AgentConfig, AgentKind, AgentState, CityConfig, ReconcileResult};

const GC_AGENT_ENV: &str = "GC_AGENT";
const GC_CITY_ENV: &str = "GC_CITY";
const GC_DIR_ENV: &str = "GC_DIR";
const GC_RIG_ENV: &str = "GC_RIG";
const META_RESTART_REQUESTED: &str = "GC_RESTART_REQUESTED";
const META_DRAIN: &str = "GC_DRAIN";
const META_DRAIN_ACK: &str = "GC_DRAIN_ACK";
const META_LAST_ACTIVITY: &str = "GC_LAST_ACTIVITY";

struct TargetInstance {
    start: StartConfig,
    idle_timeout: Option<Duration>,
}

/// Drives a `CityConfig`'s agents toward their target set by repeatedly
/// calling [`Controller::reconcile`].
pub struct Controller<S: SessionProvider, R: Recorder> {
    config: CityConfig,
    sessions: Arc<S>,
    recorder: Arc<R>,
    registry: AgentRegistry,
    backoff: BackoffPolicy,
}

impl<S: SessionProvider, R: Recorder> Controller<S, R> {
    pub fn new(config: CityConfig, sessions: Arc<S>, recorder: Arc<R>) -> Self {
        let backoff = BackoffPolicy::new(config.backoff.clone());
        Self {
            config,
            sessions,
            recorder,
            registry: AgentRegistry::new(),
            backoff,
        }
    }

    pub fn config(&self) -> &CityConfig {
        &self.config
    }

    /// Operator intervention: clear an agent's backoff/quarantine state
    /// (spec.md §8, "Quarantine ... until operator intervention").
    pub async fn reset_agent(&self, name: &str) {
        self.registry.reset(name).await;
    }

    async fn emit(&self, event_type: &str, subject: &str, message: String, payload: Option<serde_json::Value>) {
        let mut event = Event::new(event_type, "gas-controller", subject, message);
        if let Some(payload) = payload {
            event = event.with_payload(payload);
        }
        self.recorder.record(event).await;
    }

    /// Runs the probe command for a pool agent and parses its stdout as an
    /// integer. Non-numeric output or a non-zero exit is treated as `N=0`
    /// (spec.md §4.3, "Pool scaling tie-breaks").
    async fn probe(&self, probe: &AgentCommand) -> u32 {
        let mut cmd = tokio::process::Command::new(&probe.command);
        cmd.args(&probe.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = probe.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &probe.env {
            cmd.env(key, value);
        }

        match cmd.output().await {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim().parse().unwrap_or(0)
            }
            _ => 0,
        }
    }

    async fn compute_target(&self) -> HashMap<String, TargetInstance> {
        let mut target = HashMap::new();
        if self.config.suspended {
            return target;
        }

        for agent in &self.config.agents {
            match &agent.kind {
                AgentKind::Fixed { suspended } => {
                    if *suspended {
                        continue;
                    }
                    target.insert(
                        agent.name.clone(),
                        TargetInstance {
                            start: build_start_config(
                                &agent.command,
                                &agent.name,
                                self.config.city_path.as_deref(),
                                agent.rig.as_deref(),
                            ),
                            idle_timeout: agent.idle_timeout,
                        },
                    );
                }
                AgentKind::Pool { min, max, probe } => {
                    let n = self.probe(probe).await.clamp(*min, *max);
                    if *min == 1 && *max == 1 {
                        target.insert(
                            agent.name.clone(),
                            TargetInstance {
                                start: build_start_config(
                                    &agent.command,
                                    &agent.name,
                                    self.config.city_path.as_deref(),
                                    agent.rig.as_deref(),
                                ),
                                idle_timeout: agent.idle_timeout,
                            },
                        );
                        continue;
                    }
                    for i in 1..=n {
                        let instance_name = format!("{}-{i}", agent.name);
                        target.insert(
                            instance_name.clone(),
                            TargetInstance {
                                start: build_start_config(
                                    &agent.command,
                                    &instance_name,
                                    self.config.city_path.as_deref(),
                                    agent.rig.as_deref(),
                                ),
                                idle_timeout: agent.idle_timeout,
                            },
                        );
                    }
                }
            }
        }
        target
    }

    /// Runs one reconciliation tick (spec.md §4.3, "Reconciliation").
    pub async fn reconcile(&self) -> Result<ReconcileResult> {
        let now = Instant::now();
        let mut result = ReconcileResult::default();

        let target = self.compute_target().await;
        let mut actual: HashSet<String> = self.sessions.active_names().await?.into_iter().collect();

        let mut draining = HashSet::new();
        for name in &actual {
            if self.sessions.get_meta(name, META_DRAIN).await?.is_some()
                && self.sessions.get_meta(name, META_DRAIN_ACK).await?.is_none()
            {
                draining.insert(name.clone());
            }
        }

        // Step 2: stop actual \ target (spec.md §4.3, step 2), skipping
        // draining agents (step 5 overrides step 2 for them).
        let extra: Vec<String> = actual.difference(&target.keys().cloned().collect()).cloned().collect();
        for name in extra {
            if draining.contains(&name) {
                result.skipped.push(name);
                continue;
            }
            self.sessions.stop(&name).await?;
            self.registry.mark_stopped(&name).await;
            self.emit("agent.stopped", &name, format!("'{name}' left the target set"), None).await;
            result.stopped.push(name.clone());
            actual.remove(&name);
        }

        // Step 4: restart-requested agents are stopped now; they reappear
        // in target \ actual next tick and get started by step 1 then.
        for name in target.keys() {
            if !actual.contains(name) || draining.contains(name) {
                continue;
            }
            if let Some(flag) = self.sessions.get_meta(name, META_RESTART_REQUESTED).await? {
                if !flag.is_empty() {
                    self.sessions.stop(name).await?;
                    self.sessions.set_meta(name, META_RESTART_REQUESTED, "").await?;
                    self.registry.mark_stopped(name).await;
                    self.emit("agent.stopped", name, format!("'{name}' restart requested"), None).await;
                    result.stopped.push(name.clone());
                    actual.remove(name);
                }
            }
        }

        // Step 1: start target \ actual, subject to backoff/quarantine.
        for (name, instance) in &target {
            if actual.contains(name) {
                continue;
            }
            let entry = self.registry.entry(name).await;
            if entry.blocks_start(now) {
                result.skipped.push(name.clone());
                continue;
            }
            match self.sessions.start(name, &instance.start).await {
                Ok(()) => {
                    self.registry.mark_started(name, now).await;
                    self.emit("agent.started", name, format!("started '{name}'"), None).await;
                    result.started.push(name.clone());
                }
                Err(e) => {
                    let state = self
                        .registry
                        .mark_crashed(name, now, &self.backoff, &self.config.quarantine)
                        .await;
                    warn!(agent = %name, error = %e, "failed to start agent");
                    self.emit(
                        "agent.crashed",
                        name,
                        format!("'{name}' failed to start: {e}"),
                        Some(json!({ "reason": e.to_string() })),
                    )
                    .await;
                    result.crashed.push(name.clone());
                    if state == AgentState::Quarantined {
                        self.emit("agent.quarantined", name, format!("'{name}' quarantined"), None).await;
                        result.quarantined.push(name.clone());
                    }
                }
            }
        }

        // Step 3: target ∩ actual where the session reports not running.
        for (name, instance) in &target {
            if !actual.contains(name) || draining.contains(name) {
                continue;
            }
            let running = self.sessions.is_running(name).await?;
            if !running {
                // Drop the dead session from the provider's own bookkeeping so it
                // leaves `actual` and becomes eligible for step 1's backoff-gated
                // restart on the next tick, instead of lingering here forever.
                let _ = self.sessions.stop(name).await;
                let state = self
                    .registry
                    .mark_crashed(name, now, &self.backoff, &self.config.quarantine)
                    .await;
                self.emit("agent.crashed", name, format!("'{name}' crashed"), None).await;
                result.crashed.push(name.clone());
                if state == AgentState::Quarantined {
                    self.emit("agent.quarantined", name, format!("'{name}' quarantined"), None).await;
                    result.quarantined.push(name.clone());
                }
                continue;
            }

            if let Some(timeout) = instance.idle_timeout {
                if self.is_idle(name, timeout).await? {
                    self.sessions.stop(name).await?;
                    self.registry.mark_stopped(name).await;
                    self.emit("agent.idle_kill", name, format!("'{name}' idle, restarting"), None).await;
                    result.idle_killed.push(name.clone());
                    continue;
                }
            }

            self.registry.mark_alive(name, now).await;
        }

        debug!(
            started = result.started.len(),
            stopped = result.stopped.len(),
            crashed = result.crashed.len(),
            quarantined = result.quarantined.len(),
            "reconcile tick complete"
        );
        self.emit(
            "reconcile.cycle",
            "city",
            format!(
                "started={} stopped={} crashed={} quarantined={} idle_killed={} skipped={}",
                result.started.len(),
                result.stopped.len(),
                result.crashed.len(),
                result.quarantined.len(),
                result.idle_killed.len(),
                result.skipped.len()
            ),
            Some(json!({
                "started": result.started.len(),
                "stopped": result.stopped.len(),
                "crashed": result.crashed.len(),
                "quarantined": result.quarantined.len(),
                "idle_killed": result.idle_killed.len(),
                "skipped": result.skipped.len(),
            })),
        )
        .await;

        Ok(result)
    }

    /// Idle-timeout check (spec.md §4.3, "Idle-timeout restart"): the
    /// session provider exposes the last-activity timestamp as a plain
    /// Unix-seconds string under the `GC_LAST_ACTIVITY` metadata key.
    async fn is_idle(&self, name: &str, timeout: Duration) -> Result<bool> {
        let Some(raw) = self.sessions.get_meta(name, META_LAST_ACTIVITY).await? else {
            return Ok(false);
        };
        let Ok(last_activity) = raw.parse::<i64>() else {
            return Ok(false);
        };
        let now = chrono::Utc::now().timestamp();
        Ok(now.saturating_sub(last_activity) as u64 > timeout.as_secs())
    }

    /// Runs `reconcile` on `config.tick_interval` until `cancel` resolves.
    /// Ticks never overlap: each wait is for the full interval measured
    /// from the end of the previous tick (spec.md §4.3, "Tick cadence").
    pub async fn run(&self, mut cancel: impl std::future::Future<Output = ()> + Unpin) -> Result<()> {
        loop {
            tokio::select! {
                _ = &mut cancel => return Ok(()),
                result = self.reconcile() => {
                    result?;
                }
            }
            tokio::select! {
                _ = &mut cancel => return Ok(()),
                _ = tokio::time::sleep(self.config.tick_interval) => {}
            }
        }
    }
}

/// Builds the launch config for one agent instance, setting the
/// `GC_AGENT`/`GC_CITY`/`GC_DIR`/`GC_RIG` environment spec.md §6 requires
/// the session provider to pass through unchanged. Paths are resolved to
/// absolute form where possible; an unresolvable path (not yet created) is
/// passed through as given rather than failing the start.
fn build_start_config(
    command: &AgentCommand,
    instance_name: &str,
    city_path: Option<&std::path::Path>,
    rig: Option<&str>,
) -> StartConfig {
    let mut start = StartConfig::new(command.command.clone())
        .with_args(command.args.clone())
        .with_env(GC_AGENT_ENV, instance_name);

    if let Some(city_path) = city_path {
        start = start.with_env(GC_CITY_ENV, resolve_path(city_path));
    }
    if let Some(ref dir) = command.working_dir {
        let resolved = resolve_path(std::path::Path::new(dir));
        start = start.with_env(GC_DIR_ENV, resolved).with_working_dir(dir.clone());
    }
    if let Some(rig) = rig {
        start = start.with_env(GC_RIG_ENV, rig);
    }
    for (key, value) in &command.env {
        start = start.with_env(key.clone(), value.clone());
    }
    start
}

fn resolve_path(path: &std::path::Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Builder for `Controller`, mirroring the teacher's reconciler-builder
/// style.
pub struct ControllerBuilder<S: SessionProvider, R: Recorder> {
    config: CityConfig,
    sessions: Option<Arc<S>>,
    recorder: Option<Arc<R>>,
}

impl<S: SessionProvider, R: Recorder> Default for ControllerBuilder<S, R> {
    fn default() -> Self {
        Self {
            config: CityConfig::default(),
            sessions: None,
            recorder: None,
        }
    }
}

impl<S: SessionProvider, R: Recorder> ControllerBuilder<S, R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: CityConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.config.agents.push(agent);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<S>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<R>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn build(self) -> gas_core::Result<Controller<S, R>> {
        let sessions = self
            .sessions
            .ok_or_else(|| gas_core::Error::invalid("controller requires a session provider"))?;
        let recorder = self
            .recorder
            .ok_or_else(|| gas_core::Error::invalid("controller requires a recorder"))?;
        Ok(Controller::new(self.config, sessions, recorder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gas_events::MemoryRecorder;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Default)]
    struct FakeSessions {
        running: TokioMutex<StdHashMap<String, bool>>,
        meta: TokioMutex<StdHashMap<(String, String), String>>,
        start_calls: TokioMutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl SessionProvider for FakeSessions {
        async fn start(&self, name: &str, _cfg: &StartConfig) -> Result<()> {
            self.running.lock().await.insert(name.to_string(), true);
            self.start_calls.lock().await.push(name.to_string());
            Ok(())
        }

        async fn stop(&self, name: &str) -> Result<()> {
            self.running.lock().await.remove(name);
            Ok(())
        }

        async fn is_running(&self, name: &str) -> Result<bool> {
            Ok(*self.running.lock().await.get(name).unwrap_or(&false))
        }

        async fn peek(&self, _name: &str, _lines: usize) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn nudge(&self, _name: &str, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn get_meta(&self, name: &str, key: &str) -> Result<Option<String>> {
            Ok(self.meta.lock().await.get(&(name.to_string(), key.to_string())).cloned())
        }

        async fn set_meta(&self, name: &str, key: &str, value: &str) -> Result<()> {
            self.meta
                .lock()
                .await
                .insert((name.to_string(), key.to_string()), value.to_string());
            Ok(())
        }

        async fn active_names(&self) -> Result<Vec<String>> {
            Ok(self.running.lock().await.keys().cloned().collect())
        }
    }

    #[test]
    fn build_start_config_sets_agent_city_dir_rig_env() {
        let dir = tempfile::tempdir().unwrap();
        let command = AgentCommand::new("gas-agent").with_working_dir(dir.path().to_string_lossy().into_owned());
        let city_path = dir.path().join("city.toml");
        std::fs::write(&city_path, b"").unwrap();

        let start = build_start_config(&command, "worker-1", Some(&city_path), Some("rig-a"));

        let env = |key: &str| start.env.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
        assert_eq!(env("GC_AGENT").as_deref(), Some("worker-1"));
        assert_eq!(env("GC_RIG").as_deref(), Some("rig-a"));
        assert!(env("GC_CITY").is_some());
        assert!(env("GC_DIR").is_some());
    }

    #[test]
    fn build_start_config_omits_unset_city_and_rig() {
        let command = AgentCommand::new("gas-agent");
        let start = build_start_config(&command, "mayor", None, None);
        assert!(start.env.iter().all(|(k, _)| k != "GC_CITY" && k != "GC_RIG" && k != "GC_DIR"));
    }

    #[tokio::test]
    async fn starts_fixed_agent_not_yet_running() {
        let sessions = Arc::new(FakeSessions::default());
        let recorder = Arc::new(MemoryRecorder::new());
        let config = CityConfig {
            agents: vec![AgentConfig::fixed("mayor", AgentCommand::new("gas-agent"))],
            ..CityConfig::default()
        };
        let controller = Controller::new(config, sessions.clone(), recorder.clone());

        let result = controller.reconcile().await.unwrap();
        assert_eq!(result.started, vec!["mayor".to_string()]);
        assert!(sessions.is_running("mayor").await.unwrap());
        assert_eq!(recorder.latest_seq().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn steady_state_converges_across_two_ticks() {
        let sessions = Arc::new(FakeSessions::default());
        let recorder = Arc::new(MemoryRecorder::new());
        let config = CityConfig {
            agents: vec![AgentConfig::fixed("mayor", AgentCommand::new("gas-agent"))],
            ..CityConfig::default()
        };
        let controller = Controller::new(config, sessions, recorder);

        controller.reconcile().await.unwrap();
        let second = controller.reconcile().await.unwrap();
        assert!(second.is_converged());
    }

    #[tokio::test]
    async fn pool_scales_to_min_max_with_fixed_probe() {
        let sessions = Arc::new(FakeSessions::default());
        let recorder = Arc::new(MemoryRecorder::new());
        let config = CityConfig {
            agents: vec![AgentConfig::pool(
                "worker",
                AgentCommand::new("gas-agent"),
                2,
                2,
                AgentCommand::new("echo").with_args(vec!["2".to_string()]),
            )],
            ..CityConfig::default()
        };
        let controller = Controller::new(config, sessions.clone(), recorder);

        let result = controller.reconcile().await.unwrap();
        let mut started = result.started.clone();
        started.sort();
        assert_eq!(started, vec!["worker-1".to_string(), "worker-2".to_string()]);
    }

    #[tokio::test]
    async fn suspended_city_has_empty_target() {
        let sessions = Arc::new(FakeSessions::default());
        let recorder = Arc::new(MemoryRecorder::new());
        let config = CityConfig {
            agents: vec![AgentConfig::fixed("mayor", AgentCommand::new("gas-agent"))],
            suspended: true,
            ..CityConfig::default()
        };
        let controller = Controller::new(config, sessions, recorder);

        let result = controller.reconcile().await.unwrap();
        assert!(result.started.is_empty());
    }

    #[tokio::test]
    async fn crash_enters_backoff_and_blocks_next_start() {
        let sessions = Arc::new(FakeSessions::default());
        let recorder = Arc::new(MemoryRecorder::new());
        let config = CityConfig {
            agents: vec![AgentConfig::fixed("flaky", AgentCommand::new("gas-agent"))],
            backoff: crate::types::BackoffConfig {
                base: Duration::from_secs(60),
                factor: 1.0,
                ceiling: Duration::from_secs(60),
                jitter_fraction: 0.0,
            },
            ..CityConfig::default()
        };
        let controller = Controller::new(config, sessions.clone(), recorder);

        controller.reconcile().await.unwrap();
        sessions.running.lock().await.insert("flaky".to_string(), false);
        let crashed = controller.reconcile().await.unwrap();
        assert_eq!(crashed.crashed, vec!["flaky".to_string()]);

        let third = controller.reconcile().await.unwrap();
        assert_eq!(third.skipped, vec!["flaky".to_string()]);
    }

    #[tokio::test]
    async fn repeated_crashes_quarantine_the_agent() {
        let sessions = Arc::new(FakeSessions::default());
        let recorder = Arc::new(MemoryRecorder::new());
        let config = CityConfig {
            agents: vec![AgentConfig::fixed("flaky", AgentCommand::new("gas-agent"))],
            quarantine: crate::types::QuarantineConfig {
                threshold: 1,
                window: Duration::from_secs(60),
            },
            backoff: crate::types::BackoffConfig {
                base: Duration::from_millis(1),
                factor: 1.0,
                ceiling: Duration::from_millis(1),
                jitter_fraction: 0.0,
            },
            ..CityConfig::default()
        };
        let controller = Controller::new(config, sessions.clone(), recorder);

        controller.reconcile().await.unwrap();
        for _ in 0..3 {
            sessions.running.lock().await.insert("flaky".to_string(), false);
            tokio::time::sleep(Duration::from_millis(5)).await;
            controller.reconcile().await.unwrap();
            sessions.running.lock().await.remove("flaky");
        }
        let entry = controller.registry.entry("flaky").await;
        assert_eq!(entry.state, AgentState::Quarantined);
    }

    #[tokio::test]
    async fn draining_agent_is_left_running_when_orphaned() {
        let sessions = Arc::new(FakeSessions::default());
        let recorder = Arc::new(MemoryRecorder::new());
        sessions.running.lock().await.insert("ghost".to_string(), true);
        sessions
            .meta
            .lock()
            .await
            .insert(("ghost".to_string(), META_DRAIN.to_string()), "1".to_string());
        let controller = Controller::new(CityConfig::default(), sessions.clone(), recorder);

        let result = controller.reconcile().await.unwrap();
        assert!(result.stopped.is_empty());
        assert!(sessions.is_running("ghost").await.unwrap());
    }
}
