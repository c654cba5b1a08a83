//! # gas
//!
//! Facade crate: wires a [`BeadStore`], a [`Recorder`], and a
//! [`SessionProvider`] together behind one [`City`], the thing a host
//! process actually runs. Nothing here introduces new behavior over the
//! `gas-*` crates it re-exports; it only assembles them from a
//! [`CityConfig`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

use std::sync::Arc;

pub use gas_beads::{
    is_container_type, substitute_vars, Bead, BeadPatch, BeadStatus, BeadStore, ExecBeadStore, FileBeadStore,
    Formula, FormulaStep, MemoryBeadStore, NewBead, TracingBeadStore, TYPE_AGENT, TYPE_CONVOY, TYPE_EPIC,
    TYPE_MESSAGE, TYPE_MOLECULE, TYPE_TASK,
};
pub use gas_controller::{
    AgentCommand, AgentConfig, AgentKind, AgentState, BackoffConfig, CityConfig, CityConfigBuilder, Controller,
    ControllerBuilder, QuarantineConfig, ReconcileResult,
};
pub use gas_core::{Error, Result};
pub use gas_events::{Event, EventFilter, ExecRecorder, FileRecorder, MemoryRecorder, Recorder, Watcher};
pub use gas_session::{LocalProcessSessionProvider, SessionProvider, StartConfig};

/// A fully wired Gas City: a bead store, an event recorder, a session
/// provider, and the controller reconciling agents against them.
///
/// `City` is generic over the three pluggable backends so a host can mix
/// and match (in-memory for tests, file-backed for a single operator box,
/// exec-backed for a remote store) without the controller caring which one
/// it got.
pub struct City<B: BeadStore, R: Recorder, S: SessionProvider> {
    beads: Arc<B>,
    events: Arc<R>,
    sessions: Arc<S>,
    controller: Controller<S, R>,
}

impl<B: BeadStore, R: Recorder, S: SessionProvider> City<B, R, S> {
    /// Wire an already-constructed bead store, recorder, and session
    /// provider together under `config`.
    pub fn new(beads: Arc<B>, events: Arc<R>, sessions: Arc<S>, config: CityConfig) -> Self {
        let controller = Controller::new(config, Arc::clone(&sessions), Arc::clone(&events));
        Self {
            beads,
            events,
            sessions,
            controller,
        }
    }

    pub fn beads(&self) -> &Arc<B> {
        &self.beads
    }

    pub fn events(&self) -> &Arc<R> {
        &self.events
    }

    pub fn sessions(&self) -> &Arc<S> {
        &self.sessions
    }

    pub fn controller(&self) -> &Controller<S, R> {
        &self.controller
    }

    /// Run one reconciliation tick (spec.md §4.3). See [`Controller::reconcile`].
    pub async fn reconcile(&self) -> Result<ReconcileResult> {
        self.controller.reconcile().await
    }

    /// Tick the controller on its configured cadence until `cancel`
    /// resolves. See [`Controller::run`].
    pub async fn run(&self, cancel: impl std::future::Future<Output = ()> + Unpin) -> Result<()> {
        self.controller.run(cancel).await
    }
}

impl City<MemoryBeadStore, MemoryRecorder, LocalProcessSessionProvider> {
    /// A city with in-memory bead store and event log, backed by real
    /// child-process sessions. Nothing here outlives the process; useful
    /// for tests and for a host that doesn't need durability across
    /// restarts.
    pub fn in_memory(config: CityConfig) -> Self {
        Self::new(
            Arc::new(MemoryBeadStore::new()),
            Arc::new(MemoryRecorder::new()),
            Arc::new(LocalProcessSessionProvider::new()),
            config,
        )
    }
}

impl City<FileBeadStore, FileRecorder, LocalProcessSessionProvider> {
    /// A city whose bead store and event log are each a single file on
    /// disk (spec.md §4.1/§4.2, "File provider"), reopening existing state
    /// if the paths already exist.
    pub fn file_backed(
        beads_path: impl Into<std::path::PathBuf>,
        events_path: impl Into<std::path::PathBuf>,
        config: CityConfig,
    ) -> Result<Self> {
        let beads = Arc::new(FileBeadStore::open(beads_path)?);
        let events = Arc::new(FileRecorder::open(events_path)?);
        let sessions = Arc::new(LocalProcessSessionProvider::new());
        Ok(Self::new(beads, events, sessions, config))
    }
}
