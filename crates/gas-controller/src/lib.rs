//! # gas-controller
//!
//! The agent controller (spec.md §4.3): reconciles a declared set of fixed
//! and pooled agents against the sessions a [`gas_session::SessionProvider`]
//! actually has running, restarting crashes with bounded backoff,
//! quarantining agents that crash too often, and emitting lifecycle events
//! through a [`gas_events::Recorder`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod backoff;
pub mod controller;
pub mod registry;
pub mod types;

pub use backoff::BackoffPolicy;
pub use controller::{Controller, ControllerBuilder};
pub use gas_core::{Error, Result};
pub use registry::{AgentRegistry, RegistryEntry};
pub use types::{
    AgentCommand, AgentConfig, AgentKind, AgentState, BackoffConfig, CityConfig, CityConfigBuilder,
    QuarantineConfig, ReconcileResult,
};
