//! # gas-session
//!
//! The session interface: the narrow capability set (start/stop/peek/nudge/
//! metadata) that the agent controller drives every running agent through.
//! Gas City never implements the agent itself — only this boundary, plus one
//! concrete backend (`LocalProcessSessionProvider`) that runs a session as a
//! plain child process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod local;
pub mod provider;

pub use gas_core::{Error, Result};
pub use local::LocalProcessSessionProvider;
pub use provider::{SessionProvider, StartConfig};
