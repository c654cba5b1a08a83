//! Bead store: a pluggable work-unit persistence contract (memory, file,
//! and exec-process backends) plus formula-driven molecule composition.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod exec;
pub mod file;
pub mod memory;
pub mod store;
pub mod tracing_store;
pub mod types;

pub use exec::ExecBeadStore;
pub use file::FileBeadStore;
pub use gas_core::{Error, Result};
pub use memory::MemoryBeadStore;
pub use store::BeadStore;
pub use tracing_store::TracingBeadStore;
pub use types::{
    is_container_type, substitute_vars, Bead, BeadPatch, BeadStatus, Formula, FormulaStep,
    NewBead, TYPE_AGENT, TYPE_CONVOY, TYPE_EPIC, TYPE_MESSAGE, TYPE_MOLECULE, TYPE_TASK,
};
