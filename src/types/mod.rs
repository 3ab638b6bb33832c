//! Type definitions for simexec
//!
//! Identifiers, task configurations and the run-information record shared
//! by the executor, the checkpoint coordinator and the runner.

mod run_info;
mod task;

pub use run_info::*;
pub use task::*;
