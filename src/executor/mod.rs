//! Task executor module
//!
//! Handles the task execution lifecycle:
//! - Driving one configuration from initialization to a terminal result
//! - Gating execution on the execution controller's decision
//! - Routing jobs onto the local pool or a per-destination remote pool
//! - Tearing destination pools down once nothing references them

mod gate;
mod job;
mod manager;
mod pool;
mod traits;

pub use gate::*;
pub use job::*;
pub use manager::*;
pub use pool::*;
pub use traits::*;

use std::any::Any;

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
