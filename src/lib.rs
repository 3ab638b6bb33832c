//! simexec - execution of simulation tasks with validated checkpoints
//!
//! Runs independent computation tasks locally or on remote execution
//! servers and keeps distributed tasks resumable through checkpoints that
//! only count once every participating host has reported them.
//!
//! # Architecture
//!
//! - [`executor`]: execution jobs, their decision gate and the worker pools
//! - [`checkpoint`]: checkpoint stores, quorum bookkeeping and the coordinator
//! - [`runner`]: batch loading, job submission and the built-in demo workload
//! - [`types`]: task identities, configurations and run information
//!
//! # Example
//!
//! ```rust,no_run
//! use simexec::config::SimexecConfig;
//! use simexec::runner::{demo_runner, Batch};
//!
//! # async fn example() -> simexec::Result<()> {
//! let config = SimexecConfig::load(None)?;
//! let batch = Batch::load("batch.toml".as_ref())?;
//! let configs = batch.configurations();
//! let expected = configs.len();
//!
//! let mut setup = demo_runner(&config)?;
//! setup.runner.submit_all(configs);
//! for _ in 0..expected {
//!     if let Some(report) = setup.reports.recv().await {
//!         println!("{}: {}", report.config.name, report.info.outcome);
//!     }
//! }
//! setup.runner.shut_down();
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod runner;
pub mod types;
pub mod version;

pub use error::{Error, Result};

/// Application name
pub const APP_NAME: &str = "simexec";

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
