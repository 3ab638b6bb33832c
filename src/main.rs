//! simexec - execution of simulation task batches
//!
//! Entry point of the `simexec` binary. The execution machinery lives in
//! the library; this file wires configuration, logging and the CLI to it.

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use simexec::checkpoint::{self, CheckpointCoordinator};
use simexec::config::{self, SimexecConfig};
use simexec::error::{Error, Result};
use simexec::runner::{self, Batch, BatchSummary, DemoState, JobReport, TaskRegistry};
use simexec::types::TaskId;
use simexec::{logging, version};

use crate::cli::{Cli, Commands, ConfigSubcommand};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    // Commands that don't need full logging
    match cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { ref subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        _ => {}
    }

    let config_path = match &cli.command {
        Commands::Run { config, .. } | Commands::Checkpoints { config, .. } => config.clone(),
        _ => None,
    };
    let mut config = SimexecConfig::load(config_path.as_deref())?;

    if let Commands::Run {
        local_workers,
        remote_workers,
        no_checkpoints,
        ..
    } = &cli.command
    {
        apply_cli_overrides(&mut config, *local_workers, *remote_workers, *no_checkpoints);
        config.validate()?;
    }

    // Guards must outlive every command
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting simexec"
    );

    match cli.command {
        Commands::Run { batch, output, .. } => run_batch(config, &batch, output.as_deref(), cli.quiet),
        Commands::Checkpoints { task, .. } => show_checkpoints(&config, &task),
        Commands::Version | Commands::Config { .. } => unreachable!("handled above"),
    }
}

/// CLI flags take precedence over file and environment
fn apply_cli_overrides(
    config: &mut SimexecConfig,
    local_workers: Option<usize>,
    remote_workers: Option<usize>,
    no_checkpoints: bool,
) {
    if let Some(n) = local_workers {
        config.execution.local_workers = n;
    }
    if let Some(n) = remote_workers {
        config.execution.remote_workers_per_destination = n;
    }
    if no_checkpoints {
        config.checkpoint.enabled = false;
    }
}

/// Run a batch file to completion
fn run_batch(config: SimexecConfig, batch_path: &str, output: Option<&str>, quiet: bool) -> Result<()> {
    let batch = Batch::load(Path::new(batch_path))?;
    let configs = batch.configurations();

    info!(
        batch = %batch_path,
        jobs = configs.len(),
        local_workers = config.execution.effective_local_workers(),
        remote_workers = config.execution.remote_workers_per_destination,
        checkpoints = config.checkpoint.enabled,
        "Batch loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("simexec-rt")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    let reports = runtime.block_on(async {
        let runner::DemoSetup {
            runner,
            mut reports,
            controller,
            ..
        } = runner::demo_runner(&config)?;

        let expected = configs.len();
        runner.submit_all(configs);

        let shutdown_signal = tokio::signal::ctrl_c();
        tokio::pin!(shutdown_signal);
        let mut cancelling = false;
        let mut collected: Vec<JobReport> = Vec::with_capacity(expected);

        while collected.len() < expected {
            tokio::select! {
                _ = &mut shutdown_signal, if !cancelling => {
                    info!("Interrupt received, cancelling outstanding jobs");
                    cancelling = true;
                    controller.reject_all();
                    runner.cancel_all();
                }
                report = reports.recv() => {
                    let Some(report) = report else {
                        warn!("Report channel closed early");
                        break;
                    };
                    if !quiet {
                        print_report(&report);
                    }
                    collected.push(report);
                }
            }
        }

        runner.shut_down();
        let manager = runner.manager().clone();
        tokio::task::spawn_blocking(move || manager.await_termination())
            .await
            .map_err(|e| Error::Internal(format!("Pool termination task failed: {}", e)))?;

        Ok::<_, Error>(collected)
    })?;

    let summary = BatchSummary::from_reports(&reports);
    if !quiet {
        println!();
        println!(
            "{} jobs: {} succeeded, {} failed, {} cancelled",
            summary.total, summary.succeeded, summary.failed, summary.cancelled
        );
    }

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&reports)?;
        std::fs::write(path, json).map_err(|source| Error::IoWrite {
            path: path.into(),
            source,
        })?;
        info!(path = %path, "Run information written");
    }

    if summary.all_succeeded() {
        Ok(())
    } else {
        Err(Error::ExecutionFailed {
            task_id: None,
            message: format!("{} of {} jobs did not succeed", summary.total - summary.succeeded, summary.total),
        })
    }
}

fn print_report(report: &JobReport) {
    let info = &report.info;
    println!(
        "{:<32} {:<10} {:>8} ms  {}",
        report.config.name,
        info.outcome,
        info.run_time_ms(),
        info.error.as_deref().unwrap_or("")
    );
}

/// Print the last valid checkpoint of a task
fn show_checkpoints(config: &SimexecConfig, task: &str) -> Result<()> {
    let store = checkpoint::store_from_config(config)
        .ok_or_else(|| Error::StorageUnavailable("checkpointing is disabled".to_string()))?;
    if config.checkpoint.owner_id.is_none() {
        warn!("No checkpoint.owner_id configured; only checkpoints of this process are visible");
    }

    let coordinator = CheckpointCoordinator::from_settings(&config.checkpoint, Arc::new(TaskRegistry::new()));
    if !coordinator.set_data_storage(store) {
        return Err(Error::StorageUnavailable(format!(
            "{} store could not be opened",
            config.checkpoint.backend
        )));
    }

    let task_id = TaskId::new(task);
    match coordinator.get_checkpoints(&task_id) {
        None => println!("No valid checkpoint for task '{}'", task_id),
        Some(entries) => {
            println!("Task '{}' (owner {}):", task_id, coordinator.owner_id());
            for entry in entries {
                match serde_json::from_slice::<DemoState>(&entry.payload) {
                    Ok(state) => println!(
                        "  host {:>3}  time {:>10}  step {:>6}  value {:.4}",
                        entry.host, entry.time, state.step, state.value
                    ),
                    Err(_) => println!(
                        "  host {:>3}  time {:>10}  {} bytes",
                        entry.host,
                        entry.time,
                        entry.payload.len()
                    ),
                }
            }
        }
    }

    coordinator.shut_down();
    Ok(())
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = SimexecConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let created = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", created.display());
        }
        ConfigSubcommand::Validate { config } => {
            SimexecConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
