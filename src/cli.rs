//! CLI argument parsing using clap v4

use clap::{Parser, Subcommand};

/// simexec - local and remote execution of simulation tasks
///
/// Runs batches of computation tasks on a local worker pool or on
/// per-server remote pools, with checkpoints validated across all hosts
/// of a distributed task.
#[derive(Parser, Debug)]
#[command(name = "simexec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a batch of tasks to completion
    Run {
        /// Batch file (TOML) listing the task configurations
        #[arg(short, long)]
        batch: String,

        /// Path to configuration file
        #[arg(short, long, env = "SIMEXEC_CONFIG")]
        config: Option<String>,

        /// Write the run information of every job to this file (JSON)
        #[arg(short, long)]
        output: Option<String>,

        /// Override the local pool size (0 = number of CPUs)
        #[arg(long)]
        local_workers: Option<usize>,

        /// Override the per-destination pool size
        #[arg(long)]
        remote_workers: Option<usize>,

        /// Run without checkpointing
        #[arg(long)]
        no_checkpoints: bool,
    },

    /// Show the last valid checkpoint of a task
    Checkpoints {
        /// Task id (the configuration name for demo tasks)
        #[arg(short, long)]
        task: String,

        /// Path to configuration file
        #[arg(short, long, env = "SIMEXEC_CONFIG")]
        config: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_requires_batch() {
        assert!(Cli::try_parse_from(["simexec", "run"]).is_err());
    }

    #[test]
    fn test_run_with_overrides() {
        let cli = Cli::parse_from([
            "simexec",
            "run",
            "--batch",
            "batch.toml",
            "--remote-workers",
            "3",
            "--no-checkpoints",
            "--output",
            "out.json",
        ]);
        match cli.command {
            Commands::Run {
                batch,
                output,
                local_workers,
                remote_workers,
                no_checkpoints,
                ..
            } => {
                assert_eq!(batch, "batch.toml");
                assert_eq!(output.as_deref(), Some("out.json"));
                assert_eq!(local_workers, None);
                assert_eq!(remote_workers, Some(3));
                assert!(no_checkpoints);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_checkpoints_command() {
        let cli = Cli::parse_from(["simexec", "checkpoints", "--task", "growth/rep-0"]);
        match cli.command {
            Commands::Checkpoints { task, config } => {
                assert_eq!(task, "growth/rep-0");
                assert!(config.is_none());
            }
            _ => panic!("Expected Checkpoints command"),
        }
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["simexec", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_quiet_flag() {
        let cli = Cli::parse_from(["simexec", "--quiet", "version"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["simexec", "config", "init", "--force"]);
        match cli.command {
            Commands::Config {
                subcommand: ConfigSubcommand::Init { path, force },
            } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
