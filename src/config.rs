//! Configuration system for simexec
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (SIMEXEC_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimexecConfig {
    /// Worker pool sizing
    pub execution: ExecutionSettings,

    /// Checkpoint storage and quorum bookkeeping
    pub checkpoint: CheckpointSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Workers in the shared local pool (0 = number of CPUs)
    pub local_workers: usize,

    /// Workers in each remote destination's pool
    ///
    /// Fixed and identical for every destination. Probing remote servers
    /// for free slots is deliberately not supported.
    pub remote_workers_per_destination: usize,

    /// Prefix for worker thread names
    pub thread_name_prefix: String,
}

/// Checkpoint store kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// In-process store, lost on exit
    Memory,
    /// Directory-backed store
    File,
}

impl std::fmt::Display for CheckpointBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointBackend::Memory => write!(f, "memory"),
            CheckpointBackend::File => write!(f, "file"),
        }
    }
}

/// Checkpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    /// Enable checkpointing (disabled = runs proceed without resilience)
    pub enabled: bool,

    /// Store backend
    pub backend: CheckpointBackend,

    /// Root directory of the file backend
    pub directory: String,

    /// Owner id under which checkpoints are stored (auto-generated if not set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// Pending (not yet validated) time points kept per task
    pub max_pending_per_task: usize,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            local_workers: 0, // Auto-detect
            remote_workers_per_destination: 2,
            thread_name_prefix: "simexec".to_string(),
        }
    }
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CheckpointBackend::Memory,
            directory: "~/.simexec/checkpoints".to_string(),
            owner_id: None,
            max_pending_per_task: 64,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl ExecutionSettings {
    /// Effective size of the local pool
    pub fn effective_local_workers(&self) -> usize {
        if self.local_workers > 0 {
            self.local_workers
        } else {
            num_cpus::get()
        }
    }
}

impl CheckpointSettings {
    /// Owner id to store checkpoints under
    pub fn effective_owner_id(&self) -> String {
        self.owner_id.clone().unwrap_or_else(default_owner_id)
    }
}

impl SimexecConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|source| Error::IoRead {
                path: path.clone(),
                source,
            })?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: e.to_string(),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        // Search in standard locations
        let search_paths = [
            PathBuf::from("simexec.toml"),
            dirs::config_dir()
                .map(|p| p.join("simexec").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".simexec").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/simexec/config.toml"),
        ];

        for path in &search_paths {
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Execution settings
        if let Ok(val) = std::env::var("SIMEXEC_LOCAL_WORKERS") {
            if let Ok(n) = val.parse() {
                self.execution.local_workers = n;
            }
        }
        if let Ok(val) = std::env::var("SIMEXEC_REMOTE_WORKERS") {
            if let Ok(n) = val.parse() {
                self.execution.remote_workers_per_destination = n;
            }
        }

        // Checkpoint settings
        if let Ok(val) = std::env::var("SIMEXEC_CHECKPOINT_ENABLED") {
            self.checkpoint.enabled = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("SIMEXEC_CHECKPOINT_BACKEND") {
            match val.to_lowercase().as_str() {
                "memory" => self.checkpoint.backend = CheckpointBackend::Memory,
                "file" => self.checkpoint.backend = CheckpointBackend::File,
                other => debug!(value = %other, "Ignoring unknown SIMEXEC_CHECKPOINT_BACKEND"),
            }
        }
        if let Ok(val) = std::env::var("SIMEXEC_CHECKPOINT_DIR") {
            self.checkpoint.directory = val;
        }
        if let Ok(val) = std::env::var("SIMEXEC_OWNER_ID") {
            self.checkpoint.owner_id = Some(val);
        }

        // Logging settings
        if let Ok(val) = std::env::var("SIMEXEC_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("SIMEXEC_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("SIMEXEC_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.checkpoint.directory = expand_path(&self.checkpoint.directory);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.execution.remote_workers_per_destination == 0 {
            return Err(Error::config_field_invalid(
                "execution.remote_workers_per_destination",
                "remote_workers_per_destination must be at least 1",
            ));
        }

        if self.checkpoint.max_pending_per_task == 0 {
            return Err(Error::config_field_invalid(
                "checkpoint.max_pending_per_task",
                "max_pending_per_task must be at least 1",
            ));
        }

        if self.checkpoint.enabled
            && self.checkpoint.backend == CheckpointBackend::File
            && self.checkpoint.directory.trim().is_empty()
        {
            return Err(Error::config_field_invalid(
                "checkpoint.directory",
                "the file backend needs a directory",
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Get the checkpoint directory as a PathBuf
    pub fn checkpoint_dir(&self) -> PathBuf {
        PathBuf::from(&self.checkpoint.directory)
    }
}

/// Owner id derived from the hostname plus a random suffix
fn default_owner_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "simexec".to_string());
    format!("{}-{}", host, &uuid::Uuid::new_v4().to_string()[..8])
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".simexec")
                .join("config.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|source| Error::IoWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|source| Error::IoWrite {
        path: config_path.clone(),
        source,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# simexec configuration

[execution]
# Workers in the shared local pool (0 = number of CPUs)
local_workers = 0

# Workers in each remote destination's pool (same for every destination)
remote_workers_per_destination = 2

# Prefix for worker thread names
thread_name_prefix = "simexec"

[checkpoint]
# Enable checkpointing; when disabled runs proceed without resilience
enabled = true

# Store backend: memory or file
backend = "memory"

# Root directory of the file backend
directory = "~/.simexec/checkpoints"

# Owner id for stored checkpoints (auto-generated if not set)
# owner_id = "lab-cluster-1"

# Pending (not yet validated) time points kept per task
max_pending_per_task = 64

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.simexec/logs/simexec.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
