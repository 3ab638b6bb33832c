//! Error types for simexec
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for simexec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoPermission = 202,
    IoNotFound = 203,

    // Execution errors (5xx)
    TaskSetupFailed = 500,
    ExecutionFailed = 501,
    ExecutionCancelled = 502,
    RemoteControlFailed = 503,

    // Pool errors (6xx)
    PoolShutDown = 600,
    PoolSpawnFailed = 601,

    // Checkpoint errors (7xx)
    StorageUnavailable = 700,
    StorageOpenFailed = 701,
    StorageIncompatible = 702,
    CheckpointCorrupted = 703,
    MissingContext = 704,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            500..=599 => 50, // Execution errors
            600..=699 => 60, // Pool errors
            700..=799 => 70, // Checkpoint errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────

    /// Task could not be built from its configuration
    #[error("Failed to set up task '{config}': {message}")]
    TaskSetup { config: String, message: String },

    /// Task execution failed
    #[error("Task execution failed: {message}")]
    ExecutionFailed {
        task_id: Option<String>,
        message: String,
    },

    /// Task was cancelled before or during execution
    #[error("Task {task_id} was cancelled")]
    Cancelled { task_id: String },

    /// Remote stop or control call failed
    #[error("Remote control call to {destination} failed: {message}")]
    RemoteControl { destination: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Pool Errors
    // ─────────────────────────────────────────────────────────────

    /// Pool no longer accepts work
    #[error("Worker pool '{pool}' is shut down")]
    PoolShutDown { pool: String },

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread for pool '{pool}': {source}")]
    PoolSpawn {
        pool: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────
    // Checkpoint Errors
    // ─────────────────────────────────────────────────────────────

    /// No usable checkpoint storage is configured
    #[error("Checkpoint storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Storage backend failed to open or initialize
    #[error("Failed to open checkpoint storage: {message}")]
    StorageOpen { message: String },

    /// Storage backend lacks a required operation
    #[error("Checkpoint storage '{store}' does not support: {missing}")]
    StorageIncompatible { store: String, missing: String },

    /// Stored checkpoint failed its integrity check
    #[error("Checkpoint for task {task_id} at t={time} is corrupted: {message}")]
    CheckpointCorrupted {
        task_id: String,
        time: f64,
        message: String,
    },

    /// Identifying data needed by an operation is absent
    #[error("Missing context: {0}")]
    MissingContext(String),

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                std::io::ErrorKind::PermissionDenied => ErrorCode::IoPermission,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::Json(_) => ErrorCode::CheckpointCorrupted,

            Error::TaskSetup { .. } => ErrorCode::TaskSetupFailed,
            Error::ExecutionFailed { .. } => ErrorCode::ExecutionFailed,
            Error::Cancelled { .. } => ErrorCode::ExecutionCancelled,
            Error::RemoteControl { .. } => ErrorCode::RemoteControlFailed,

            Error::PoolShutDown { .. } => ErrorCode::PoolShutDown,
            Error::PoolSpawn { .. } => ErrorCode::PoolSpawnFailed,

            Error::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            Error::StorageOpen { .. } => ErrorCode::StorageOpenFailed,
            Error::StorageIncompatible { .. } => ErrorCode::StorageIncompatible,
            Error::CheckpointCorrupted { .. } => ErrorCode::CheckpointCorrupted,
            Error::MissingContext(_) => ErrorCode::MissingContext,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if retrying the same operation later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RemoteControl { .. }
                | Error::StorageOpen { .. }
                | Error::Io(_)
                | Error::IoRead { .. }
                | Error::IoWrite { .. }
        )
    }

    /// Check if the error is fatal (process should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'simexec config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'simexec config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::StorageOpen { .. } | Error::StorageUnavailable(_) => Some(
                "Check the [checkpoint] directory is writable. Runs continue without checkpoints."
            ),
            Error::StorageIncompatible { .. } => Some(
                "Choose a checkpoint backend that supports write, read and validate."
            ),
            Error::PoolSpawn { .. } => Some(
                "Lower 'local_workers' or 'remote_workers_per_destination' in [execution]."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let suggestion = self.suggestion();

        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            code.as_str(),
            self
        );

        if let Some(hint) = suggestion {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound { path: path.into() }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a task setup error
    pub fn task_setup(config: impl Into<String>, message: impl Into<String>) -> Self {
        Error::TaskSetup {
            config: config.into(),
            message: message.into(),
        }
    }

    /// Create an execution failed error
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Error::ExecutionFailed {
            task_id: None,
            message: message.into(),
        }
    }

    /// Create a remote control error
    pub fn remote_control(destination: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::RemoteControl {
            destination: destination.to_string(),
            message: message.into(),
        }
    }

    /// Create a storage open error
    pub fn storage_open(message: impl Into<String>) -> Self {
        Error::StorageOpen {
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::ConfigNotFound.as_str(), "E100");
        assert_eq!(ErrorCode::PoolShutDown.as_str(), "E600");
        assert_eq!(ErrorCode::InternalError.as_str(), "E900");
    }

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(ErrorCode::ConfigNotFound.exit_code(), 10);
        assert_eq!(ErrorCode::IoRead.exit_code(), 20);
        assert_eq!(ErrorCode::ExecutionFailed.exit_code(), 50);
        assert_eq!(ErrorCode::PoolSpawnFailed.exit_code(), 60);
        assert_eq!(ErrorCode::StorageUnavailable.exit_code(), 70);
        assert_eq!(ErrorCode::InternalError.exit_code(), 90);
    }

    #[test]
    fn test_error_codes() {
        let err = Error::config_not_found("/test");
        assert_eq!(err.code(), ErrorCode::ConfigNotFound);

        let err = Error::task_setup("local-A", "bad parameter");
        assert_eq!(err.code(), ErrorCode::TaskSetupFailed);
        assert!(err.to_string().contains("local-A"));

        let err = Error::remote_control("server-x", "refused");
        assert_eq!(err.code(), ErrorCode::RemoteControlFailed);

        let err = Error::MissingContext("no task id".into());
        assert_eq!(err.code(), ErrorCode::MissingContext);
    }

    #[test]
    fn test_error_retryable() {
        assert!(Error::remote_control("server-x", "timeout").is_retryable());
        assert!(Error::storage_open("locked").is_retryable());
        assert!(!Error::config_not_found("/test").is_retryable());
        assert!(!Error::MissingContext("task".into()).is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        assert!(Error::config_not_found("/test").is_fatal());
        assert!(Error::config_field_invalid("execution.local_workers", "too many").is_fatal());
        assert!(!Error::storage_open("locked").is_fatal());
    }

    #[test]
    fn test_error_suggestions() {
        let err = Error::config_not_found("/test");
        assert!(err.suggestion().unwrap().contains("config init"));

        let err = Error::StorageUnavailable("none configured".into());
        assert!(err.suggestion().unwrap().contains("without checkpoints"));
    }

    #[test]
    fn test_format_for_terminal() {
        let formatted = Error::config_not_found("/test/config.toml").format_for_terminal();

        assert!(formatted.contains("E100"));
        assert!(formatted.contains("\x1b[31m"));
        assert!(formatted.contains("Hint"));
    }

    #[test]
    fn test_format_for_log() {
        let formatted = Error::config_not_found("/test/config.toml").format_for_log();

        assert!(formatted.contains("[E100]"));
        assert!(!formatted.contains("\x1b["));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        assert_eq!(err.code(), ErrorCode::IoNotFound);
    }
}
