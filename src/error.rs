/*!
 * Error types for restore-pages
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RestoreError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
/// 128 + SIGINT, as shells report an interrupted command
pub const EXIT_INTERRUPTED: i32 = 130;

/// Pipeline phase an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scratch,
    Enumerate,
    Resolve,
    Partition,
    Transfer,
    Finalize,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Scratch => write!(f, "scratch"),
            Phase::Enumerate => write!(f, "enumerate"),
            Phase::Resolve => write!(f, "resolve-routes"),
            Phase::Partition => write!(f, "partition"),
            Phase::Transfer => write!(f, "transfer"),
            Phase::Finalize => write!(f, "finalize"),
            Phase::Cleanup => write!(f, "cleanup"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RestoreError {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot directory does not exist
    #[error("Snapshot not found: {}", .0.display())]
    SnapshotNotFound(PathBuf),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Subprocess could not be started
    #[error("[{phase}] failed to run {program}: {source}")]
    Spawn {
        phase: Phase,
        program: String,
        #[source]
        source: io::Error,
    },

    /// Subprocess ran and exited unsuccessfully
    #[error("[{phase}] {program} on {target} failed ({}){}", status_text(.status), stderr_text(.stderr))]
    Subprocess {
        phase: Phase,
        program: String,
        target: String,
        status: Option<i32>,
        stderr: String,
    },

    /// Malformed line in the route oracle response
    #[error("Invalid route at line {line}: {reason}")]
    RouteParse { line: usize, reason: String },

    /// Worker pool failure
    #[error("Parallel processing error: {0}")]
    Parallel(String),

    /// Termination signal received; the run stopped before its next step
    #[error("[{phase}] interrupted")]
    Interrupted { phase: Phase },

    /// Run summary could not be rendered
    #[error("Failed to render run summary: {0}")]
    Render(#[from] serde_json::Error),
}

fn status_text(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn stderr_text(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl RestoreError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RestoreError::Config(_) | RestoreError::SnapshotNotFound(_) => EXIT_CONFIG,
            RestoreError::Interrupted { .. } => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Phase the error originated in, if it came from a subprocess
    pub fn phase(&self) -> Option<Phase> {
        match self {
            RestoreError::Spawn { phase, .. } | RestoreError::Subprocess { phase, .. } => {
                Some(*phase)
            }
            RestoreError::RouteParse { .. } => Some(Phase::Resolve),
            RestoreError::Interrupted { phase } => Some(*phase),
            _ => None,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            RestoreError::Config(_) | RestoreError::SnapshotNotFound(_) => {
                ErrorCategory::Configuration
            }
            RestoreError::Io(_) => ErrorCategory::IoError,
            RestoreError::Spawn { .. } | RestoreError::Subprocess { .. } => ErrorCategory::Transport,
            RestoreError::RouteParse { .. } => ErrorCategory::Protocol,
            RestoreError::Parallel(_) => ErrorCategory::Concurrency,
            RestoreError::Interrupted { .. } => ErrorCategory::Interrupted,
            RestoreError::Render(_) => ErrorCategory::Output,
        }
    }

    /// Check if this error is a transport failure (ssh, rsync or a remote command)
    pub fn is_transport(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration and argument errors
    Configuration,
    /// Local I/O errors
    IoError,
    /// Remote command or sync failures
    Transport,
    /// Malformed oracle output
    Protocol,
    /// Worker pool errors
    Concurrency,
    /// Stopped by a termination signal
    Interrupted,
    /// Run summary rendering
    Output,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Transport => write!(f, "transport"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Concurrency => write!(f, "concurrency"),
            ErrorCategory::Interrupted => write!(f, "interrupted"),
            ErrorCategory::Output => write!(f, "output"),
        }
    }
}

impl From<toml::de::Error> for RestoreError {
    fn from(err: toml::de::Error) -> Self {
        RestoreError::Config(format!("TOML parse error: {}", err))
    }
}
