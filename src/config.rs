/*!
 * Configuration types for restore-pages
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{RestoreError, Result};

/// Number of path segments below `pages/` that name one content item
pub const PAGES_DEPTH: usize = 5;

/// Upper bound on route lines sent to a single finalize invocation
pub const MAX_FINALIZE_CHUNK: usize = 1000;

/// Main configuration for a restore run
///
/// Built once at startup (file, then environment, then command line) and
/// passed by reference to every component afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Target appliance, `host` or `host:port`
    #[serde(default)]
    pub host: String,

    /// Snapshot label under the data directory
    #[serde(default = "default_snapshot")]
    pub snapshot: String,

    /// Local backup data root
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Live user data root on the remote side
    #[serde(default = "default_remote_data_user_dir")]
    pub remote_data_user_dir: PathBuf,

    /// Restore onto a cluster instead of a single host
    #[serde(default)]
    pub cluster: bool,

    /// Extra options appended to every ssh invocation
    #[serde(default)]
    pub extra_ssh_opts: Vec<String>,

    /// Administrative ssh user on the appliance
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// ssh port, unless the host carries one
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Identity rsync runs as on the receiving side
    #[serde(default = "default_remote_sync_user")]
    pub remote_sync_user: String,

    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,

    #[serde(default = "default_rsync_program")]
    pub rsync_program: String,

    /// Remote command computing routes (paths on stdin, routes on stdout)
    #[serde(default = "default_routes_command")]
    pub routes_command: String,

    /// Remote command committing a chunk of routes read from stdin
    #[serde(default = "default_finalize_command")]
    pub finalize_command: String,

    /// Run per-node transfers concurrently instead of one after another
    #[serde(default)]
    pub parallel_transfers: bool,

    /// Concurrent finalize invocations (0 = ask the head node)
    #[serde(default)]
    pub finalize_jobs: usize,

    /// Route lines per finalize invocation
    #[serde(default = "default_finalize_chunk_size")]
    pub finalize_chunk_size: usize,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            snapshot: default_snapshot(),
            data_dir: default_data_dir(),
            remote_data_user_dir: default_remote_data_user_dir(),
            cluster: false,
            extra_ssh_opts: Vec::new(),
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
            remote_sync_user: default_remote_sync_user(),
            ssh_program: default_ssh_program(),
            rsync_program: default_rsync_program(),
            routes_command: default_routes_command(),
            finalize_command: default_finalize_command(),
            parallel_transfers: false,
            finalize_jobs: 0,
            finalize_chunk_size: default_finalize_chunk_size(),
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
        }
    }
}

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// A remote appliance address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub name: String,
    pub port: u16,
}

impl RemoteHost {
    /// Parse `host` or `host:port`, using `default_port` when none is given
    pub fn parse(spec: &str, default_port: u16) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(RestoreError::Config("host is required".to_string()));
        }

        match spec.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') => {
                if name.is_empty() {
                    return Err(RestoreError::Config(format!("invalid host '{}'", spec)));
                }
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| {
                        RestoreError::Config(format!("invalid port in host '{}'", spec))
                    })?;
                Ok(Self {
                    name: name.to_string(),
                    port,
                })
            }
            _ => Ok(Self {
                name: spec.to_string(),
                port: default_port,
            }),
        }
    }
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

fn default_snapshot() -> String {
    "current".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_remote_data_user_dir() -> PathBuf {
    PathBuf::from("/data/user")
}

fn default_ssh_user() -> String {
    "admin".to_string()
}

fn default_ssh_port() -> u16 {
    122
}

fn default_remote_sync_user() -> String {
    "git".to_string()
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_rsync_program() -> String {
    "rsync".to_string()
}

fn default_routes_command() -> String {
    "/usr/local/bin/github-env ./bin/dpages-cluster-restore-routes".to_string()
}

fn default_finalize_command() -> String {
    "/usr/local/bin/github-env ./bin/dpages-cluster-restore-finalize".to_string()
}

fn default_finalize_chunk_size() -> usize {
    MAX_FINALIZE_CHUNK
}

impl RestoreConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RestoreError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: RestoreConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Check invariants that must hold before any remote interaction
    pub fn validate(&self) -> Result<()> {
        self.remote_host()?;

        if self.snapshot.is_empty() || self.snapshot.contains('/') {
            return Err(RestoreError::Config(format!(
                "invalid snapshot label '{}'",
                self.snapshot
            )));
        }

        if self.finalize_chunk_size == 0 || self.finalize_chunk_size > MAX_FINALIZE_CHUNK {
            return Err(RestoreError::Config(format!(
                "finalize chunk size must be between 1 and {}, got {}",
                MAX_FINALIZE_CHUNK, self.finalize_chunk_size
            )));
        }

        if !self.remote_data_user_dir.is_absolute() {
            return Err(RestoreError::Config(format!(
                "remote data directory must be absolute: {}",
                self.remote_data_user_dir.display()
            )));
        }

        Ok(())
    }

    pub fn remote_host(&self) -> Result<RemoteHost> {
        RemoteHost::parse(&self.host, self.ssh_port)
    }

    /// Root of the snapshot being restored
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot)
    }

    /// Local pages tree inside the snapshot
    pub fn pages_dir(&self) -> PathBuf {
        self.snapshot_dir().join("pages")
    }

    /// Live pages tree on every storage node
    pub fn remote_pages_dir(&self) -> PathBuf {
        self.remote_data_user_dir.join("pages")
    }
}
