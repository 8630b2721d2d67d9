/*!
 * restore-pages CLI
 *
 * Usage: restore-pages <host>
 */

use clap::{ArgAction, Parser, ValueEnum};
use restore_pages::{
    config::{LogLevel, RestoreConfig},
    error::{Result, EXIT_SUCCESS},
    core::Interrupt,
    logging, Capabilities, Restorer,
};
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = "restore-pages")]
#[command(version, about = "Restore Pages content from a snapshot onto an appliance or cluster", long_about = None)]
struct Cli {
    /// Appliance to restore onto, `host` or `host:port`
    #[arg(value_name = "HOST")]
    host: String,

    /// TOML configuration file; flags and environment take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Snapshot label to restore from
    #[arg(long, env = "GHE_RESTORE_SNAPSHOT")]
    snapshot: Option<String>,

    /// Local backup data directory
    #[arg(long, env = "GHE_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// User data directory on the appliance
    #[arg(long, env = "GHE_REMOTE_DATA_USER_DIR", value_name = "DIR")]
    remote_data_user_dir: Option<PathBuf>,

    /// Target is a cluster
    #[arg(long, env = "GHE_CLUSTER", action = ArgAction::SetTrue)]
    cluster: bool,

    /// Extra options for every ssh invocation
    #[arg(long, env = "GHE_EXTRA_SSH_OPTS", value_name = "OPTS", allow_hyphen_values = true)]
    extra_ssh_opts: Option<String>,

    /// Administrative ssh user
    #[arg(long, env = "GHE_SSH_USER")]
    ssh_user: Option<String>,

    /// rsync executable
    #[arg(long, env = "GHE_RSYNC", value_name = "PROGRAM")]
    rsync: Option<String>,

    /// Transfer to all nodes at once instead of one after another
    #[arg(long)]
    parallel_transfers: bool,

    /// Concurrent finalize invocations (0 = head node CPU count)
    #[arg(long, value_name = "N")]
    finalize_jobs: Option<usize>,

    /// Log level
    #[arg(long, value_enum)]
    log_level: Option<LogLevelArg>,

    /// Write logs as JSON to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long)]
    verbose: bool,

    /// Print the run outcome as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

impl Cli {
    /// Resolve the run configuration: file, then environment and flags
    fn into_config(self) -> Result<(RestoreConfig, bool)> {
        let mut config = match self.config {
            Some(ref path) => RestoreConfig::from_file(path)?,
            None => RestoreConfig::default(),
        };

        config.host = self.host;
        if let Some(snapshot) = self.snapshot {
            config.snapshot = snapshot;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(dir) = self.remote_data_user_dir {
            config.remote_data_user_dir = dir;
        }
        config.cluster |= self.cluster;
        if let Some(opts) = self.extra_ssh_opts {
            config.extra_ssh_opts = opts.split_whitespace().map(str::to_string).collect();
        }
        if let Some(user) = self.ssh_user {
            config.ssh_user = user;
        }
        if let Some(rsync) = self.rsync {
            config.rsync_program = rsync;
        }
        config.parallel_transfers |= self.parallel_transfers;
        if let Some(jobs) = self.finalize_jobs {
            config.finalize_jobs = jobs;
        }
        if let Some(level) = self.log_level {
            config.log_level = level.into();
        }
        if self.log.is_some() {
            config.log_file = self.log;
        }
        config.verbose |= self.verbose;

        Ok((config, self.json))
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            error!(category = %e.category(), "{}", e);
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let (config, json) = Cli::parse().into_config()?;

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    config.validate()?;
    let interrupt = Interrupt::install()?;
    let caps = Capabilities::production(&config)?;
    let restorer = Restorer::from_config(config, caps)?.with_interrupt(interrupt);
    let outcome = restorer.run()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        outcome.print();
    }

    Ok(())
}
