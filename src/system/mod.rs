//! External capabilities the restore pipeline drives
//!
//! Every remote interaction goes through one of these traits:
//! - `RouteOracle`: maps content paths to storage nodes
//! - `Transferrer`: mirrors one node's partition onto that node
//! - `Finalizer`: commits a chunk of routes on the head node
//! - `RemoteScratch`: creates and removes the remote scratch directory
//!
//! Production implementations shell out to `ssh` and `rsync`; fakes for
//! tests live in [`crate::testing`].

mod remote;
mod rsync;
mod ssh;
mod topology;

pub use remote::{SshFinalizer, SshRemoteScratch, SshRouteOracle};
pub use rsync::{parse_rsync_stats, RsyncTransferrer};
pub use ssh::{shell_quote, SshSession};
pub use topology::{
    select_topology, ClusterTopology, SingleHostTopology, Topology, TransferTarget,
    TransportConfig,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RestoreConfig;
use crate::core::{FinalizeChunk, ScratchSpace, TransferTask};
use crate::error::Result;

/// Remote routing oracle
pub trait RouteOracle: Send + Sync {
    /// Submit the newline-delimited path list in `request` and return the
    /// raw response text. An empty response is not an error.
    fn resolve(&self, request: &Path, scratch: &ScratchSpace) -> Result<String>;
}

/// Outcome of one node transfer, when the transfer tool reports it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub files_transferred: Option<u64>,
    pub files_deleted: Option<u64>,
}

/// One-way mirror of a partition onto a node
pub trait Transferrer: Send + Sync {
    fn transfer(&self, task: &TransferTask) -> Result<TransferReport>;
}

/// Cluster finalize step
pub trait Finalizer: Send + Sync {
    /// Concurrent finalize invocations the head node can take
    fn slots(&self) -> Result<usize>;

    /// Commit the routes in one chunk; re-running a chunk is a no-op remotely
    fn finalize(&self, chunk: &FinalizeChunk) -> Result<()>;
}

/// Remote scratch directory lifecycle
pub trait RemoteScratch: Send + Sync {
    fn create(&self) -> Result<PathBuf>;
    fn remove(&self, dir: &Path) -> Result<()>;
}

/// The full capability set a restore run needs
#[derive(Clone)]
pub struct Capabilities {
    pub oracle: Arc<dyn RouteOracle>,
    pub transferrer: Arc<dyn Transferrer>,
    pub finalizer: Arc<dyn Finalizer>,
    pub scratch: Arc<dyn RemoteScratch>,
}

impl Capabilities {
    /// Wire the ssh/rsync implementations against the configured host
    pub fn production(config: &RestoreConfig) -> Result<Self> {
        let session = Arc::new(SshSession::from_config(config)?);

        Ok(Self {
            oracle: Arc::new(SshRouteOracle::new(
                session.clone(),
                config.routes_command.clone(),
            )),
            transferrer: Arc::new(RsyncTransferrer::new(
                config.rsync_program.clone(),
                config.remote_sync_user.clone(),
            )),
            finalizer: Arc::new(SshFinalizer::new(
                session.clone(),
                config.finalize_command.clone(),
            )),
            scratch: Arc::new(SshRemoteScratch::new(session)),
        })
    }
}
