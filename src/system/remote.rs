//! Head-node capabilities implemented over ssh

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::ssh::{shell_quote, SshSession};
use super::{Finalizer, RemoteScratch, RouteOracle};
use crate::core::{FinalizeChunk, ScratchSpace};
use crate::error::{Phase, RestoreError, Result};

const REMOTE_PATH_LIST: &str = "paths.list";
const REMOTE_ROUTE_LIST: &str = "routes.list";

/// `mktemp -d` / `rm -rf` on the head node
#[derive(Debug, Clone)]
pub struct SshRemoteScratch {
    session: Arc<SshSession>,
}

impl SshRemoteScratch {
    pub fn new(session: Arc<SshSession>) -> Self {
        Self { session }
    }
}

impl RemoteScratch for SshRemoteScratch {
    fn create(&self) -> Result<PathBuf> {
        let out = self
            .session
            .run(Phase::Scratch, "mktemp -d -t restore-pages.XXXXXX", None)?;
        let dir = out.trim();
        if !dir.starts_with('/') || dir.lines().count() != 1 {
            return Err(RestoreError::Subprocess {
                phase: Phase::Scratch,
                program: "mktemp".to_string(),
                target: self.session.host().name.clone(),
                status: Some(0),
                stderr: format!("unexpected mktemp output '{}'", dir),
            });
        }
        debug!("Remote scratch {}", dir);
        Ok(PathBuf::from(dir))
    }

    fn remove(&self, dir: &Path) -> Result<()> {
        let cmd = format!("rm -rf -- {}", shell_quote(&dir.to_string_lossy()));
        self.session.run(Phase::Cleanup, &cmd, None).map(|_| ())
    }
}

/// Runs the route oracle on the head node
///
/// The request is uploaded to remote scratch, the oracle reads and writes
/// files there, and the result is fetched only after the oracle's own exit
/// status has been checked.
#[derive(Debug, Clone)]
pub struct SshRouteOracle {
    session: Arc<SshSession>,
    command: String,
}

impl SshRouteOracle {
    pub fn new(session: Arc<SshSession>, command: impl Into<String>) -> Self {
        Self {
            session,
            command: command.into(),
        }
    }

    fn oracle_command(&self, input: &Path, output: &Path) -> String {
        format!(
            "{} < {} > {}",
            self.command,
            shell_quote(&input.to_string_lossy()),
            shell_quote(&output.to_string_lossy())
        )
    }
}

impl RouteOracle for SshRouteOracle {
    fn resolve(&self, request: &Path, scratch: &ScratchSpace) -> Result<String> {
        let remote_in = scratch.remote_path(REMOTE_PATH_LIST);
        let remote_out = scratch.remote_path(REMOTE_ROUTE_LIST);

        self.session.upload(Phase::Resolve, request, &remote_in)?;
        self.session.run(
            Phase::Resolve,
            &self.oracle_command(&remote_in, &remote_out),
            None,
        )?;

        let cat = format!("cat {}", shell_quote(&remote_out.to_string_lossy()));
        self.session.run(Phase::Resolve, &cat, None)
    }
}

/// Runs the finalize command on the head node, one chunk per invocation
#[derive(Debug, Clone)]
pub struct SshFinalizer {
    session: Arc<SshSession>,
    command: String,
}

impl SshFinalizer {
    pub fn new(session: Arc<SshSession>, command: impl Into<String>) -> Self {
        Self {
            session,
            command: command.into(),
        }
    }
}

impl Finalizer for SshFinalizer {
    /// Head node CPU count, or 1 when it cannot be determined
    fn slots(&self) -> Result<usize> {
        let out = match self.session.run(Phase::Finalize, "nproc", None) {
            Ok(out) => out,
            Err(e) => {
                warn!("Could not query head node CPU count, finalizing serially: {}", e);
                return Ok(1);
            }
        };
        match out.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => {
                warn!("Could not read head node CPU count from '{}'", out.trim());
                Ok(1)
            }
        }
    }

    fn finalize(&self, chunk: &FinalizeChunk) -> Result<()> {
        debug!(
            "Finalizing chunk {} ({} routes)",
            chunk.index, chunk.entries
        );
        self.session
            .run(Phase::Finalize, &self.command, Some(&chunk.file))
            .map(|_| ())
    }
}
