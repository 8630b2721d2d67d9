/*!
 * Scratch space lifecycle
 *
 * One local and one remote temporary directory per run. Both are released
 * when the `ScratchSpace` goes out of scope, whichever way the run ends.
 * Release failures are logged and never replace the run's own result.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::Result;
use crate::system::RemoteScratch;

pub struct ScratchSpace {
    local: Option<TempDir>,
    local_dir: PathBuf,
    remote_dir: PathBuf,
    remote: Arc<dyn RemoteScratch>,
}

impl ScratchSpace {
    /// Allocate both directories
    ///
    /// If the remote side fails, the local directory is already owned by a
    /// guard and is removed on return.
    pub fn acquire(remote: Arc<dyn RemoteScratch>) -> Result<Self> {
        let local = tempfile::Builder::new()
            .prefix("restore-pages.")
            .tempdir()?;
        let local_dir = local.path().to_path_buf();
        let remote_dir = remote.create()?;

        debug!(
            "Scratch space: local {}, remote {}",
            local_dir.display(),
            remote_dir.display()
        );

        Ok(Self {
            local: Some(local),
            local_dir,
            remote_dir,
            remote,
        })
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn local_path(&self, name: &str) -> PathBuf {
        self.local_dir.join(name)
    }

    pub fn remote_dir(&self) -> &Path {
        &self.remote_dir
    }

    pub fn remote_path(&self, name: &str) -> PathBuf {
        self.remote_dir().join(name)
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        if let Err(e) = self.remote.remove(&self.remote_dir) {
            warn!(
                "Failed to remove remote scratch {}: {}",
                self.remote_dir.display(),
                e
            );
        }

        if let Some(local) = self.local.take() {
            if let Err(e) = local.close() {
                warn!(
                    "Failed to remove local scratch {}: {}",
                    self.local_dir.display(),
                    e
                );
            }
        }
    }
}
