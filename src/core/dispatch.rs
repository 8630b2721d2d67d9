/*!
 * Transfer dispatch: one mirrored copy per node partition
 *
 * Both modes stop at the first failure. Transfers that already finished
 * stay on disk; rerunning the restore converges every node.
 */

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{error, info, warn};

use super::interrupt::Interrupt;
use crate::error::{Phase, RestoreError, Result};
use crate::stats::NodeTransfer;
use crate::system::{TransferTarget, Transferrer, TransportConfig};

/// How node transfers are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// One node after another
    #[default]
    Sequential,
    /// All nodes at once, one worker per node
    Parallel,
}

/// Everything needed to mirror one node's partition
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub target: TransferTarget,
    /// File list holding the node's content paths, one per line
    pub files_from: PathBuf,
    /// Number of content paths in `files_from`
    pub paths: usize,
    /// Local pages tree the paths are relative to
    pub source: PathBuf,
    /// Pages tree on the node
    pub destination: PathBuf,
    pub transport: TransportConfig,
}

/// Run every task, failing fast on the first error
///
/// Parallel mode only runs concurrently when every task targets a different
/// address; otherwise two mirrors would write into the same tree, so the
/// tasks run one after another. No task starts once `interrupt` is set.
pub fn dispatch(
    tasks: &[TransferTask],
    transferrer: &dyn Transferrer,
    mode: DispatchMode,
    interrupt: &Interrupt,
) -> Result<Vec<NodeTransfer>> {
    let mode = match mode {
        DispatchMode::Parallel if !distinct_addresses(tasks) => {
            warn!("Several nodes share one address, transferring sequentially");
            DispatchMode::Sequential
        }
        mode => mode,
    };

    match mode {
        DispatchMode::Sequential => tasks
            .iter()
            .map(|task| run_task(task, transferrer, interrupt))
            .collect(),
        DispatchMode::Parallel => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(tasks.len().max(1))
                .thread_name(|i| format!("transfer-{}", i))
                .build()
                .map_err(|e| RestoreError::Parallel(e.to_string()))?;

            pool.install(|| {
                tasks
                    .par_iter()
                    .map(|task| run_task(task, transferrer, interrupt))
                    .collect()
            })
        }
    }
}

fn distinct_addresses(tasks: &[TransferTask]) -> bool {
    let mut seen = HashSet::new();
    tasks.iter().all(|task| seen.insert(task.target.address.as_str()))
}

fn run_task(
    task: &TransferTask,
    transferrer: &dyn Transferrer,
    interrupt: &Interrupt,
) -> Result<NodeTransfer> {
    interrupt.check(Phase::Transfer)?;
    info!(
        "Transferring {} paths to {} ({})",
        task.paths, task.target.node, task.target.address
    );
    let start = Instant::now();

    let report = transferrer.transfer(task).inspect_err(|e| {
        error!("Transfer to {} failed: {}", task.target.node, e);
    })?;

    Ok(NodeTransfer {
        node: task.target.node.to_string(),
        address: task.target.address.clone(),
        paths: task.paths,
        files_transferred: report.files_transferred,
        files_deleted: report.files_deleted,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
