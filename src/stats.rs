/*!
 * Restore run outcome and statistics
 */

use serde::Serialize;

/// Result of one node transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeTransfer {
    pub node: String,
    pub address: String,
    pub paths: usize,
    /// Reported by the transfer tool when available
    pub files_transferred: Option<u64>,
    pub files_deleted: Option<u64>,
    pub duration_ms: u64,
}

/// Statistics summary for a completed restore
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreStats {
    pub paths_enumerated: usize,
    pub routes_received: usize,
    /// Routes the oracle could not place
    pub routes_unplaced: usize,
    pub transfers: Vec<NodeTransfer>,
    /// Finalize chunks committed (cluster mode)
    pub finalize_chunks: usize,
    pub duration_ms: u64,
}

impl RestoreStats {
    pub fn nodes(&self) -> usize {
        self.transfers.len()
    }

    /// Sum of reported transferred files, if every node reported one
    pub fn files_transferred(&self) -> Option<u64> {
        self.transfers.iter().map(|t| t.files_transferred).sum()
    }

    /// Print formatted statistics
    pub fn print(&self) {
        println!("Pages restore complete");
        println!("  Content paths:   {}", self.paths_enumerated);
        println!(
            "  Routes:          {} ({} unplaced)",
            self.routes_received, self.routes_unplaced
        );
        println!("  Nodes:           {}", self.nodes());
        for transfer in &self.transfers {
            let files = transfer
                .files_transferred
                .map(|n| format!(", {} files sent", n))
                .unwrap_or_default();
            println!(
                "    {:<20} {} paths{} ({} ms)",
                transfer.node, transfer.paths, files, transfer.duration_ms
            );
        }
        if self.finalize_chunks > 0 {
            println!("  Finalize chunks: {}", self.finalize_chunks);
        }
        println!("  Duration:        {} ms", self.duration_ms);
    }
}

/// How a run ended successfully
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// Snapshot holds no pages content
    NothingToRestore,
    /// The oracle placed nothing
    NoRoutes,
    Restored(RestoreStats),
}

impl RestoreOutcome {
    /// One-line notice for the graceful-skip cases
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            RestoreOutcome::NothingToRestore => Some("Pages: nothing to restore"),
            RestoreOutcome::NoRoutes => Some("Pages: no routes found, nothing to restore"),
            RestoreOutcome::Restored(_) => None,
        }
    }

    pub fn stats(&self) -> Option<&RestoreStats> {
        match self {
            RestoreOutcome::Restored(stats) => Some(stats),
            _ => None,
        }
    }

    pub fn print(&self) {
        match self {
            RestoreOutcome::Restored(stats) => stats.print(),
            other => {
                if let Some(notice) = other.notice() {
                    println!("{}", notice);
                }
            }
        }
    }
}
