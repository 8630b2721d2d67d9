/*!
 * restore-pages - content-routed restore of Pages snapshots
 *
 * Replays a local Pages snapshot onto a single appliance or a cluster:
 * - Enumerates content paths in the snapshot
 * - Asks a remote route oracle which storage nodes hold each path
 * - Mirrors each node's share with rsync, sequentially or in parallel
 * - Commits the placement on cluster head nodes in bounded chunks
 * - Cleans up local and remote scratch space on every exit path
 */

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod stats;
pub mod system;
pub mod testing;

// Re-export commonly used types
pub use config::{LogLevel, RemoteHost, RestoreConfig};
pub use core::{ContentPath, NodeId, Partition, Restorer, RouteEntry, RouteTable};
pub use error::{RestoreError, Result};
pub use stats::{RestoreOutcome, RestoreStats};
pub use system::Capabilities;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
