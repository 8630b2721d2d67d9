/*!
 * Core restore pipeline: snapshot enumeration, route resolution,
 * partitioning, transfer dispatch and cluster finalize.
 */

pub mod dispatch;
pub mod finalize;
pub mod interrupt;
pub mod partition;
pub mod restore;
pub mod routes;
pub mod scratch;
pub mod snapshot;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative path naming one content item inside a snapshot's `pages/` tree
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentPath(String);

impl ContentPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage node name as reported by the route oracle
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(node: impl Into<String>) -> Self {
        Self(node.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Placement decision for one content item
///
/// An entry without nodes means the oracle could not place the item; it is
/// skipped for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub path: ContentPath,
    pub nodes: Vec<NodeId>,
}

impl RouteEntry {
    pub fn new(path: ContentPath, nodes: Vec<NodeId>) -> Self {
        Self { path, nodes }
    }

    pub fn is_routed(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Wire form: `path node_1 ... node_k`
    pub fn to_line(&self) -> String {
        let mut line = self.path.as_str().to_string();
        for node in &self.nodes {
            line.push(' ');
            line.push_str(node.as_str());
        }
        line
    }
}

pub use dispatch::{dispatch, DispatchMode, TransferTask};
pub use finalize::{chunk_routes, finalize_routes, FinalizeChunk};
pub use interrupt::Interrupt;
pub use partition::Partition;
pub use restore::Restorer;
pub use routes::RouteTable;
pub use scratch::ScratchSpace;
pub use snapshot::{enumerate_content_paths, enumerate_snapshot};
