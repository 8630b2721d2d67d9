/*!
 * Route table parsing and the route resolver client
 *
 * The oracle answers one line per submitted path: `path node_1 ... node_k`.
 * A line with no nodes is a valid "cannot place" answer.
 */

use std::collections::HashSet;
use std::fs;

use tracing::{debug, info, warn};

use super::scratch::ScratchSpace;
use super::snapshot::write_path_list;
use super::{ContentPath, NodeId, RouteEntry};
use crate::error::{RestoreError, Result};
use crate::system::RouteOracle;

/// File names inside local scratch
pub const PATH_LIST_FILE: &str = "paths.list";
pub const ROUTE_LIST_FILE: &str = "routes.list";

/// Ordered placement decisions returned by the oracle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    /// 1-based response line of each entry
    lines: Vec<usize>,
}

impl RouteTable {
    pub fn new(entries: Vec<RouteEntry>) -> Self {
        let lines = (1..=entries.len()).collect();
        Self { entries, lines }
    }

    /// Parse an oracle response
    pub fn parse(response: &str) -> Result<Self> {
        let mut entries = Vec::new();
        let mut lines = Vec::new();

        for (idx, line) in response.lines().enumerate() {
            let mut tokens = line.split_whitespace();
            let Some(path) = tokens.next() else {
                continue;
            };

            let mut nodes: Vec<NodeId> = Vec::new();
            for token in tokens {
                validate_node(token).map_err(|reason| RestoreError::RouteParse {
                    line: idx + 1,
                    reason,
                })?;
                let node = NodeId::new(token);
                if !nodes.contains(&node) {
                    nodes.push(node);
                }
            }

            entries.push(RouteEntry::new(ContentPath::new(path), nodes));
            lines.push(idx + 1);
        }

        Ok(Self { entries, lines })
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries the oracle could not place
    pub fn unrouted(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_routed()).count()
    }

    /// Reject routes for paths that were never requested
    pub fn check_requested(&self, requested: &[ContentPath]) -> Result<()> {
        let requested: HashSet<&ContentPath> = requested.iter().collect();
        for (entry, &line) in self.entries.iter().zip(&self.lines) {
            if !requested.contains(&entry.path) {
                return Err(RestoreError::RouteParse {
                    line,
                    reason: format!("route for unrequested path {}", entry.path),
                });
            }
        }
        Ok(())
    }

    /// Serialize back to the wire format, one entry per line
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_line());
            out.push('\n');
        }
        out
    }
}

/// Node names end up as file names and ssh/rsync host arguments
fn validate_node(token: &str) -> std::result::Result<(), String> {
    if token.starts_with('-') {
        return Err(format!("node name '{}' starts with '-'", token));
    }
    if token.contains('/') || token == "." || token == ".." {
        return Err(format!("node name '{}' is not a plain name", token));
    }
    Ok(())
}

/// Ask the oracle where each path belongs
///
/// The request and the raw response are kept in local scratch. An empty
/// response is returned as an empty table; oracle failures propagate.
pub fn resolve_routes(
    oracle: &dyn RouteOracle,
    paths: &[ContentPath],
    scratch: &ScratchSpace,
) -> Result<RouteTable> {
    let request = scratch.local_path(PATH_LIST_FILE);
    write_path_list(paths, &request)?;

    info!("Resolving routes for {} paths", paths.len());
    let response = oracle.resolve(&request, scratch)?;
    fs::write(scratch.local_path(ROUTE_LIST_FILE), &response)?;

    let table = RouteTable::parse(&response)?;
    table.check_requested(paths)?;

    if table.len() < paths.len() {
        warn!(
            "Oracle answered {} of {} requested paths",
            table.len(),
            paths.len()
        );
    }
    debug!(
        "Received {} routes ({} unplaced)",
        table.len(),
        table.unrouted()
    );

    Ok(table)
}
