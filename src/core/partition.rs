/*!
 * Route partitioning: invert the route table into one path list per node
 */

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::routes::RouteTable;
use super::{ContentPath, NodeId};
use crate::error::Result;

/// Extension of per-node file lists in local scratch
pub const PARTITION_EXTENSION: &str = "rsync";

/// Paths each node must receive, in route table order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    nodes: BTreeMap<NodeId, Vec<ContentPath>>,
}

impl Partition {
    /// Build the partition from a route table
    ///
    /// A path lands once in the list of every node named for it; entries
    /// without nodes contribute nothing.
    pub fn from_routes(table: &RouteTable) -> Self {
        let mut nodes: BTreeMap<NodeId, Vec<ContentPath>> = BTreeMap::new();
        let mut seen: HashSet<(&NodeId, &ContentPath)> = HashSet::new();

        for entry in table.entries() {
            for node in &entry.nodes {
                if seen.insert((node, &entry.path)) {
                    nodes
                        .entry(node.clone())
                        .or_default()
                        .push(entry.path.clone());
                }
            }
        }

        Self { nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes with at least one path
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn paths_for(&self, node: &NodeId) -> &[ContentPath] {
        self.nodes.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &[ContentPath])> {
        self.nodes.iter().map(|(node, paths)| (node, paths.as_slice()))
    }

    /// Total (node, path) assignments across all nodes
    pub fn assignments(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    /// Location of a node's file list inside `dir`
    pub fn file_for(dir: &Path, node: &NodeId) -> PathBuf {
        dir.join(format!("{}.{}", node, PARTITION_EXTENSION))
    }

    /// Write one file list per node into `dir`, returning the files in node order
    pub fn write_files(&self, dir: &Path) -> Result<Vec<(NodeId, PathBuf)>> {
        let mut files = Vec::with_capacity(self.nodes.len());
        for (node, paths) in &self.nodes {
            let file = Self::file_for(dir, node);
            let mut writer = BufWriter::new(File::create(&file)?);
            for path in paths {
                writeln!(writer, "{}", path)?;
            }
            writer.flush()?;
            files.push((node.clone(), file));
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RouteEntry;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::tempdir;

    fn table(lines: &str) -> RouteTable {
        RouteTable::parse(lines).unwrap()
    }

    #[test]
    fn test_single_node_keeps_order() {
        let t = table("p/1/a/a/a h\np/0/a/a/a h\np/2/a/a/a h\n");
        let partition = Partition::from_routes(&t);
        assert_eq!(partition.node_count(), 1);
        let paths: Vec<&str> = partition
            .paths_for(&NodeId::new("h"))
            .iter()
            .map(ContentPath::as_str)
            .collect();
        assert_eq!(paths, vec!["p/1/a/a/a", "p/0/a/a/a", "p/2/a/a/a"]);
    }

    #[test]
    fn test_replicated_entries_fan_out() {
        let t = table("a/a/a/a/a n1 n2\nb/b/b/b/b n2 n3\nc/c/c/c/c\n");
        let partition = Partition::from_routes(&t);
        assert_eq!(partition.node_count(), 3);
        assert_eq!(partition.paths_for(&NodeId::new("n1")).len(), 1);
        assert_eq!(partition.paths_for(&NodeId::new("n2")).len(), 2);
        assert_eq!(partition.paths_for(&NodeId::new("n3")).len(), 1);
        assert_eq!(partition.assignments(), 4);
    }

    #[test]
    fn test_union_equals_routed_entries() {
        let t = table(
            "a/a/a/a/a n1 n2\nb/b/b/b/b\nc/c/c/c/c n3\na/a/a/a/a n1\nd/d/d/d/d n2 n2 n1\n",
        );
        let partition = Partition::from_routes(&t);

        let expected: BTreeSet<(String, String)> = t
            .entries()
            .iter()
            .flat_map(|e| {
                e.nodes
                    .iter()
                    .map(move |n| (n.to_string(), e.path.to_string()))
            })
            .collect();

        let mut actual = Vec::new();
        for (node, paths) in partition.iter() {
            for path in paths {
                actual.push((node.to_string(), path.to_string()));
            }
        }
        let actual_set: BTreeSet<_> = actual.iter().cloned().collect();

        // Nothing lost, nothing duplicated within a node
        assert_eq!(actual_set, expected);
        assert_eq!(actual.len(), actual_set.len());
        assert!(!partition
            .iter()
            .any(|(_, paths)| paths.iter().any(|p| p.as_str() == "b/b/b/b/b")));
    }

    #[test]
    fn test_all_unrouted_is_empty() {
        let t = RouteTable::new(vec![RouteEntry::new(ContentPath::new("a/a/a/a/a"), vec![])]);
        assert!(Partition::from_routes(&t).is_empty());
        assert!(Partition::from_routes(&RouteTable::default()).is_empty());
    }

    #[test]
    fn test_write_files() {
        let dir = tempdir().unwrap();
        let partition = Partition::from_routes(&table("a/a/a/a/a n2\nb/b/b/b/b n1 n2\n"));
        let files = partition.write_files(dir.path()).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, NodeId::new("n1"));
        assert_eq!(files[1].1, dir.path().join("n2.rsync"));
        assert_eq!(fs::read_to_string(&files[0].1).unwrap(), "b/b/b/b/b\n");
        assert_eq!(
            fs::read_to_string(&files[1].1).unwrap(),
            "a/a/a/a/a\nb/b/b/b/b\n"
        );
    }
}
