/*!
 * End-to-end restore pipeline tests
 *
 * Tests cover:
 * - Empty snapshot and empty route table early exits
 * - Single-host and cluster partitioning and dispatch
 * - Fail-fast transfer behaviour and parallel dispatch per address
 * - Convergent re-runs against local mirror targets
 * - Finalize chunking in cluster mode
 */

use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use restore_pages::core::Partition;
use restore_pages::system::Capabilities;
use restore_pages::testing::{
    LocalMirrorTransferrer, LocalScratch, RecordingFinalizer, RecordingTransferrer, StaticOracle,
};
use restore_pages::{NodeId, RestoreConfig, RestoreOutcome, Restorer, RouteTable};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Content path for the i-th item, five segments deep
fn content_path(i: usize) -> String {
    format!("{:x}/{:02x}/{:02x}/{:02x}/{}", i % 16, i % 251, (i / 7) % 256, i % 13, i)
}

fn add_items(data: &TempDir, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let rel = content_path(i);
            data.child(format!("current/pages/{}/index.html", rel))
                .write_str(&format!("page {}", i))
                .unwrap();
            rel
        })
        .collect()
}

fn routes(paths: &[String], nodes: &[&str]) -> String {
    let mut out = String::new();
    for path in paths {
        out.push_str(path);
        for node in nodes {
            out.push(' ');
            out.push_str(node);
        }
        out.push('\n');
    }
    out
}

fn config(data: &TempDir, cluster: bool) -> RestoreConfig {
    RestoreConfig {
        host: "ghe.example.com".to_string(),
        data_dir: data.path().to_path_buf(),
        cluster,
        ..Default::default()
    }
}

struct Harness {
    oracle: Arc<StaticOracle>,
    finalizer: Arc<RecordingFinalizer>,
    scratch: Arc<LocalScratch>,
}

impl Harness {
    fn new(response: &str) -> Self {
        Self {
            oracle: Arc::new(StaticOracle::new(response)),
            finalizer: Arc::new(RecordingFinalizer::new(4)),
            scratch: Arc::new(LocalScratch::new()),
        }
    }

    fn caps(&self, transferrer: Arc<dyn restore_pages::system::Transferrer>) -> Capabilities {
        Capabilities {
            oracle: self.oracle.clone(),
            transferrer,
            finalizer: self.finalizer.clone(),
            scratch: self.scratch.clone(),
        }
    }
}

// =============================================================================
// Scenario A: empty snapshot
// =============================================================================

#[test]
fn test_empty_snapshot_skips_oracle() {
    let data = TempDir::new().unwrap();
    data.child("current/pages").create_dir_all().unwrap();

    let harness = Harness::new("");
    let transferrer = Arc::new(RecordingTransferrer::new());
    let restorer =
        Restorer::from_config(config(&data, false), harness.caps(transferrer.clone())).unwrap();

    let outcome = restorer.run().unwrap();
    assert_eq!(outcome, RestoreOutcome::NothingToRestore);
    assert!(outcome.notice().unwrap().contains("nothing to restore"));
    assert_eq!(harness.oracle.calls(), 0);
    assert!(transferrer.nodes().is_empty());

    // Scratch released even on the early exit
    assert_eq!(harness.scratch.created().len(), 1);
    assert_eq!(harness.scratch.removed(), harness.scratch.created());
}

#[test]
fn test_snapshot_without_pages_dir_is_nothing_to_restore() {
    let data = TempDir::new().unwrap();
    data.child("current").create_dir_all().unwrap();

    let harness = Harness::new("");
    let restorer = Restorer::from_config(
        config(&data, false),
        harness.caps(Arc::new(RecordingTransferrer::new())),
    )
    .unwrap();

    assert_eq!(restorer.run().unwrap(), RestoreOutcome::NothingToRestore);
    assert_eq!(harness.oracle.calls(), 0);
}

#[test]
fn test_missing_snapshot_fails() {
    let data = TempDir::new().unwrap();
    let harness = Harness::new("");
    let restorer = Restorer::from_config(
        config(&data, false),
        harness.caps(Arc::new(RecordingTransferrer::new())),
    )
    .unwrap();

    let err = restorer.run().unwrap_err();
    assert_ne!(err.exit_code(), 0);
    assert_eq!(harness.scratch.removed(), harness.scratch.created());
}

// =============================================================================
// Empty route table
// =============================================================================

#[test]
fn test_empty_oracle_response_skips_transfer() {
    let data = TempDir::new().unwrap();
    let paths = add_items(&data, 3);

    let harness = Harness::new("");
    let transferrer = Arc::new(RecordingTransferrer::new());
    let restorer =
        Restorer::from_config(config(&data, true), harness.caps(transferrer.clone())).unwrap();

    assert_eq!(restorer.run().unwrap(), RestoreOutcome::NoRoutes);
    assert_eq!(harness.oracle.calls(), 1);
    assert_eq!(harness.oracle.last_request().unwrap(), paths_sorted(&paths));
    assert!(transferrer.nodes().is_empty());
    assert!(harness.finalizer.chunk_sizes().is_empty());
}

fn paths_sorted(paths: &[String]) -> Vec<String> {
    let mut sorted = paths.to_vec();
    sorted.sort();
    sorted
}

// =============================================================================
// Scenario B: single host
// =============================================================================

#[test]
fn test_single_host_one_partition_one_transfer() {
    let data = TempDir::new().unwrap();
    let paths = add_items(&data, 5);

    let harness = Harness::new(&routes(&paths, &["localhost"]));
    let transferrer = Arc::new(RecordingTransferrer::new());
    let restorer =
        Restorer::from_config(config(&data, false), harness.caps(transferrer.clone())).unwrap();

    let outcome = restorer.run().unwrap();
    let stats = outcome.stats().unwrap();

    assert_eq!(stats.paths_enumerated, 5);
    assert_eq!(stats.nodes(), 1);
    assert_eq!(stats.transfers[0].paths, 5);
    assert_eq!(transferrer.nodes(), vec![NodeId::new("localhost")]);
    assert_eq!(transferrer.file_lists()[0].len(), 5);
    assert_eq!(stats.finalize_chunks, 0);
    assert!(harness.finalizer.chunk_sizes().is_empty());
}

// =============================================================================
// Scenario C: cluster with finalize chunking
// =============================================================================

#[test]
fn test_cluster_three_nodes_finalize_chunks() {
    let data = TempDir::new().unwrap();
    let paths = add_items(&data, 2500);

    let harness = Harness::new(&routes(&paths, &["pages-1", "pages-2", "pages-3"]));
    let transferrer = Arc::new(RecordingTransferrer::new());
    let restorer =
        Restorer::from_config(config(&data, true), harness.caps(transferrer.clone())).unwrap();

    let stats = restorer.run().unwrap().stats().cloned().unwrap();

    assert_eq!(stats.nodes(), 3);
    assert!(stats.transfers.iter().all(|t| t.paths == 2500));
    assert!(transferrer.file_lists().iter().all(|l| l.len() == 2500));
    assert_eq!(stats.finalize_chunks, 3);
    assert_eq!(harness.finalizer.chunk_sizes(), vec![1000, 1000, 500]);
}

#[test]
fn test_cluster_parallel_transfers() {
    let data = TempDir::new().unwrap();
    let paths = add_items(&data, 20);

    let harness = Harness::new(&routes(&paths, &["pages-1", "pages-2", "pages-3"]));
    let transferrer = Arc::new(RecordingTransferrer::new());
    let config = RestoreConfig {
        parallel_transfers: true,
        ..config(&data, true)
    };
    let restorer = Restorer::from_config(config, harness.caps(transferrer.clone())).unwrap();

    let stats = restorer.run().unwrap().stats().cloned().unwrap();
    assert_eq!(stats.nodes(), 3);
    let mut nodes = transferrer.nodes();
    nodes.sort();
    assert_eq!(
        nodes,
        vec![
            NodeId::new("pages-1"),
            NodeId::new("pages-2"),
            NodeId::new("pages-3")
        ]
    );
}

#[test]
fn test_single_host_parallel_never_overlaps_on_one_address() {
    let data = TempDir::new().unwrap();
    let paths = add_items(&data, 4);

    let harness = Harness::new(&routes(&paths, &["pages-1", "pages-2"]));
    let transferrer = Arc::new(RecordingTransferrer::new());
    let config = RestoreConfig {
        parallel_transfers: true,
        ..config(&data, false)
    };
    let restorer = Restorer::from_config(config, harness.caps(transferrer.clone())).unwrap();

    let stats = restorer.run().unwrap().stats().cloned().unwrap();
    assert_eq!(stats.nodes(), 2);
    assert!(stats
        .transfers
        .iter()
        .all(|t| t.address == "ghe.example.com"));
    assert_eq!(transferrer.max_in_flight_per_address(), 1);
    assert_eq!(
        transferrer.nodes(),
        vec![NodeId::new("pages-1"), NodeId::new("pages-2")]
    );
}

#[test]
fn test_cluster_parallel_overlaps_distinct_nodes_only() {
    let data = TempDir::new().unwrap();
    let paths = add_items(&data, 4);

    let harness = Harness::new(&routes(&paths, &["pages-1", "pages-2", "pages-3"]));
    let transferrer = Arc::new(RecordingTransferrer::new());
    let config = RestoreConfig {
        parallel_transfers: true,
        ..config(&data, true)
    };
    let restorer = Restorer::from_config(config, harness.caps(transferrer.clone())).unwrap();

    restorer.run().unwrap();
    assert_eq!(transferrer.max_in_flight_per_address(), 1);
}

// =============================================================================
// Scenario D: transport failure mid-dispatch
// =============================================================================

#[test]
fn test_transfer_failure_aborts_remaining_nodes() {
    let data = TempDir::new().unwrap();
    let paths = add_items(&data, 6);
    let targets = TempDir::new().unwrap();

    let harness = Harness::new(&routes(&paths, &["pages-1", "pages-2", "pages-3"]));
    let transferrer = Arc::new(LocalMirrorTransferrer::failing_on(
        targets.path(),
        NodeId::new("pages-2"),
    ));
    let restorer =
        Restorer::from_config(config(&data, true), harness.caps(transferrer.clone())).unwrap();

    let err = restorer.run().unwrap_err();
    assert_ne!(err.exit_code(), 0);
    assert!(err.to_string().contains("pages-2"));

    // Node 1 keeps its data, node 3 was never attempted
    targets
        .child(format!("pages-1/{}/index.html", paths[0]))
        .assert(predicate::path::exists());
    targets
        .child("pages-3")
        .assert(predicate::path::missing());
    assert_eq!(
        transferrer.nodes(),
        vec![NodeId::new("pages-1"), NodeId::new("pages-2")]
    );

    // No finalize after a failed transfer, scratch still released
    assert!(harness.finalizer.chunk_sizes().is_empty());
    assert_eq!(harness.scratch.removed(), harness.scratch.created());
}

// =============================================================================
// Convergence
// =============================================================================

#[test]
fn test_second_run_is_a_no_op() {
    let data = TempDir::new().unwrap();
    let paths = add_items(&data, 8);
    let targets = TempDir::new().unwrap();

    let response = routes(&paths[..4], &["pages-1"]) + &routes(&paths[4..], &["pages-1", "pages-2"]);
    let harness = Harness::new(&response);
    let transferrer = Arc::new(LocalMirrorTransferrer::new(targets.path()));
    let restorer =
        Restorer::from_config(config(&data, true), harness.caps(transferrer.clone())).unwrap();

    let first = restorer.run().unwrap().stats().cloned().unwrap();
    assert_eq!(first.files_transferred(), Some(8 + 4));

    let second = restorer.run().unwrap().stats().cloned().unwrap();
    assert_eq!(second.files_transferred(), Some(0));
    assert!(second
        .transfers
        .iter()
        .all(|t| t.files_deleted == Some(0)));
}

#[test]
fn test_rerun_after_failure_converges() {
    let data = TempDir::new().unwrap();
    let paths = add_items(&data, 4);
    let targets = TempDir::new().unwrap();
    let response = routes(&paths, &["pages-1", "pages-2"]);

    let harness = Harness::new(&response);
    let failing = Arc::new(LocalMirrorTransferrer::failing_on(
        targets.path(),
        NodeId::new("pages-2"),
    ));
    let restorer =
        Restorer::from_config(config(&data, true), harness.caps(failing)).unwrap();
    assert!(restorer.run().is_err());

    let healthy = Arc::new(LocalMirrorTransferrer::new(targets.path()));
    let restorer =
        Restorer::from_config(config(&data, true), harness.caps(healthy.clone())).unwrap();
    let stats = restorer.run().unwrap().stats().cloned().unwrap();

    // pages-1 was already in place, pages-2 receives everything
    let by_node: Vec<_> = stats
        .transfers
        .iter()
        .map(|t| (t.node.as_str(), t.files_transferred))
        .collect();
    assert_eq!(by_node, vec![("pages-1", Some(0)), ("pages-2", Some(4))]);
    assert_same_tree(
        &data.path().join("current/pages"),
        &healthy.node_root(&NodeId::new("pages-2")),
    );
}

#[test]
fn test_scoped_delete_only_touches_listed_paths() {
    let data = TempDir::new().unwrap();
    let paths = add_items(&data, 2);
    let targets = TempDir::new().unwrap();

    // Stale file inside a listed path, and unrelated content outside
    targets
        .child(format!("pages-1/{}/stale.html", paths[0]))
        .write_str("old")
        .unwrap();
    targets
        .child("pages-1/f/ff/ff/ff/999/index.html")
        .write_str("unrelated")
        .unwrap();

    let harness = Harness::new(&routes(&paths, &["pages-1"]));
    let transferrer = Arc::new(LocalMirrorTransferrer::new(targets.path()));
    let restorer =
        Restorer::from_config(config(&data, true), harness.caps(transferrer)).unwrap();
    let stats = restorer.run().unwrap().stats().cloned().unwrap();

    assert_eq!(stats.transfers[0].files_deleted, Some(1));
    targets
        .child(format!("pages-1/{}/stale.html", paths[0]))
        .assert(predicate::path::missing());
    targets
        .child("pages-1/f/ff/ff/ff/999/index.html")
        .assert(predicate::str::contains("unrelated"));
}

fn assert_same_tree(expected: &Path, actual: &Path) {
    for entry in walkdir::WalkDir::new(expected) {
        let entry = entry.unwrap();
        let rel = entry.path().strip_prefix(expected).unwrap();
        let other = actual.join(rel);
        if entry.file_type().is_file() {
            assert_eq!(
                fs::read(entry.path()).unwrap(),
                fs::read(&other).unwrap(),
                "{}",
                rel.display()
            );
        }
    }
}

// =============================================================================
// Partition and chunking properties over varied route tables
// =============================================================================

#[test]
fn test_partition_union_matches_routed_entries() {
    let nodes = ["n1", "n2", "n3", "n4"];
    let mut response = String::new();
    for i in 0..300 {
        response.push_str(&content_path(i));
        // Deterministic mix of zero, one and several nodes, with repeats
        for k in 0..(i % 4) {
            response.push(' ');
            response.push_str(nodes[(i + k * 3) % nodes.len()]);
        }
        response.push('\n');
    }

    let table = RouteTable::parse(&response).unwrap();
    let partition = Partition::from_routes(&table);

    let expected: usize = table.entries().iter().map(|e| e.nodes.len()).sum();
    assert_eq!(partition.assignments(), expected);

    for (node, paths) in partition.iter() {
        let mut unique = paths.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), paths.len(), "duplicate path for {}", node);
        for path in paths {
            let entry = table.entries().iter().find(|e| &e.path == path).unwrap();
            assert!(entry.nodes.contains(node));
        }
    }

    let unplaced = table.unrouted();
    assert_eq!(unplaced, 75);
}

#[test]
fn test_chunk_count_law() {
    for n in [1usize, 999, 1000, 1001, 4321] {
        let lines: String = (0..n).map(|i| format!("{} n1\n", content_path(i))).collect();
        let table = RouteTable::parse(&lines).unwrap();
        let chunks = restore_pages::core::chunk_routes(&table, 1000);
        assert_eq!(chunks.len(), n.div_ceil(1000));
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), n);
        assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= 1000));
    }
}
