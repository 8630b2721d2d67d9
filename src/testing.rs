//! Test doubles for the restore capabilities
//!
//! - `StaticOracle`: answers every request with a canned response
//! - `RecordingTransferrer`: records which nodes were asked for which paths,
//!   and how many transfers overlapped on one address
//! - `LocalMirrorTransferrer`: really mirrors into local directories, one per node
//! - `RecordingFinalizer`: records chunks and the peak number in flight
//! - `LocalScratch`: remote scratch backed by a local temporary directory
//!
//! Each double can be told to fail so error paths can be driven end to end.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use filetime::FileTime;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::core::{FinalizeChunk, Interrupt, NodeId, ScratchSpace, TransferTask};
use crate::error::{Phase, RestoreError, Result};
use crate::system::{Finalizer, RemoteScratch, RouteOracle, TransferReport, Transferrer};

fn injected(phase: Phase, program: &str, target: &str) -> RestoreError {
    RestoreError::Subprocess {
        phase,
        program: program.to_string(),
        target: target.to_string(),
        status: Some(255),
        stderr: "ssh: connect to host: Connection refused".to_string(),
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::to_string)
        .collect())
}

/// Oracle returning the same response for every request
#[derive(Debug, Default)]
pub struct StaticOracle {
    response: String,
    fail: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<String>>>,
}

impl StaticOracle {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Default::default()
        }
    }

    /// Oracle whose transport always fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Paths submitted with the most recent request
    pub fn last_request(&self) -> Option<Vec<String>> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl RouteOracle for StaticOracle {
    fn resolve(&self, request: &Path, _scratch: &ScratchSpace) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(read_lines(request)?);
        if self.fail {
            return Err(injected(Phase::Resolve, "ssh", "oracle"));
        }
        Ok(self.response.clone())
    }
}

/// Transferrer that only records its calls
///
/// Each call holds its address for a few milliseconds so overlapping
/// transfers to one address show up in `max_in_flight_per_address`.
#[derive(Debug, Default)]
pub struct RecordingTransferrer {
    fail_node: Option<NodeId>,
    interrupt_after: Option<(NodeId, Interrupt)>,
    calls: Mutex<Vec<(NodeId, Vec<String>)>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_per_address: AtomicUsize,
}

impl RecordingTransferrer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail when asked to transfer to `node`
    pub fn failing_on(node: NodeId) -> Self {
        Self {
            fail_node: Some(node),
            ..Default::default()
        }
    }

    /// Trigger `interrupt` once the transfer to `node` completes
    pub fn interrupting_on(node: NodeId, interrupt: Interrupt) -> Self {
        Self {
            interrupt_after: Some((node, interrupt)),
            ..Default::default()
        }
    }

    /// Nodes in the order their transfers started
    pub fn nodes(&self) -> Vec<NodeId> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// File list contents passed with each call
    pub fn file_lists(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, paths)| paths.clone())
            .collect()
    }

    /// Peak number of simultaneous transfers against a single address
    pub fn max_in_flight_per_address(&self) -> usize {
        self.max_per_address.load(Ordering::SeqCst)
    }

    fn enter(&self, address: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(address.to_string()).or_insert(0);
        *count += 1;
        self.max_per_address.fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, address: &str) {
        if let Some(count) = self.in_flight.lock().unwrap().get_mut(address) {
            *count -= 1;
        }
    }
}

impl Transferrer for RecordingTransferrer {
    fn transfer(&self, task: &TransferTask) -> Result<TransferReport> {
        let paths = read_lines(&task.files_from)?;
        let count = paths.len() as u64;
        self.calls
            .lock()
            .unwrap()
            .push((task.target.node.clone(), paths));

        self.enter(&task.target.address);
        thread::sleep(Duration::from_millis(5));
        self.leave(&task.target.address);

        if self.fail_node.as_ref() == Some(&task.target.node) {
            return Err(injected(Phase::Transfer, "rsync", task.target.node.as_str()));
        }
        if let Some((node, interrupt)) = &self.interrupt_after {
            if node == &task.target.node {
                interrupt.trigger();
            }
        }
        Ok(TransferReport {
            files_transferred: Some(count),
            files_deleted: Some(0),
        })
    }
}

/// Mirrors each node's partition into `<root>/<node>/`
///
/// Files are compared by size and modification time and copied when they
/// differ; files under a listed path that are missing from the snapshot are
/// deleted. Nothing outside the listed paths is touched. Hard links are
/// copied as independent files.
#[derive(Debug)]
pub struct LocalMirrorTransferrer {
    root: PathBuf,
    fail_node: Option<NodeId>,
    calls: Mutex<Vec<NodeId>>,
}

impl LocalMirrorTransferrer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fail_node: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(root: impl Into<PathBuf>, node: NodeId) -> Self {
        Self {
            fail_node: Some(node),
            ..Self::new(root)
        }
    }

    /// Storage root of one node
    pub fn node_root(&self, node: &NodeId) -> PathBuf {
        self.root.join(node.as_str())
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transferrer for LocalMirrorTransferrer {
    fn transfer(&self, task: &TransferTask) -> Result<TransferReport> {
        self.calls.lock().unwrap().push(task.target.node.clone());
        if self.fail_node.as_ref() == Some(&task.target.node) {
            return Err(injected(Phase::Transfer, "rsync", task.target.node.as_str()));
        }

        let dest_root = self.node_root(&task.target.node);
        let mut report = TransferReport {
            files_transferred: Some(0),
            files_deleted: Some(0),
        };

        for path in read_lines(&task.files_from)? {
            let (copied, deleted) =
                mirror_dir(&task.source.join(&path), &dest_root.join(&path))?;
            report.files_transferred = report.files_transferred.map(|n| n + copied);
            report.files_deleted = report.files_deleted.map(|n| n + deleted);
        }
        Ok(report)
    }
}

fn mirror_dir(src: &Path, dst: &Path) -> Result<(u64, u64)> {
    let mut copied = 0;
    let mut deleted = 0;

    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if needs_copy(entry.path(), &target)? {
            fs::copy(entry.path(), &target)?;
            let mtime = FileTime::from_last_modification_time(&entry.metadata().map_err(io::Error::from)?);
            filetime::set_file_mtime(&target, mtime)?;
            copied += 1;
        }
    }

    for entry in WalkDir::new(dst).contents_first(true) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(dst)
            .map_err(|e| io::Error::other(e.to_string()))?;
        if src.join(rel).symlink_metadata().is_ok() {
            continue;
        }
        if entry.file_type().is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
            deleted += 1;
        }
    }

    Ok((copied, deleted))
}

fn needs_copy(src: &Path, dst: &Path) -> Result<bool> {
    let dst_meta = match fs::metadata(dst) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    let src_meta = fs::metadata(src)?;
    Ok(src_meta.len() != dst_meta.len()
        || FileTime::from_last_modification_time(&src_meta)
            != FileTime::from_last_modification_time(&dst_meta))
}

/// Finalizer recording chunk sizes and concurrency
#[derive(Debug, Default)]
pub struct RecordingFinalizer {
    slots: usize,
    fail_index: Option<usize>,
    chunks: Mutex<Vec<(usize, usize)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    slot_queries: AtomicUsize,
}

impl RecordingFinalizer {
    /// Finalizer reporting `slots` execution slots
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            ..Default::default()
        }
    }

    /// Fail on the chunk with this index
    pub fn failing_on(index: usize) -> Self {
        Self {
            slots: 1,
            fail_index: Some(index),
            ..Default::default()
        }
    }

    /// Line counts of finalized chunks, in chunk order
    pub fn chunk_sizes(&self) -> Vec<usize> {
        let mut chunks = self.chunks.lock().unwrap().clone();
        chunks.sort();
        chunks.into_iter().map(|(_, lines)| lines).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn slot_queries(&self) -> usize {
        self.slot_queries.load(Ordering::SeqCst)
    }
}

impl Finalizer for RecordingFinalizer {
    fn slots(&self) -> Result<usize> {
        self.slot_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.slots)
    }

    fn finalize(&self, chunk: &FinalizeChunk) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(5));
        let lines = read_lines(&chunk.file);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_index == Some(chunk.index) {
            return Err(injected(Phase::Finalize, "ssh", "head"));
        }
        self.chunks
            .lock()
            .unwrap()
            .push((chunk.index, lines?.len()));
        Ok(())
    }
}

/// Remote scratch stand-in creating directories under a local temp dir
#[derive(Debug)]
pub struct LocalScratch {
    base: TempDir,
    next: AtomicUsize,
    fail_create: bool,
    fail_remove: bool,
    created: Mutex<Vec<PathBuf>>,
    removed: Mutex<Vec<PathBuf>>,
}

impl LocalScratch {
    pub fn new() -> Self {
        Self::with_failures(false, false)
    }

    pub fn failing_create() -> Self {
        Self::with_failures(true, false)
    }

    pub fn failing_remove() -> Self {
        Self::with_failures(false, true)
    }

    fn with_failures(fail_create: bool, fail_remove: bool) -> Self {
        Self {
            base: TempDir::new().expect("create scratch base"),
            next: AtomicUsize::new(0),
            fail_create,
            fail_remove,
            created: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<PathBuf> {
        self.created.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<PathBuf> {
        self.removed.lock().unwrap().clone()
    }
}

impl Default for LocalScratch {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteScratch for LocalScratch {
    fn create(&self) -> Result<PathBuf> {
        if self.fail_create {
            return Err(injected(Phase::Scratch, "ssh", "head"));
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let dir = self.base.path().join(format!("restore-pages.{:06}", n));
        fs::create_dir(&dir)?;
        self.created.lock().unwrap().push(dir.clone());
        Ok(dir)
    }

    fn remove(&self, dir: &Path) -> Result<()> {
        if self.fail_remove {
            return Err(injected(Phase::Cleanup, "ssh", "head"));
        }
        fs::remove_dir_all(dir)?;
        self.removed.lock().unwrap().push(dir.to_path_buf());
        Ok(())
    }
}
