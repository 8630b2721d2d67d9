/*!
 * Cluster finalize: commit the full route table in bounded chunks
 */

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info};

use super::interrupt::Interrupt;
use super::routes::RouteTable;
use super::RouteEntry;
use crate::error::{Phase, RestoreError, Result};
use crate::system::Finalizer;

/// Directory under local scratch holding chunk files
pub const FINALIZE_DIR: &str = "finalize";

/// A contiguous slice of the route table, written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeChunk {
    pub index: usize,
    /// Route lines in `file`
    pub entries: usize,
    pub file: PathBuf,
}

/// Split the table into `ceil(len / chunk_size)` slices of at most `chunk_size`
pub fn chunk_routes(table: &RouteTable, chunk_size: usize) -> Vec<&[RouteEntry]> {
    table.entries().chunks(chunk_size.max(1)).collect()
}

/// Write each chunk as a route list under `dir`
pub fn write_chunks(
    table: &RouteTable,
    chunk_size: usize,
    dir: &Path,
) -> Result<Vec<FinalizeChunk>> {
    fs::create_dir_all(dir)?;

    let mut chunks = Vec::new();
    for (index, slice) in chunk_routes(table, chunk_size).into_iter().enumerate() {
        let file = dir.join(format!("chunk-{:05}", index));
        let mut writer = BufWriter::new(File::create(&file)?);
        for entry in slice {
            writeln!(writer, "{}", entry.to_line())?;
        }
        writer.flush()?;
        chunks.push(FinalizeChunk {
            index,
            entries: slice.len(),
            file,
        });
    }
    Ok(chunks)
}

/// Finalize every chunk on a bounded worker pool
///
/// `jobs == 0` asks the finalizer how many invocations the head node can
/// run at once. No chunk starts once `interrupt` is set. Returns the number
/// of chunks committed.
pub fn finalize_routes(
    table: &RouteTable,
    finalizer: &dyn Finalizer,
    dir: &Path,
    chunk_size: usize,
    jobs: usize,
    interrupt: &Interrupt,
) -> Result<usize> {
    let chunks = write_chunks(table, chunk_size, dir)?;
    if chunks.is_empty() {
        return Ok(0);
    }

    let slots = if jobs == 0 { finalizer.slots()? } else { jobs };
    let workers = slots.clamp(1, chunks.len());

    info!(
        "Finalizing {} routes in {} chunks ({} at a time)",
        table.len(),
        chunks.len(),
        workers
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("finalize-{}", i))
        .build()
        .map_err(|e| RestoreError::Parallel(e.to_string()))?;

    pool.install(|| {
        chunks.par_iter().try_for_each(|chunk| {
            interrupt.check(Phase::Finalize)?;
            finalizer.finalize(chunk)?;
            debug!("Chunk {} finalized", chunk.index);
            Ok::<(), RestoreError>(())
        })
    })?;

    Ok(chunks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ContentPath, NodeId};
    use crate::testing::RecordingFinalizer;
    use tempfile::tempdir;

    fn table(n: usize) -> RouteTable {
        RouteTable::new(
            (0..n)
                .map(|i| {
                    RouteEntry::new(
                        ContentPath::new(format!("0/00/00/{:02}/{}", i % 100, i)),
                        vec![NodeId::new("n1")],
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_chunking_law() {
        for n in [0usize, 1, 999, 1000, 1001, 2500, 3000] {
            let t = table(n);
            let chunks = chunk_routes(&t, 1000);
            assert_eq!(chunks.len(), n.div_ceil(1000), "n = {}", n);
            assert!(chunks.iter().all(|c| c.len() <= 1000));
            let covered: Vec<&RouteEntry> = chunks.iter().flat_map(|c| c.iter()).collect();
            assert_eq!(covered.len(), n);
            assert!(covered.iter().zip(t.entries()).all(|(a, b)| *a == b));
        }
    }

    #[test]
    fn test_write_chunks_files() {
        let dir = tempdir().unwrap();
        let chunks = write_chunks(&table(2500), 1000, dir.path()).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(|c| c.entries).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);

        let last = fs::read_to_string(&chunks[2].file).unwrap();
        assert_eq!(last.lines().count(), 500);
        assert!(last.lines().all(|l| l.ends_with(" n1")));
    }

    #[test]
    fn test_finalize_bounded_by_jobs() {
        let dir = tempdir().unwrap();
        let finalizer = RecordingFinalizer::new(8);
        let committed = finalize_routes(
            &table(5000),
            &finalizer,
            dir.path(),
            1000,
            2,
            &Interrupt::new(),
        )
        .unwrap();

        assert_eq!(committed, 5);
        assert_eq!(finalizer.chunk_sizes().iter().sum::<usize>(), 5000);
        assert!(finalizer.max_in_flight() <= 2);
    }

    #[test]
    fn test_finalize_uses_remote_slots_when_auto() {
        let dir = tempdir().unwrap();
        let finalizer = RecordingFinalizer::new(1);
        finalize_routes(
            &table(3000),
            &finalizer,
            dir.path(),
            1000,
            0,
            &Interrupt::new(),
        )
        .unwrap();
        assert_eq!(finalizer.max_in_flight(), 1);
        assert_eq!(finalizer.slot_queries(), 1);
    }

    #[test]
    fn test_finalize_failure_propagates() {
        let dir = tempdir().unwrap();
        let finalizer = RecordingFinalizer::failing_on(1);
        let err = finalize_routes(
            &table(2500),
            &finalizer,
            dir.path(),
            1000,
            1,
            &Interrupt::new(),
        )
        .unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_interrupt_stops_remaining_chunks() {
        let dir = tempdir().unwrap();
        let finalizer = RecordingFinalizer::new(1);
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let err = finalize_routes(&table(2500), &finalizer, dir.path(), 1000, 1, &interrupt)
            .unwrap_err();
        assert!(matches!(err, RestoreError::Interrupted { phase: Phase::Finalize }));
        assert!(finalizer.chunk_sizes().is_empty());
    }

    #[test]
    fn test_empty_table_is_noop() {
        let dir = tempdir().unwrap();
        let finalizer = RecordingFinalizer::new(4);
        assert_eq!(
            finalize_routes(
                &RouteTable::default(),
                &finalizer,
                dir.path(),
                1000,
                0,
                &Interrupt::new()
            )
            .unwrap(),
            0
        );
        assert_eq!(finalizer.slot_queries(), 0);
    }
}
