/*!
 * Snapshot path enumeration
 *
 * Content items live at a fixed depth below the snapshot's `pages/`
 * directory; the relative path of each leaf-depth entry is its identifier.
 */

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path};

use tracing::{debug, info};
use walkdir::WalkDir;

use super::ContentPath;
use crate::config::{RestoreConfig, PAGES_DEPTH};
use crate::error::{RestoreError, Result};

/// Enumerate the content paths of the configured snapshot
///
/// A missing snapshot root is a configuration error. A snapshot without a
/// `pages/` directory has nothing to restore and yields an empty list.
pub fn enumerate_snapshot(config: &RestoreConfig) -> Result<Vec<ContentPath>> {
    let snapshot_dir = config.snapshot_dir();
    if !snapshot_dir.is_dir() {
        return Err(RestoreError::SnapshotNotFound(snapshot_dir));
    }

    let pages_dir = config.pages_dir();
    if !pages_dir.is_dir() {
        info!("Snapshot {} has no pages directory", snapshot_dir.display());
        return Ok(Vec::new());
    }

    enumerate_content_paths(&pages_dir, PAGES_DEPTH)
}

/// Collect every entry exactly `depth` levels below `root`, in sorted order
pub fn enumerate_content_paths(root: &Path, depth: usize) -> Result<Vec<ContentPath>> {
    let mut paths = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(depth)
        .max_depth(depth)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::other(e.to_string()))?;
        paths.push(to_content_path(relative)?);
    }

    // Sorted walk never yields the same entry twice
    debug_assert!(paths.windows(2).all(|w| w[0] < w[1]));
    debug!("Enumerated {} content paths under {}", paths.len(), root.display());

    Ok(paths)
}

fn to_content_path(relative: &Path) -> Result<ContentPath> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => {
                let segment = segment.to_str().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("non UTF-8 content path: {}", relative.display()),
                    )
                })?;
                segments.push(segment);
            }
            _ => {
                return Err(RestoreError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected component in {}", relative.display()),
                )))
            }
        }
    }
    Ok(ContentPath::new(segments.join("/")))
}

/// Write paths one per line, the route oracle's request format
pub fn write_path_list(paths: &[ContentPath], file: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(file)?);
    for path in paths {
        writeln!(writer, "{}", path)?;
    }
    writer.flush()?;
    Ok(())
}
