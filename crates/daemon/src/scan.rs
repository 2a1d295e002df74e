//! Scanner module for discovering segment files under the input directory.
//!
//! Segments are derived fresh from the filesystem on every pass; nothing is cached
//! between passes.

use crate::classify::classify_name;
use crate::segment::Segment;
use log::{debug, info, warn};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Error type for directory scans.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The directory to scan does not exist.
    #[error("Directory not found: {0}")]
    RootNotFound(PathBuf),

    /// The scan root could not be read at all.
    #[error("Failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Makes a path absolute against the working directory and removes `.`/`..` lexically.
///
/// The path does not need to exist.
pub fn absolute_clean(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// Lists every regular file under `root`, sorted by path.
///
/// When `exclude` names a directory strictly inside `root`, that subtree is skipped.
/// Unreadable entries below the root are logged and skipped; an unreadable root is
/// an error.
pub fn walk_files(root: &Path, exclude: Option<&Path>) -> Result<Vec<PathBuf>, ScanError> {
    let root = absolute_clean(root);
    if !root.exists() {
        return Err(ScanError::RootNotFound(root));
    }
    let exclude = exclude
        .map(absolute_clean)
        .filter(|excluded| *excluded != root);

    let walker = WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match &exclude {
            Some(excluded) if entry.file_type().is_dir() => entry.path() != excluded.as_path(),
            _ => true,
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(ScanError::Unreadable {
                    path: root.clone(),
                    source: e,
                })
            }
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

/// Source key of a file: its parent directory relative to `root`, `/`-separated.
///
/// Files directly in the root have an empty key.
pub fn source_key(root: &Path, file: &Path) -> String {
    file.parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

/// Collects every raw segment under `root`, skipping the merged output directory.
pub fn collect_raw_segments(root: &Path, out_dir: &Path) -> Result<Vec<Segment>, ScanError> {
    let root_abs = absolute_clean(root);
    let files = walk_files(&root_abs, Some(out_dir))?;

    let mut segments = Vec::new();
    for path in files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(times) = classify_name(name).into_raw() else {
            debug!("Ignoring non-segment file {}", path.display());
            continue;
        };
        segments.push(Segment {
            source_key: source_key(&root_abs, &path),
            path,
            start: times.start,
            end: times.end,
            extension: times.extension,
        });
    }

    info!(
        "Found {} raw segment(s) in {}",
        segments.len(),
        root_abs.display()
    );
    Ok(segments)
}
