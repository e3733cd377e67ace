//! Retention sweeps over rotated/archived log files
//!
//! A sweep lists the files matching a glob, works out which ones violate the
//! age/count policy and deletes them. Deleting is best effort: one stuck file
//! never stops the rest of the sweep.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::alias::TEMP_LINK_SUFFIX;
use super::policy::Retention;
use crate::error::RotateError;

/// Lock markers are never treated as archives
pub const LOCK_SUFFIX: &str = "_lock";

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Files selected for deletion
    pub selected: usize,
    /// Files actually removed
    pub deleted: usize,
    /// Files that could not be removed
    pub failed: usize,
}

/// Decide which files matching `pattern` should be deleted
///
/// Files younger than `max_age` are always kept. With a count limit,
/// symlinks are skipped and only the oldest entries beyond `max_count` are
/// returned. Paths in `protected` (active file, alias) are never returned.
/// The result is ordered oldest first.
pub fn plan(
    pattern: &str,
    retention: &Retention,
    protected: &[&Path],
) -> Result<Vec<PathBuf>, RotateError> {
    if retention.is_unlimited() {
        return Ok(Vec::new());
    }

    let cutoff = if retention.max_age.is_zero() {
        None
    } else {
        match SystemTime::now().checked_sub(retention.max_age) {
            Some(cutoff) => Some(cutoff),
            // Nothing on disk can be older than that
            None => return Ok(Vec::new()),
        }
    };

    let entries = glob::glob(pattern).map_err(|e| RotateError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut candidates = Vec::new();
    for path in entries.flatten() {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if name.ends_with(LOCK_SUFFIX) || name.ends_with(TEMP_LINK_SUFFIX) {
            continue;
        }
        if protected.iter().any(|p| *p == path.as_path()) {
            continue;
        }

        let Ok(metadata) = fs::metadata(&path) else {
            continue;
        };
        let Ok(link_metadata) = fs::symlink_metadata(&path) else {
            continue;
        };

        if let (Some(cutoff), Ok(modified)) = (cutoff, metadata.modified()) {
            if modified > cutoff {
                continue;
            }
        }

        if retention.max_count > 0 && link_metadata.file_type().is_symlink() {
            continue;
        }

        candidates.push(path);
    }

    candidates.sort();

    if retention.max_count > 0 {
        if candidates.len() <= retention.max_count {
            return Ok(Vec::new());
        }
        let excess = candidates.len() - retention.max_count;
        candidates.truncate(excess);
    }

    Ok(candidates)
}

/// Remove every path, counting successes and failures
pub fn unlink_all(paths: &[PathBuf]) -> SweepReport {
    let mut report = SweepReport {
        selected: paths.len(),
        ..SweepReport::default()
    };
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Could not remove archive");
                report.failed += 1;
            }
        }
    }
    report
}

/// Plan and delete in one pass
pub fn sweep(
    pattern: &str,
    retention: &Retention,
    protected: &[&Path],
) -> Result<SweepReport, RotateError> {
    let doomed = plan(pattern, retention, protected)?;
    Ok(unlink_all(&doomed))
}
