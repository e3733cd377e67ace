//! Error types for the rotation engine

use std::io;
use std::path::{Path, PathBuf};

/// Errors raised by the rotation, compression and retention machinery
#[derive(Debug, thiserror::Error)]
pub enum RotateError {
    /// Invalid or contradictory policy, detected at construction
    #[error("invalid rotation config: {0}")]
    Config(String),

    /// Filesystem operation failed on a specific path
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Gzip stream failed; the partial archive is left on disk
    #[error("failed to compress {}: {source}", path.display())]
    Compression {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Archive glob could not be evaluated
    #[error("bad archive pattern {pattern}: {message}")]
    Pattern { pattern: String, message: String },

    /// Controller could not recover from a failed rotation
    #[error("log file unavailable: {0}")]
    Unavailable(String),

    /// Controller has been closed
    #[error("log file is closed")]
    Closed,
}

impl RotateError {
    pub(crate) fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        RotateError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<RotateError> for io::Error {
    fn from(err: RotateError) -> Self {
        match err {
            RotateError::Io { source, .. } | RotateError::Compression { source, .. } => source,
            RotateError::Closed => io::Error::new(io::ErrorKind::BrokenPipe, err.to_string()),
            other => io::Error::other(other.to_string()),
        }
    }
}

/// Categories of disk errors for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskErrorKind {
    /// Disk is full or quota exceeded
    DiskFull,
    /// Permission denied (read or write)
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// Other IO error
    Other,
}

/// Categorize an IO error so maintenance reports say something useful
pub fn categorize_io_error(e: &io::Error) -> DiskErrorKind {
    use io::ErrorKind;

    match e.kind() {
        ErrorKind::StorageFull | ErrorKind::WriteZero => DiskErrorKind::DiskFull,
        ErrorKind::PermissionDenied => DiskErrorKind::PermissionDenied,
        ErrorKind::NotFound => DiskErrorKind::NotFound,
        _ => {
            #[cfg(unix)]
            {
                if let Some(os_error) = e.raw_os_error() {
                    // ENOSPC = 28, EDQUOT = 122 (Linux) / 69 (macOS)
                    if os_error == 28 || os_error == 122 || os_error == 69 {
                        return DiskErrorKind::DiskFull;
                    }
                    // EACCES
                    if os_error == 13 {
                        return DiskErrorKind::PermissionDenied;
                    }
                }
            }
            DiskErrorKind::Other
        }
    }
}

impl RotateError {
    /// Disk error category, when this error wraps an IO failure
    pub fn disk_kind(&self) -> Option<DiskErrorKind> {
        match self {
            RotateError::Io { source, .. } | RotateError::Compression { source, .. } => {
                Some(categorize_io_error(source))
            }
            _ => None,
        }
    }
}
