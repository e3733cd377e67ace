//! Gzip archiving of rotated log files

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use flate2::{Compression, GzBuilder};

use super::policy::ARCHIVE_EXTENSION;
use crate::error::RotateError;

/// `app.log` -> `app.log.gz`
pub fn archive_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

/// Compress `path` into `path.gz` and remove the source
///
/// The gzip header records the source's file name and modification time, and
/// the archive's own mtime is set to match so age-based retention counts from
/// the last write. On failure the partial archive stays on disk and the
/// source is untouched.
pub fn compress(path: &Path) -> Result<PathBuf, RotateError> {
    let source = File::open(path).map_err(|e| RotateError::io("open", path, e))?;
    let metadata = source
        .metadata()
        .map_err(|e| RotateError::io("stat", path, e))?;
    let modified = metadata.modified().ok();
    let mtime = modified
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| u32::try_from(d.as_secs()).ok())
        .unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let dest = archive_path(path);
    let out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&dest)
        .map_err(|e| RotateError::io("create", &dest, e))?;

    let stream_err = |source: io::Error| RotateError::Compression {
        path: path.to_path_buf(),
        source,
    };

    let mut encoder = GzBuilder::new()
        .filename(name)
        .mtime(mtime)
        .write(BufWriter::new(out), Compression::default());
    io::copy(&mut BufReader::new(source), &mut encoder).map_err(stream_err)?;
    let archive = encoder
        .finish()
        .map_err(stream_err)?
        .into_inner()
        .map_err(|e| stream_err(e.into_error()))?;

    if let Some(modified) = modified {
        let _ = archive.set_modified(modified);
    }
    drop(archive);

    fs::remove_file(path).map_err(|e| RotateError::io("remove", path, e))?;
    Ok(dest)
}
