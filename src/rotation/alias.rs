//! Stable alias (symlink) pointing at the active log file

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::RotateError;

/// Suffix of the temporary link created before the atomic rename
pub const TEMP_LINK_SUFFIX: &str = "_symlink";

/// Temporary link path used while swapping the alias
pub fn temp_link_path(alias: &Path) -> PathBuf {
    let mut name = OsString::from(alias.as_os_str());
    name.push(TEMP_LINK_SUFFIX);
    PathBuf::from(name)
}

/// Refuse to take over a regular file sitting at the alias path
pub fn ensure_replaceable(alias: &Path) -> Result<(), RotateError> {
    match fs::symlink_metadata(alias) {
        Ok(meta) if !meta.file_type().is_symlink() => Err(RotateError::Config(format!(
            "{} exists and is not a symlink",
            alias.display()
        ))),
        _ => Ok(()),
    }
}

/// Atomically point `alias` at `target`
///
/// A fresh link is created next to the alias and renamed over it, so readers
/// either see the old target or the new one. Targets in the alias's own
/// directory are linked by file name only.
pub fn repoint(alias: &Path, target: &Path) -> Result<(), RotateError> {
    let link_target = match (alias.parent(), target.parent(), target.file_name()) {
        (Some(a), Some(t), Some(name)) if a == t => PathBuf::from(name),
        _ => target.to_path_buf(),
    };

    let temp = temp_link_path(alias);
    match fs::remove_file(&temp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(RotateError::io("remove stale link", &temp, e)),
    }

    symlink(&link_target, &temp).map_err(|e| RotateError::io("create link", &temp, e))?;

    if let Err(e) = fs::rename(&temp, alias) {
        let _ = fs::remove_file(&temp);
        return Err(RotateError::io("rename link", alias, e));
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(original, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink(_original: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}
