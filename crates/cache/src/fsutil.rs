//! Filesystem primitives the store's crash-safety relies on
//!
//! Publication is built on atomic rename: outputs are renamed into place and
//! the marker is written via a temporary sibling file. Renames within one
//! filesystem are atomic; a cross-device move falls back to copy + fsync +
//! unlink of the source.

use crate::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Move `from` to `to`, replacing any existing file.
///
/// Uses `rename` when source and destination share a filesystem; otherwise
/// copies into a temporary sibling of `to`, syncs it, renames it into place
/// and removes the source.
///
/// # Errors
///
/// Returns [`Error::Io`] if the move fails.
pub fn atomic_move(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => copy_replace(from, to),
        Err(e) => Err(Error::io(e, to, "rename")),
    }
}

fn copy_replace(from: &Path, to: &Path) -> Result<()> {
    let tmp = sibling_temp_path(to)?;
    let copied = (|| -> io::Result<()> {
        let mut src = fs::File::open(from)?;
        let mut dst = fs::File::create(&tmp)?;
        io::copy(&mut src, &mut dst)?;
        dst.sync_all()
    })();
    if let Err(e) = copied {
        let _ = fs::remove_file(&tmp);
        return Err(Error::io(e, to, "copy"));
    }
    fs::rename(&tmp, to).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::io(e, to, "rename")
    })?;
    fs::remove_file(from).map_err(|e| Error::io(e, from, "remove"))
}

/// Write `content` to `path` atomically via a temporary sibling file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the write or the rename fails.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = sibling_temp_path(path)?;
    let written = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        io::Write::write_all(&mut file, content)?;
        file.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(Error::io(e, &tmp, "write"));
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::io(e, path, "rename")
    })
}

/// Set the last-modified time of `path`.
///
/// The store uses marker mtimes as its LRU signal, so both touching on a hit
/// and backdating in tests go through here.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be opened or updated.
pub fn set_mtime(path: &Path, when: SystemTime) -> Result<()> {
    let file = fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| Error::io(e, path, "open"))?;
    file.set_modified(when)
        .map_err(|e| Error::io(e, path, "set_modified"))
}

/// A temporary filename next to `path`, unique per process so concurrent
/// publishers of the same key cannot clobber each other's staging file.
fn sibling_temp_path(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::configuration("invalid file path: no parent directory"))?;
    let filename = path
        .file_name()
        .ok_or_else(|| Error::configuration("invalid file path: no file name"))?;
    Ok(parent.join(format!(
        ".{}.{}.tmp",
        filename.to_string_lossy(),
        std::process::id()
    )))
}
