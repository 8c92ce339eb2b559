//! Local filesystem primitives for the atomic write path:
//! write to `<final>.tmp` -> fsync -> rename over `<final>`.
//!
//! The rename is only atomic when source and destination share a filesystem, which
//! is why temp files are always siblings of their final path.

use crate::paths::tmp_sibling;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;

/// fsync an already written file by path.
pub fn fsync_path(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

/// fsync a directory so a rename inside it survives a crash. No-op off unix.
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}

/// Rename `src` over `dst`. Never falls back to copy: a cross-device copy would
/// expose a partially written `dst`.
pub fn rename_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    fs::rename(src, dst)?;
    if let Some(parent) = dst.parent() {
        if let Err(e) = fsync_dir(parent) {
            warn!(dir = %parent.display(), error = %e, "directory fsync failed after rename");
        }
    }
    Ok(())
}

/// Remove a temp file, logging instead of failing.
pub fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to clean up temp file"),
    }
}

/// Write a small payload (manifests, text artifacts) atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_sibling(path);
    let res = (|| {
        let mut fh = File::create(&tmp)?;
        fh.write_all(bytes)?;
        fh.flush()?;
        fh.sync_all()?;
        drop(fh);
        rename_atomic(&tmp, path)
    })();
    if res.is_err() {
        remove_quietly(&tmp);
    }
    res
}
