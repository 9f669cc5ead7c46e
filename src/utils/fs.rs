//! Filesystem helpers shared by the file-backed stores.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Replace `path` with `contents` without ever exposing a partial file.
///
/// Writes to a temp file in the same directory, fsyncs, then renames over
/// the destination. Runs on the blocking pool.
pub async fn write_atomic(path: &Path, contents: Vec<u8>) -> io::Result<()> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

/// Remove a directory tree, treating "already gone" as success.
pub async fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
