//! Filesystem helpers shared by the file-backed cache tiers.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::warn;

/// Remove a file, tolerating files left read-only by another process or user.
///
/// Returns `Ok(true)` when the file is gone afterwards, `Ok(false)` when it
/// did not exist in the first place.
pub fn remove_file_defensive(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            warn!(
                op = "fs::remove_file",
                path = %path.display(),
                error = %err,
                "Unlink failed; retrying after clearing read-only flag"
            );
        }
    }

    if !path.exists() {
        return Ok(true);
    }

    let metadata = fs::metadata(path)?;
    let mut permissions = metadata.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)?;
    fs::remove_file(path)?;
    Ok(true)
}

/// Remove a directory tree; a missing directory is not an error.
pub fn remove_dir_defensive(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            warn!(
                op = "fs::remove_dir_all",
                path = %path.display(),
                error = %err,
                "Directory removal failed; removing files one by one"
            );
            for entry in walkdir::WalkDir::new(path)
                .contents_first(true)
                .into_iter()
                .filter_map(Result::ok)
            {
                if entry.file_type().is_dir() {
                    let _ = fs::remove_dir(entry.path());
                } else {
                    remove_file_defensive(entry.path())?;
                }
            }
            if path.exists() {
                return Err(err);
            }
            Ok(())
        }
    }
}

/// Write `contents` to `path` through a sibling temporary file and a rename, so
/// readers never observe a partially written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}
