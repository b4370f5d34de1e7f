//! Crash-safe JSON files.
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! reader never sees a half-written agent definitions file.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{PersistenceError, Result};

/// Serializes `value` as pretty JSON and atomically replaces `path`.
///
/// Parent directories are created as needed.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|source| PersistenceError::DirectoryError {
        path: dir.to_path_buf(),
        source,
    })?;

    let write_err = |source: std::io::Error| PersistenceError::WriteError {
        path: path.to_path_buf(),
        source,
    };

    // Same directory keeps the rename on one filesystem
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    temp.write_all(json.as_bytes()).map_err(write_err)?;
    temp.flush().map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;

    Ok(())
}

/// Reads JSON from `path`, returning `None` if the file does not exist.
pub fn read_json_optional<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path).map_err(|source| PersistenceError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(serde_json::from_str(&data)?))
}
