//! Size-based rotation of channel log files.
//!
//! A file larger than the threshold is renamed to `<name>.<unix-millis>`.
//! Only the newest `max_files` rotated siblings are retained.

use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotate `path` if it is larger than `max_bytes`, then prune old siblings.
///
/// Returns the path of the rotated file when a rotation happened.
pub(crate) fn rotate_if_needed(
    path: &Path,
    max_bytes: u64,
    max_files: usize,
) -> io::Result<Option<PathBuf>> {
    let size = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    if size <= max_bytes {
        return Ok(None);
    }

    let rotated = next_rotated_path(path)?;
    fs::rename(path, &rotated)?;
    prune_rotated(path, max_files)?;

    Ok(Some(rotated))
}

/// Delete rotated siblings of `path`, oldest first, until at most
/// `max_files` remain.
fn prune_rotated(path: &Path, max_files: usize) -> io::Result<usize> {
    let mut rotated = rotated_siblings(path)?;
    if rotated.len() <= max_files {
        return Ok(0);
    }

    rotated.sort_by_key(|(stamp, _)| *stamp);
    let excess = rotated.len() - max_files;
    for (_, old) in rotated.iter().take(excess) {
        match fs::remove_file(old) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }

    Ok(excess)
}

/// Rotated files that belong to `path`, with their numeric suffix.
pub(crate) fn rotated_siblings(path: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    let (Some(dir), Some(base)) = (path.parent(), file_name(path)) else {
        return Ok(Vec::new());
    };
    let prefix = format!("{base}.");

    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(stamp) = name
            .strip_prefix(&prefix)
            .and_then(|suffix| suffix.parse::<u64>().ok())
        {
            found.push((stamp, entry.path()));
        }
    }

    Ok(found)
}

fn next_rotated_path(path: &Path) -> io::Result<PathBuf> {
    let base = file_name(path)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "log path has no file name"))?;

    // Two rotations inside the same millisecond must not overwrite each other.
    let mut stamp = Utc::now().timestamp_millis().max(0) as u64;
    loop {
        let candidate = path.with_file_name(format!("{base}.{stamp}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
        stamp += 1;
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_small_file_is_not_rotated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("success.log");
        fs::write(&path, "x\n").unwrap();

        assert!(rotate_if_needed(&path, 1024, 5).unwrap().is_none());
        assert!(path.exists());
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("error.log");

        assert!(rotate_if_needed(&path, 0, 5).unwrap().is_none());
    }

    #[test]
    fn test_oversized_file_gets_numeric_suffix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");
        fs::write(&path, "0123456789").unwrap();

        let rotated = rotate_if_needed(&path, 5, 5).unwrap().unwrap();

        assert!(!path.exists());
        assert!(rotated.exists());
        let suffix = rotated
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .strip_prefix("queue.log.")
            .unwrap()
            .to_string();
        assert!(suffix.parse::<u64>().is_ok());
    }

    #[test]
    fn test_prune_keeps_newest_rotations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("debug.log");
        for stamp in [100u64, 200, 300, 400] {
            fs::write(dir.path().join(format!("debug.log.{stamp}")), "old").unwrap();
        }
        // Unrelated files are never touched.
        fs::write(dir.path().join("debug.log.bak"), "keep").unwrap();
        fs::write(dir.path().join("error.log.50"), "keep").unwrap();

        let removed = prune_rotated(&path, 2).unwrap();

        assert_eq!(removed, 2);
        assert!(!dir.path().join("debug.log.100").exists());
        assert!(!dir.path().join("debug.log.200").exists());
        assert!(dir.path().join("debug.log.300").exists());
        assert!(dir.path().join("debug.log.400").exists());
        assert!(dir.path().join("debug.log.bak").exists());
        assert!(dir.path().join("error.log.50").exists());
    }

    #[test]
    fn test_repeated_rotation_respects_retention() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("success.log");

        for _ in 0..4 {
            fs::write(&path, "0123456789").unwrap();
            rotate_if_needed(&path, 1, 2).unwrap();
        }

        assert_eq!(rotated_siblings(&path).unwrap().len(), 2);
    }
}
