//! Write-to-temp-then-rename helpers.
//!
//! Temp files start with `.` so directory scans skip them.

use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Replace `path` with `content` in one rename.
pub(crate) async fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "queue path has no parent"))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "queue path has no file name"))?;

    let tmp_name = format!(
        ".{}.tmp.{}",
        file_name,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );
    let tmp_path = dir.join(tmp_name);

    let write_result = async {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    Ok(())
}

/// True for names the queue scanner should look at.
pub(crate) fn is_entry_file(name: &str) -> bool {
    !name.starts_with('.') && name.ends_with(".json")
}
