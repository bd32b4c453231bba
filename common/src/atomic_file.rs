//! Shared atomic-rewrite JSON file protocol used by the key-value indices and
//! the task state store: write to `<file>.tmp`, then rename over `<file>`.
//! Reads are tolerant: a missing or empty file yields the caller-supplied
//! default; a malformed file is backed up to `<file>.backup.<timestamp>` and
//! the caller also receives the default, rather than an error.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;

use crate::error::AppError;

pub async fn write_json_atomic<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = tmp_path_for(path);
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, &bytes).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Reads and parses `path` as JSON. Returns `default()` (never an error) when
/// the file is absent, empty, or unparseable; a malformed file is first
/// backed up next to itself.
pub async fn read_json_tolerant<T, F>(path: &Path, default: F) -> Result<T, AppError>
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(default()),
        Err(e) => return Err(AppError::Io(e)),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(default());
    }

    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => Ok(value),
        Err(_) => {
            backup_corrupt_file(path).await?;
            Ok(default())
        }
    }
}

async fn backup_corrupt_file(path: &Path) -> Result<(), AppError> {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.fZ");
    let backup_path = PathBuf::from(format!("{}.backup.{timestamp}", path.display()));
    match fs::rename(path, &backup_path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::Io(e)),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Default)]
    struct Sample {
        n: u32,
    }

    #[tokio::test]
    async fn round_trips_through_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_json_atomic(&path, &Sample { n: 7 }).await.unwrap();
        let read: Sample = read_json_tolerant(&path, Sample::default).await.unwrap();
        assert_eq!(read, Sample { n: 7 });
    }

    #[tokio::test]
    async fn missing_file_yields_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let read: Sample = read_json_tolerant(&path, Sample::default).await.unwrap();
        assert_eq!(read, Sample::default());
    }

    #[tokio::test]
    async fn corrupt_file_is_backed_up_and_default_returned() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        fs::write(&path, b"{ not json").await.unwrap();
        let read: Sample = read_json_tolerant(&path, Sample::default).await.unwrap();
        assert_eq!(read, Sample::default());

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        let mut saw_backup = false;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with("corrupt.json.backup.")
            {
                saw_backup = true;
            }
        }
        assert!(saw_backup);
    }
}
