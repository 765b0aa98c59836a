//! Temp-file + rename write discipline, used by every JSON sidecar file in
//! spec.md §6 (`sessions.json`, `telegram-offset.json`, `dnd-state.json`,
//! `last_exit.json`). Readers tolerate a missing or malformed file by
//! returning the caller-supplied default rather than erroring.

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CoreError, Result};

/// Serialize `value` to pretty JSON and write it to `path` atomically: write
/// to `<path>.tmp`, then rename over the target. A rename on the same
/// filesystem is atomic, so a crash mid-write never leaves a half-written
/// file at `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and deserialize JSON from `path`. A missing file or malformed
/// contents both fall back to `T::default()` rather than erroring — callers
/// represent absence as empty state, not as an I/O error.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => T::default(),
    }
}

/// Same as [`write_json_atomic`] but async, for call sites already on a
/// tokio executor (the daemon's hot paths).
pub async fn write_json_atomic_async<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(CoreError::Io)?;
    }
    let tmp = path.with_extension("tmp");
    let body = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&tmp, body).await.map_err(CoreError::Io)?;
    tokio::fs::rename(&tmp, path).await.map_err(CoreError::Io)?;
    Ok(())
}

/// Async counterpart to [`read_json_or_default`].
pub async fn read_json_or_default_async<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => T::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Doc {
        n: u32,
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &Doc { n: 7 }).unwrap();
        let back: Doc = read_json_or_default(&path);
        assert_eq!(back, Doc { n: 7 });
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let back: Doc = read_json_or_default(&path);
        assert_eq!(back, Doc::default());
    }

    #[test]
    fn malformed_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"not json").unwrap();
        let back: Doc = read_json_or_default(&path);
        assert_eq!(back, Doc::default());
    }
}
