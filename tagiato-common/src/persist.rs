//! Crash-safe file persistence
//!
//! Every durable file (state, geocode cache, settings) is written with the
//! copy-then-replace discipline: serialize, write a sibling temp file, fsync,
//! then rename over the target. A crash at any point leaves either the old
//! complete file or the new complete file on disk, never a torn one.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Temp file next to `target` (same directory, so rename stays atomic)
fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let file_name = target
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", target.display())))?;
    let temp_name = format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    );
    Ok(target.with_file_name(temp_name))
}

/// Atomically replace `target` with `contents`
pub async fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let temp_path = temp_path_for(target)?;
    let write_result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, target).await
    }
    .await;

    if let Err(e) = write_result {
        // Leave the previous target untouched; only the temp file is discarded
        let _ = tokio::fs::remove_file(&temp_path).await;
        tracing::warn!(
            target_file = %target.display(),
            error = %e,
            "Atomic write failed, previous file kept"
        );
        return Err(Error::Io(e));
    }

    tracing::trace!(target_file = %target.display(), bytes = contents.len(), "File replaced");
    Ok(())
}

/// Serialize `value` as pretty JSON and atomically replace `target`
pub async fn write_json_atomic<T: Serialize + ?Sized>(target: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(target, &json).await
}

/// Read and deserialize a JSON file; `Ok(None)` when it does not exist
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}
