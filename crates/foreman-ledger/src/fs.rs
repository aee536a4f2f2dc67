//! Atomic filesystem primitives for Ledger artifacts.
//!
//! Every artifact write goes temp-then-rename in the target's own
//! directory, so a crash mid-write never leaves a half-written artifact.
//! Readers treat a missing or malformed artifact as uninitialized rather
//! than aborting the Ledger; write failures always propagate.

use foreman_core::ForemanResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Atomically writes bytes to `path`.
///
/// The content lands in a `.{name}.tmp` sibling first, is synced to disk,
/// then renamed over the target. Source and target share a directory, so
/// the rename is atomic on POSIX filesystems.
pub async fn atomic_write(path: &Path, content: &[u8]) -> ForemanResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    let mut file = File::create(&tmp).await?;
    if let Err(e) = file.write_all(content).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = file.sync_all().await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Atomically writes a value as pretty-printed JSON.
pub async fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> ForemanResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes()).await
}

/// Reads and parses a JSON artifact.
///
/// A missing file is `None`. A malformed file is logged and also `None`;
/// the Ledger recovers by reinitializing that artifact on the next write.
pub async fn read_json_opt<T: DeserializeOwned>(path: &Path) -> ForemanResult<Option<T>> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&data) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed ledger artifact, treating as uninitialized");
            Ok(None)
        }
    }
}

/// Reads a text artifact; missing file is `None`.
pub async fn read_string_opt(path: &Path) -> ForemanResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Appends one line to an append-only log and syncs it.
///
/// Append-only partitions are the one place the temp-rename discipline
/// does not apply; a crash can at worst truncate the final line, which
/// readers skip.
pub async fn append_line(path: &Path, line: &str) -> ForemanResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.sync_all().await?;
    Ok(())
}

fn temp_path(target: &Path) -> PathBuf {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    parent.join(format!(".{name}.tmp"))
}
