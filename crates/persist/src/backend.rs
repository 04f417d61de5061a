use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Errors from storage operations. All of these are recoverable by the
/// caller (free space, pick another key, treat a missing key as "no such
/// save"); none of them corrupts other stored keys.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store file encode error: {0}")]
    PackEncode(String),
    #[error("store file decode error: {0}")]
    PackDecode(String),
    #[error("store file version mismatch: file has v{found}, expected v{expected}")]
    PackVersionMismatch { found: u64, expected: u64 },
    #[error("invalid save key {0:?}: use ascii letters, digits, '-' and '_'")]
    InvalidKey(String),
    #[error("no save stored under key {0:?}")]
    UnknownKey(String),
    #[error("quota exceeded: save needs {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },
}

/// Metadata describing one stored save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub key: String,
    pub name: String,
    /// Unix seconds of the first save under this key.
    pub created_at: u64,
    /// Unix seconds of the most recent save under this key.
    pub last_saved_at: u64,
    pub size_bytes: u64,
}

/// Space accounting for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub used_bytes: u64,
    /// `None` when the backend has no enforced limit.
    pub available_bytes: Option<u64>,
    pub quota_exceeded: bool,
}

/// Abstract read/write/list/delete surface over named byte blobs.
///
/// Implementations must serialize concurrent saves to the same key and must
/// guarantee that a `load` observes the most recently completed `save` for
/// that key. They know nothing about simulation concepts; envelopes are
/// opaque bytes here.
pub trait StorageBackend {
    /// Persist bytes under a key, replacing any previous save atomically.
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Load the bytes for a key. A missing key is `Ok(None)`, not an error.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// All stored saves, most recently saved first.
    fn list(&self) -> Result<Vec<SaveMetadata>, StorageError>;

    /// Remove a save. Deleting an unknown key is an error.
    fn delete(&mut self, key: &str) -> Result<(), StorageError>;

    /// Metadata for one key, if present.
    fn metadata(&self, key: &str) -> Result<Option<SaveMetadata>, StorageError>;

    /// Used/available space.
    fn storage_info(&self) -> Result<StorageInfo, StorageError>;
}

/// Keys become file names; keep them to a portable charset.
pub(crate) fn check_key(key: &str) -> Result<(), StorageError> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

pub(crate) fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Write bytes to a sibling temp file, then atomically rename into place.
pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes)
}

/// Sort most recently saved first; ties break on key for determinism.
pub(crate) fn sort_most_recent_first(entries: &mut [SaveMetadata]) {
    entries.sort_by(|a, b| {
        b.last_saved_at
            .cmp(&a.last_saved_at)
            .then_with(|| a.key.cmp(&b.key))
    });
}
