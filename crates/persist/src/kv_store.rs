//! Packed key-value storage for sandboxed environments.
//!
//! Everything lives in one store file (a CBOR map of key -> entry) that is
//! rewritten atomically on every mutation. An optional byte quota models the
//! storage limits such environments impose.

use crate::backend::{
    SaveMetadata, StorageBackend, StorageError, StorageInfo, check_key, now_unix_seconds,
    sort_most_recent_first, write_bytes_atomic,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const PACK_VERSION: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvEntry {
    meta: SaveMetadata,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PackFile {
    version: u64,
    entries: BTreeMap<String, KvEntry>,
}

/// Single-file key-value store with an optional quota.
pub struct KvStore {
    path: PathBuf,
    quota_bytes: Option<u64>,
    entries: BTreeMap<String, KvEntry>,
}

impl KvStore {
    /// Open or create a store at the given file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with_quota(path, None)
    }

    /// Open with a byte quota over the sum of stored payloads.
    pub fn open_with_quota(
        path: impl AsRef<Path>,
        quota_bytes: Option<u64>,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = if path.exists() {
            let bytes = std::fs::read(&path)?;
            let pack: PackFile = ciborium::from_reader(bytes.as_slice())
                .map_err(|e| StorageError::PackDecode(e.to_string()))?;
            if pack.version != PACK_VERSION {
                return Err(StorageError::PackVersionMismatch {
                    found: pack.version,
                    expected: PACK_VERSION,
                });
            }
            pack.entries
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            quota_bytes,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn used_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.bytes.len() as u64).sum()
    }

    fn persist(&self) -> Result<(), StorageError> {
        let pack = PackFile {
            version: PACK_VERSION,
            entries: self.entries.clone(),
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&pack, &mut buf)
            .map_err(|e| StorageError::PackEncode(e.to_string()))?;
        write_bytes_atomic(&self.path, &buf)
    }
}

impl StorageBackend for KvStore {
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        check_key(key)?;
        if let Some(quota) = self.quota_bytes {
            let existing = self
                .entries
                .get(key)
                .map(|e| e.bytes.len() as u64)
                .unwrap_or(0);
            let used_without = self.used_bytes() - existing;
            let needed = bytes.len() as u64;
            if used_without + needed > quota {
                return Err(StorageError::QuotaExceeded {
                    needed,
                    available: quota.saturating_sub(used_without),
                });
            }
        }
        let now = now_unix_seconds();
        let created_at = self
            .entries
            .get(key)
            .map(|e| e.meta.created_at)
            .unwrap_or(now);
        // Stage in memory, but only keep the change if the rewrite landed.
        let previous = self.entries.insert(
            key.to_string(),
            KvEntry {
                meta: SaveMetadata {
                    key: key.to_string(),
                    name: key.to_string(),
                    created_at,
                    last_saved_at: now,
                    size_bytes: bytes.len() as u64,
                },
                bytes: bytes.to_vec(),
            },
        );
        if let Err(e) = self.persist() {
            match previous {
                Some(entry) => {
                    self.entries.insert(key.to_string(), entry);
                }
                None => {
                    self.entries.remove(key);
                }
            }
            return Err(e);
        }
        tracing::debug!(key, bytes = bytes.len(), "saved to kv store");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        check_key(key)?;
        Ok(self.entries.get(key).map(|e| e.bytes.clone()))
    }

    fn list(&self) -> Result<Vec<SaveMetadata>, StorageError> {
        let mut entries: Vec<SaveMetadata> =
            self.entries.values().map(|e| e.meta.clone()).collect();
        sort_most_recent_first(&mut entries);
        Ok(entries)
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        check_key(key)?;
        let Some(previous) = self.entries.remove(key) else {
            return Err(StorageError::UnknownKey(key.to_string()));
        };
        if let Err(e) = self.persist() {
            self.entries.insert(key.to_string(), previous);
            return Err(e);
        }
        tracing::debug!(key, "deleted from kv store");
        Ok(())
    }

    fn metadata(&self, key: &str) -> Result<Option<SaveMetadata>, StorageError> {
        check_key(key)?;
        Ok(self.entries.get(key).map(|e| e.meta.clone()))
    }

    fn storage_info(&self) -> Result<StorageInfo, StorageError> {
        let used = self.used_bytes();
        let available = self.quota_bytes.map(|q| q.saturating_sub(used));
        Ok(StorageInfo {
            used_bytes: used,
            available_bytes: available,
            quota_exceeded: self.quota_bytes.is_some_and(|q| used >= q),
        })
    }
}
