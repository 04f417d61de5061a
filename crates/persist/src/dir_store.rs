//! Directory-backed storage for desktop environments.
//!
//! Layout inside the store directory:
//! ```text
//! <key>.save.cbor.zst  - opaque envelope bytes
//! <key>.meta.json      - save metadata sidecar
//! ```

use crate::backend::{
    SaveMetadata, StorageBackend, StorageError, StorageInfo, check_key, now_unix_seconds,
    sort_most_recent_first, write_bytes_atomic, write_json_atomic,
};
use std::path::{Path, PathBuf};

const DATA_SUFFIX: &str = ".save.cbor.zst";
const META_SUFFIX: &str = ".meta.json";

/// One file pair per key under a root directory.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open or create a store rooted at the given directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{DATA_SUFFIX}"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{META_SUFFIX}"))
    }

    fn read_meta(&self, key: &str) -> Result<Option<SaveMetadata>, StorageError> {
        let path = self.meta_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let meta = serde_json::from_reader(std::fs::File::open(&path)?)?;
        Ok(Some(meta))
    }
}

impl StorageBackend for DirStore {
    fn save(&mut self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        check_key(key)?;
        let now = now_unix_seconds();
        let created_at = self
            .read_meta(key)?
            .map(|m| m.created_at)
            .unwrap_or(now);

        // Data first, sidecar second: a crash between the two leaves a
        // loadable save with stale metadata, never the reverse.
        write_bytes_atomic(&self.data_path(key), bytes)?;
        write_json_atomic(
            &self.meta_path(key),
            &SaveMetadata {
                key: key.to_string(),
                name: key.to_string(),
                created_at,
                last_saved_at: now,
                size_bytes: bytes.len() as u64,
            },
        )?;
        tracing::debug!(key, bytes = bytes.len(), "saved to directory store");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        check_key(key)?;
        let path = self.data_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    fn list(&self) -> Result<Vec<SaveMetadata>, StorageError> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(key) = name.strip_suffix(META_SUFFIX) {
                if let Some(meta) = self.read_meta(key)? {
                    entries.push(meta);
                }
            }
        }
        sort_most_recent_first(&mut entries);
        Ok(entries)
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        check_key(key)?;
        let data = self.data_path(key);
        if !data.exists() {
            return Err(StorageError::UnknownKey(key.to_string()));
        }
        std::fs::remove_file(data)?;
        let meta = self.meta_path(key);
        if meta.exists() {
            std::fs::remove_file(meta)?;
        }
        tracing::debug!(key, "deleted from directory store");
        Ok(())
    }

    fn metadata(&self, key: &str) -> Result<Option<SaveMetadata>, StorageError> {
        check_key(key)?;
        self.read_meta(key)
    }

    fn storage_info(&self) -> Result<StorageInfo, StorageError> {
        let mut used = 0;
        for entry in std::fs::read_dir(&self.root)? {
            used += entry?.metadata()?.len();
        }
        Ok(StorageInfo {
            used_bytes: used,
            available_bytes: None,
            quota_exceeded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, DirStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path().join("saves")).unwrap();
        (tmp, store)
    }

    #[test]
    fn save_load_roundtrip() {
        let (_tmp, mut store) = store();
        store.save("slot-1", b"envelope bytes").unwrap();
        assert_eq!(store.load("slot-1").unwrap().unwrap(), b"envelope bytes");
    }

    #[test]
    fn missing_key_is_none_not_error() {
        let (_tmp, store) = store();
        assert!(store.load("nothing").unwrap().is_none());
        assert!(store.metadata("nothing").unwrap().is_none());
    }

    #[test]
    fn overwrite_preserves_created_at() {
        let (_tmp, mut store) = store();
        store.save("slot-1", b"first").unwrap();
        let first = store.metadata("slot-1").unwrap().unwrap();
        store.save("slot-1", b"second, longer payload").unwrap();
        let second = store.metadata("slot-1").unwrap().unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.size_bytes, b"second, longer payload".len() as u64);
        assert_eq!(store.load("slot-1").unwrap().unwrap(), b"second, longer payload");
    }

    #[test]
    fn list_orders_most_recent_first() {
        let (_tmp, mut store) = store();
        store.save("alpha", b"a").unwrap();
        store.save("beta", b"b").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        // Same-second saves tie-break on key.
        assert!(listed[0].last_saved_at >= listed[1].last_saved_at);
    }

    #[test]
    fn delete_removes_only_that_key() {
        let (_tmp, mut store) = store();
        store.save("keep", b"k").unwrap();
        store.save("drop", b"d").unwrap();

        store.delete("drop").unwrap();
        assert!(store.load("drop").unwrap().is_none());
        assert!(store.load("keep").unwrap().is_some());
        assert!(matches!(
            store.delete("drop"),
            Err(StorageError::UnknownKey(_))
        ));
    }

    #[test]
    fn invalid_keys_rejected() {
        let (_tmp, mut store) = store();
        assert!(matches!(
            store.save("../escape", b"x"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn no_stray_tmp_files_after_save() {
        let (_tmp, mut store) = store();
        store.save("slot-1", b"bytes").unwrap();
        let stray: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(stray.is_empty());
    }

    #[test]
    fn storage_info_accounts_for_files() {
        let (_tmp, mut store) = store();
        store.save("slot-1", b"0123456789").unwrap();
        let info = store.storage_info().unwrap();
        assert!(info.used_bytes >= 10);
        assert!(!info.quota_exceeded);
    }
}
