//! Local key-value persistence
//!
//! Each key is stored as `<key>.json` in the data directory. Writes are
//! atomic (write to temp file, then rename) so a process killed mid-write
//! never leaves a half-written value behind.
//!
//! Keys:
//! - `last_modified` - sync watermark (float seconds)
//! - `first_sync_done` - set once any sync pass has completed
//! - `pushes` - cached push records, newest first
//! - `mirror_notifications` - active mirrored notifications, newest first
//! - `sent_messages` - pushes sent from this client, newest first

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::models::{MirrorNotification, PushRecord, SentPush};

pub const KEY_LAST_MODIFIED: &str = "last_modified";
pub const KEY_FIRST_SYNC_DONE: &str = "first_sync_done";
pub const KEY_PUSHES: &str = "pushes";
pub const KEY_MIRRORS: &str = "mirror_notifications";
pub const KEY_SENT: &str = "sent_messages";

/// Maximum cached pushes
pub const PUSH_CACHE_LIMIT: usize = 100;
/// Maximum remembered mirror notifications
pub const MIRROR_LIMIT: usize = 50;
/// Maximum remembered sent pushes
pub const SENT_LIMIT: usize = 100;

#[derive(Debug, Clone)]
enum Backend {
    Directory(PathBuf),
    Memory(Arc<Mutex<HashMap<String, String>>>),
}

/// Key-value store for local state
///
/// Clones share the same underlying storage.
#[derive(Debug, Clone)]
pub struct LocalStore {
    backend: Backend,
}

impl LocalStore {
    /// Store rooted at a directory (created on first write)
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Directory(dir.into()),
        }
    }

    /// Store that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// Read a value; `Ok(None)` if the key was never written
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let (raw, path) = match &self.backend {
            Backend::Directory(dir) => {
                let path = key_path(dir, key);
                if !path.exists() {
                    return Ok(None);
                }
                let raw = fs::read_to_string(&path).map_err(|source| StoreError::Read {
                    path: path.clone(),
                    source,
                })?;
                (raw, path)
            }
            Backend::Memory(map) => {
                let map = map.lock().unwrap_or_else(|e| e.into_inner());
                match map.get(key) {
                    Some(raw) => (raw.clone(), PathBuf::from(key)),
                    None => return Ok(None),
                }
            }
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path,
                details: e.to_string(),
            })
    }

    /// Write a value
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        match &self.backend {
            Backend::Directory(dir) => atomic_write(&key_path(dir, key), raw.as_bytes()),
            Backend::Memory(map) => {
                map.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key.to_string(), raw);
                Ok(())
            }
        }
    }

    /// Delete a value (missing keys are fine)
    pub fn remove(&self, key: &str) -> StoreResult<()> {
        match &self.backend {
            Backend::Directory(dir) => {
                let path = key_path(dir, key);
                match fs::remove_file(&path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(source) => Err(StoreError::Write { path, source }),
                }
            }
            Backend::Memory(map) => {
                map.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
                Ok(())
            }
        }
    }

    pub fn last_modified(&self) -> StoreResult<f64> {
        Ok(self.get(KEY_LAST_MODIFIED)?.unwrap_or(0.0))
    }

    pub fn set_last_modified(&self, value: f64) -> StoreResult<()> {
        self.set(KEY_LAST_MODIFIED, &value)
    }

    /// Whether a sync pass has ever completed, even an empty one
    pub fn first_sync_done(&self) -> StoreResult<bool> {
        Ok(self.get(KEY_FIRST_SYNC_DONE)?.unwrap_or(false))
    }

    pub fn set_first_sync_done(&self) -> StoreResult<()> {
        self.set(KEY_FIRST_SYNC_DONE, &true)
    }

    pub fn pushes(&self) -> StoreResult<Vec<PushRecord>> {
        Ok(self.get(KEY_PUSHES)?.unwrap_or_default())
    }

    pub fn set_pushes(&self, pushes: &[PushRecord]) -> StoreResult<()> {
        self.set(KEY_PUSHES, &pushes[..pushes.len().min(PUSH_CACHE_LIMIT)])
    }

    pub fn mirror_notifications(&self) -> StoreResult<Vec<MirrorNotification>> {
        Ok(self.get(KEY_MIRRORS)?.unwrap_or_default())
    }

    pub fn set_mirror_notifications(&self, mirrors: &[MirrorNotification]) -> StoreResult<()> {
        self.set(KEY_MIRRORS, &mirrors[..mirrors.len().min(MIRROR_LIMIT)])
    }

    pub fn sent_messages(&self) -> StoreResult<Vec<SentPush>> {
        Ok(self.get(KEY_SENT)?.unwrap_or_default())
    }

    /// Prepend a sent push, keeping the list capped
    pub fn record_sent(&self, sent: SentPush) -> StoreResult<()> {
        let mut list = self.sent_messages().unwrap_or_default();
        list.insert(0, sent);
        list.truncate(SENT_LIMIT);
        self.set(KEY_SENT, &list)
    }

    /// Forget all synced state (sign-out)
    pub fn clear(&self) -> StoreResult<()> {
        for key in [
            KEY_LAST_MODIFIED,
            KEY_FIRST_SYNC_DONE,
            KEY_PUSHES,
            KEY_MIRRORS,
            KEY_SENT,
        ] {
            self.remove(key)?;
        }
        Ok(())
    }
}

fn key_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.json", key))
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> StoreResult<()> {
    let write_err = |source: std::io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    // Temp file in the same directory so the rename stays on one filesystem
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path).map_err(write_err)?;
    file.write_all(data).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;

    fs::rename(&temp_path, path).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PushKind;
    use tempfile::TempDir;

    #[test]
    fn test_missing_keys_have_defaults() {
        let store = LocalStore::in_memory();
        assert_eq!(store.last_modified().unwrap(), 0.0);
        assert!(!store.first_sync_done().unwrap());
        assert!(store.pushes().unwrap().is_empty());
        assert!(store.mirror_notifications().unwrap().is_empty());
    }

    #[test]
    fn test_directory_persistence_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = LocalStore::open(temp_dir.path());
            store.set_last_modified(1412047948.5).unwrap();
            store
                .set_pushes(&[PushRecord::new("a", PushKind::Note, 1412047948.5)])
                .unwrap();
        }

        let store = LocalStore::open(temp_dir.path());
        assert_eq!(store.last_modified().unwrap(), 1412047948.5);
        assert_eq!(store.pushes().unwrap()[0].iden, "a");
        assert!(temp_dir.path().join("pushes.json").exists());
        assert!(!temp_dir.path().join("pushes.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("pushes.json"), "{not json").unwrap();

        let store = LocalStore::open(temp_dir.path());
        let err = store.pushes().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_push_list_is_capped() {
        let store = LocalStore::in_memory();
        let pushes: Vec<_> = (0..150)
            .map(|i| PushRecord::new(format!("p{i}"), PushKind::Note, i as f64))
            .collect();

        store.set_pushes(&pushes).unwrap();
        assert_eq!(store.pushes().unwrap().len(), PUSH_CACHE_LIMIT);
    }

    #[test]
    fn test_record_sent_prepends() {
        let store = LocalStore::in_memory();
        for i in 0..3 {
            store
                .record_sent(SentPush {
                    push: PushRecord::new(format!("s{i}"), PushKind::Note, i as f64),
                    is_sent: true,
                    sent_at: i,
                })
                .unwrap();
        }

        let sent = store.sent_messages().unwrap();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].push.iden, "s2");
        assert!(sent[0].is_sent);
    }

    #[test]
    fn test_clones_share_memory() {
        let store = LocalStore::in_memory();
        let clone = store.clone();
        store.set_last_modified(42.0).unwrap();
        assert_eq!(clone.last_modified().unwrap(), 42.0);
    }

    #[test]
    fn test_clear_removes_everything() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path());
        store.set_last_modified(10.0).unwrap();
        store.set_first_sync_done().unwrap();
        store.set_pushes(&[]).unwrap();

        store.clear().unwrap();
        assert_eq!(store.last_modified().unwrap(), 0.0);
        assert!(!store.first_sync_done().unwrap());
        assert!(!temp_dir.path().join("last_modified.json").exists());

        // Clearing twice is fine
        store.clear().unwrap();
    }
}
