//! File-Backed Durable Store
//!
//! One JSON document per entry under a root directory. File names are the
//! percent-encoded `platform:contentId` key, shortened with a SHA-256 digest
//! when the encoding gets too long for a file name. Each write lands in its
//! own temporary file that is then renamed over the target, so a crash never
//! leaves a half-written document behind. Writers to the same key are
//! serialized through a striped lock.

use crate::cache::storage::{DurableStore, StoredEntry};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Longest encoded key used verbatim as a file stem
const MAX_PLAIN_STEM: usize = 160;
/// Encoded prefix kept in front of the digest for long keys
const HASHED_STEM_PREFIX: usize = 64;
/// Number of write lock stripes
const LOCK_STRIPES: usize = 64;

// =============================================================================
// File Store Configuration
// =============================================================================

/// Configuration for the file store
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Root directory for entry documents
    pub root_path: PathBuf,
    /// Whether to fsync each document before renaming it into place
    pub sync_writes: bool,
}

impl FileStoreConfig {
    /// Config rooted at `root_path` with synced writes
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            sync_writes: true,
        }
    }
}

// =============================================================================
// File Store
// =============================================================================

/// Durable store persisting each entry as a JSON file
pub struct FileStore {
    /// Root directory
    root_path: PathBuf,
    /// Index of stored documents (key -> file path)
    index: RwLock<HashMap<String, PathBuf>>,
    /// Whether to sync writes
    sync_writes: bool,
    /// Per-key write serialization
    write_locks: Vec<Mutex<()>>,
    /// Suffix source for temporary file names
    temp_seq: AtomicU64,
}

impl FileStore {
    /// Open the store at `root_path`, creating the directory if needed
    pub async fn open(root_path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(FileStoreConfig::new(root_path)).await
    }

    /// Open the store with full config
    pub async fn with_config(config: FileStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.root_path).await?;

        let store = Self {
            root_path: config.root_path,
            index: RwLock::new(HashMap::new()),
            sync_writes: config.sync_writes,
            write_locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            temp_seq: AtomicU64::new(0),
        };

        store.rebuild_index().await?;
        Ok(store)
    }

    /// Root directory of this store
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Rebuild the index from the documents on disk
    ///
    /// Leftover temporary files and documents that fail to parse are removed.
    async fn rebuild_index(&self) -> Result<()> {
        let mut found = HashMap::new();
        let mut dir = fs::read_dir(&self.root_path).await?;

        while let Some(dirent) = dir.next_entry().await? {
            let path = dirent.path();
            let extension = path.extension().and_then(|e| e.to_str());

            match extension {
                Some(TEMP_EXTENSION) => {
                    debug!(path = %path.display(), "Removing interrupted write");
                    remove_quietly(&path).await;
                }
                Some(ENTRY_EXTENSION) => match read_entry(&path).await {
                    Some(entry) => {
                        found.insert(entry.storage_key(), path);
                    }
                    None => remove_quietly(&path).await,
                },
                _ => {}
            }
        }

        debug!(
            root = %self.root_path.display(),
            entries = found.len(),
            "Rebuilt durable index"
        );
        *self.index.write() = found;
        Ok(())
    }

    /// Path of the document for a key
    fn entry_path(&self, key: &str) -> PathBuf {
        self.root_path
            .join(format!("{}.{}", file_stem(key), ENTRY_EXTENSION))
    }

    /// Fresh temporary path next to `key`'s document
    fn temp_path(&self, key: &str) -> PathBuf {
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        self.root_path.join(format!(
            "{}.{}-{}.{}",
            file_stem(key),
            std::process::id(),
            seq,
            TEMP_EXTENSION
        ))
    }

    fn indexed_path(&self, key: &str) -> Option<PathBuf> {
        self.index.read().get(key).cloned()
    }

    /// Hold the write lock stripe for `key`
    async fn lock_key(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.write_locks.len();
        self.write_locks[stripe].lock().await
    }

    /// Write `entry` through a temporary file, caller holds the key's lock
    async fn write_entry(&self, key: String, entry: &StoredEntry) -> Result<()> {
        let path = self.entry_path(&key);
        let temp_path = self.temp_path(&key);
        let json = serde_json::to_vec(entry)?;

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&json).await?;
            if self.sync_writes {
                file.sync_all().await?;
            }
            drop(file);
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            remove_quietly(&temp_path).await;
            return Err(e.into());
        }

        self.index.write().insert(key, path);
        Ok(())
    }

    /// Remove `key`'s document, caller holds the key's lock
    async fn remove_entry(&self, key: &str) -> Result<bool> {
        let path = match self.index.write().remove(key) {
            Some(path) => path,
            None => return Ok(false),
        };

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Current document for `key`, dropping it when corrupt
    async fn read_current(&self, key: &str) -> Option<StoredEntry> {
        let path = self.indexed_path(key)?;
        let entry = read_entry(&path).await;
        if entry.is_none() {
            self.index.write().remove(key);
            remove_quietly(&path).await;
        }
        entry
    }
}

/// File stem for a key, digest-shortened past [`MAX_PLAIN_STEM`] bytes
fn file_stem(key: &str) -> String {
    let encoded = urlencoding::encode(key);
    if encoded.len() <= MAX_PLAIN_STEM {
        return encoded.into_owned();
    }
    // Encoded form is ASCII, any byte offset is a char boundary
    format!(
        "{}-{:x}",
        &encoded[..HASHED_STEM_PREFIX],
        Sha256::digest(key.as_bytes())
    )
}

/// Read and parse one document, `None` when missing or corrupt
async fn read_entry(path: &Path) -> Option<StoredEntry> {
    let json = match fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable durable entry");
            return None;
        }
    };

    match serde_json::from_str(&json) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt durable entry");
            None
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

#[async_trait]
impl DurableStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        let path = match self.indexed_path(key) {
            Some(path) => path,
            None => return Ok(None),
        };

        if let Some(entry) = read_entry(&path).await {
            return Ok(Some(entry));
        }

        // Corrupt or vanished, drop it so later reads miss cleanly. Re-read
        // under the lock since a writer may have replaced it meanwhile.
        let _guard = self.lock_key(key).await;
        Ok(self.read_current(key).await)
    }

    async fn put(&self, entry: StoredEntry) -> Result<()> {
        let key = entry.storage_key();
        let _guard = self.lock_key(&key).await;
        self.write_entry(key, &entry).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.lock_key(key).await;
        self.remove_entry(key).await
    }

    async fn record_access(
        &self,
        key: &str,
        cached_at: DateTime<Utc>,
        accessed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let _guard = self.lock_key(key).await;
        let mut entry = match self.read_current(key).await {
            Some(entry) if entry.is_version(cached_at) => entry,
            _ => return Ok(false),
        };
        entry.record_access(accessed_at);
        self.write_entry(key.to_string(), &entry).await?;
        Ok(true)
    }

    async fn delete_version(&self, key: &str, cached_at: DateTime<Utc>) -> Result<bool> {
        let _guard = self.lock_key(key).await;
        match self.read_current(key).await {
            Some(entry) if entry.is_version(cached_at) => self.remove_entry(key).await,
            _ => Ok(false),
        }
    }

    async fn list_all(&self) -> Result<Vec<StoredEntry>> {
        let paths: Vec<(String, PathBuf)> = self
            .index
            .read()
            .iter()
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect();

        let mut entries = Vec::with_capacity(paths.len());
        for (key, path) in paths {
            match read_entry(&path).await {
                Some(entry) => entries.push(entry),
                None => {
                    self.index.write().remove(&key);
                    remove_quietly(&path).await;
                }
            }
        }
        Ok(entries)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.index.read().len())
    }

    async fn clear(&self) -> Result<()> {
        let paths: Vec<PathBuf> = {
            let mut index = self.index.write();
            index.drain().map(|(_, p)| p).collect()
        };

        for path in paths {
            remove_quietly(&path).await;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        // Root directory must exist and be writable
        let marker = self.root_path.join(".health_check");
        match fs::write(&marker, b"ok").await {
            Ok(()) => {
                remove_quietly(&marker).await;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::test_support::stored_entry;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn test_store() -> (FileStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();
        (store, tmp)
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let (store, _tmp) = test_store().await;

        let entry = stored_entry("abc", Duration::from_secs(60));
        store.put(entry.clone()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let read = store.get("youtube:abc").await.unwrap().unwrap();
        assert_eq!(read, entry);

        assert!(store.delete("youtube:abc").await.unwrap());
        assert!(store.get("youtube:abc").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_names_are_encoded() {
        let (store, tmp) = test_store().await;

        let mut entry = stored_entry("x", Duration::from_secs(60));
        entry.key.content_id = "vod/1?t=2".into();
        store.put(entry).await.unwrap();

        let expected = tmp.path().join("youtube%3Avod%2F1%3Ft%3D2.json");
        assert!(expected.exists());
        assert!(store.get("youtube:vod/1?t=2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_long_keys_are_digested() {
        let (store, tmp) = test_store().await;

        let mut entry = stored_entry("x", Duration::from_secs(60));
        entry.key.content_id = "%/?".repeat(200);
        let key = entry.storage_key();
        store.put(entry.clone()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|d| d.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].len() < 255);
        assert!(names[0].ends_with(".json"));

        assert_eq!(store.get(&key).await.unwrap().unwrap(), entry);
        assert!(store.delete(&key).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_same_key() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(tmp.path()).await.unwrap());

        for round in 0..20u64 {
            let mut writers = Vec::new();
            for writer in 0..4u64 {
                let store = Arc::clone(&store);
                let mut entry = stored_entry("abc", Duration::from_secs(60));
                entry.access_count = round * 10 + writer;
                writers.push(tokio::spawn(async move { store.put(entry).await }));
            }
            for writer in writers {
                writer.await.unwrap().unwrap();
            }
        }

        let entry = store.get("youtube:abc").await.unwrap().unwrap();
        assert!(entry.access_count >= 190);
        assert_eq!(store.count().await.unwrap(), 1);

        let leftovers = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter(|d| d.as_ref().unwrap().path().extension().and_then(|e| e.to_str()) == Some("tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_versioned_updates_on_disk() {
        let (store, _tmp) = test_store().await;
        let old = stored_entry("abc", Duration::from_secs(60));
        store.put(old.clone()).await.unwrap();

        assert!(store
            .record_access("youtube:abc", old.cached_at, old.cached_at)
            .await
            .unwrap());
        assert_eq!(store.get("youtube:abc").await.unwrap().unwrap().access_count, 1);

        let mut fresh = stored_entry("abc", Duration::from_secs(60));
        fresh.cached_at = old.cached_at + chrono::Duration::seconds(1);
        store.put(fresh.clone()).await.unwrap();

        assert!(!store
            .record_access("youtube:abc", old.cached_at, fresh.cached_at)
            .await
            .unwrap());
        assert!(!store.delete_version("youtube:abc", old.cached_at).await.unwrap());
        assert_eq!(store.get("youtube:abc").await.unwrap().unwrap(), fresh);

        assert!(store.delete_version("youtube:abc", fresh.cached_at).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistence() {
        let tmp = TempDir::new().unwrap();

        {
            let store = FileStore::open(tmp.path()).await.unwrap();
            store
                .put(stored_entry("persistent", Duration::from_secs(600)))
                .await
                .unwrap();
        }

        {
            let store = FileStore::open(tmp.path()).await.unwrap();
            assert_eq!(store.count().await.unwrap(), 1);
            let entry = store.get("youtube:persistent").await.unwrap().unwrap();
            assert_eq!(entry.key.content_id, "persistent");
        }
    }

    #[tokio::test]
    async fn test_corrupt_documents_removed_on_open() {
        let tmp = TempDir::new().unwrap();
        let corrupt = tmp.path().join("youtube%3Abroken.json");
        let partial = tmp.path().join("youtube%3Ahalf.tmp");
        std::fs::write(&corrupt, b"{not json").unwrap();
        std::fs::write(&partial, b"{\"key\":").unwrap();

        let store = FileStore::open(tmp.path()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(!corrupt.exists());
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_corrupt_document_reads_as_miss() {
        let (store, tmp) = test_store().await;
        store
            .put(stored_entry("abc", Duration::from_secs(60)))
            .await
            .unwrap();

        std::fs::write(tmp.path().join("youtube%3Aabc.json"), b"garbage").unwrap();

        assert!(store.get("youtube:abc").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_all_and_clear() {
        let (store, _tmp) = test_store().await;

        for id in ["a", "b", "c"] {
            store
                .put(stored_entry(id, Duration::from_secs(60)))
                .await
                .unwrap();
        }

        let mut ids: Vec<String> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key.content_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.health_check().await.unwrap());
    }
}
