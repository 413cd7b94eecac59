//! Key-value persistence for the fetched list.
//!
//! Mirrors the browser's local storage area: an async `get` of named keys and
//! an async `set` of several keys in one call. [`ListCache`] layers the
//! `podUsers` / `lastUpdate` record on top of any [`KeyValueStore`].

use crate::record::{CacheRecord, EntryList};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Key holding the entry list.
pub const ENTRIES_KEY: &str = "podUsers";
/// Key holding the last successful fetch time (epoch milliseconds).
pub const LAST_UPDATE_KEY: &str = "lastUpdate";

/// Async key-value interface backing the cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the subset of `keys` that are present.
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError>;

    /// Writes every item in one step; readers see all of them or none.
    async fn set(&self, items: Map<String, Value>) -> Result<(), StorageError>;
}

/// Volatile store used by tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let items = self.items.lock().await;
        Ok(pick(&items, keys))
    }

    async fn set(&self, items: Map<String, Value>) -> Result<(), StorageError> {
        let mut stored = self.items.lock().await;
        stored.extend(items);
        Ok(())
    }
}

/// Store persisted as one JSON object on disk.
///
/// Writes go to a sibling temp file which is then renamed over the target, so
/// a crash mid-write never leaves a truncated cache behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Opens (lazily) the store at `path`. A missing file reads as empty.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(StorageError::io(&self.path, err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let items = self.read_all().await?;
        Ok(pick(&items, keys))
    }

    async fn set(&self, items: Map<String, Value>) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut stored = self.read_all().await?;
        stored.extend(items);

        let encoded = serde_json::to_vec_pretty(&stored).map_err(StorageError::Encode)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::io(parent, err))?;
        }
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, &encoded)
            .await
            .map_err(|err| StorageError::io(&staging, err))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|err| StorageError::io(&self.path, err))
    }
}

fn pick(items: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|key| items.get(*key).map(|value| (key.to_string(), value.clone())))
        .collect()
}

/// Typed view over the two cache fields.
#[derive(Clone)]
pub struct ListCache {
    store: Arc<dyn KeyValueStore>,
}

impl ListCache {
    /// Wraps a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Cache backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Loads the full record; `None` until both fields have been written.
    pub async fn load(&self) -> Result<Option<CacheRecord>, StorageError> {
        let items = self.store.get(&[ENTRIES_KEY, LAST_UPDATE_KEY]).await?;
        let entries = decode_entries(&items)?;
        let fetched_at = decode_last_update(&items)?;
        Ok(entries
            .zip(fetched_at)
            .map(|(entries, fetched_at)| CacheRecord::new(entries, fetched_at)))
    }

    /// Loads only the entry list.
    pub async fn load_entries(&self) -> Result<Option<EntryList>, StorageError> {
        let items = self.store.get(&[ENTRIES_KEY]).await?;
        decode_entries(&items)
    }

    /// Loads only the last successful fetch time.
    pub async fn last_update(&self) -> Result<Option<u64>, StorageError> {
        let items = self.store.get(&[LAST_UPDATE_KEY]).await?;
        decode_last_update(&items)
    }

    /// Overwrites both fields in a single `set`.
    pub async fn store(&self, record: &CacheRecord) -> Result<(), StorageError> {
        let mut items = Map::new();
        items.insert(
            ENTRIES_KEY.to_string(),
            serde_json::to_value(&record.entries).map_err(StorageError::Encode)?,
        );
        items.insert(
            LAST_UPDATE_KEY.to_string(),
            Value::from(record.fetched_at_epoch_ms),
        );
        self.store.set(items).await
    }
}

impl fmt::Debug for ListCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListCache").finish_non_exhaustive()
    }
}

fn decode_entries(items: &Map<String, Value>) -> Result<Option<EntryList>, StorageError> {
    items
        .get(ENTRIES_KEY)
        .map(|value| serde_json::from_value(value.clone()).map_err(StorageError::Decode))
        .transpose()
}

fn decode_last_update(items: &Map<String, Value>) -> Result<Option<u64>, StorageError> {
    items
        .get(LAST_UPDATE_KEY)
        .map(|value| serde_json::from_value(value.clone()).map_err(StorageError::Decode))
        .transpose()
}

/// Errors surfaced while reading or writing the cache.
#[derive(Debug)]
pub enum StorageError {
    /// Filesystem access failed.
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },
    /// The backing file is not a JSON object.
    Corrupt {
        /// File being parsed.
        path: PathBuf,
        /// Parser failure.
        source: serde_json::Error,
    },
    /// A stored field has an unexpected shape.
    Decode(serde_json::Error),
    /// A value could not be serialized.
    Encode(serde_json::Error),
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cache i/o error on {}: {source}", path.display())
            }
            Self::Corrupt { path, source } => {
                write!(f, "cache file {} is corrupt: {source}", path.display())
            }
            Self::Decode(err) => write!(f, "cached value has unexpected shape: {err}"),
            Self::Encode(err) => write!(f, "failed to encode cache value: {err}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Corrupt { source, .. } => Some(source),
            Self::Decode(err) | Self::Encode(err) => Some(err),
        }
    }
}
