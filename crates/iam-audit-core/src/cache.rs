//! Advisory cache of per-compartment API results.
//!
//! Entries are keyed by `(compartment_id, resource kind)` and stored as JSON
//! [`CacheEntry`] documents. The cache is never authoritative: a missing,
//! unreadable or undecodable entry is a miss, and a failed write is reported
//! to the caller but does not stop the run.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::ResourceKind;

// =============================================================================
// Keys and Entries
// =============================================================================

/// Identifies one cached collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub compartment_id: String,
    pub kind: ResourceKind,
}

impl CacheKey {
    pub fn new(compartment_id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            compartment_id: compartment_id.into(),
            kind,
        }
    }

    /// File name used by [`FileCache`]. Characters outside `[A-Za-z0-9._-]`
    /// are replaced so OCIDs from any realm map to a single path segment.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.kind.as_str(), path_segment(&self.compartment_id))
    }
}

fn path_segment(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// On-disk representation of a cached collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    #[serde(with = "time::serde::rfc3339")]
    pub saved_at: OffsetDateTime,
    pub kind: ResourceKind,
    pub items: Vec<T>,
}

impl<T: Serialize> CacheEntry<T> {
    /// Serialize `items` as a fresh entry stamped with the current time.
    pub fn encode(kind: ResourceKind, items: &[T]) -> Result<Vec<u8>, serde_json::Error>
    where
        T: Clone,
    {
        serde_json::to_vec(&CacheEntry {
            saved_at: OffsetDateTime::now_utc(),
            kind,
            items: items.to_vec(),
        })
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    /// Decode an entry, rejecting one stored under a different kind.
    pub fn decode(kind: ResourceKind, bytes: &[u8]) -> Result<Self, String> {
        let entry: Self = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        if entry.kind != kind {
            return Err(format!(
                "entry holds {} but {} was requested",
                entry.kind, kind
            ));
        }
        Ok(entry)
    }
}

// =============================================================================
// Store Trait
// =============================================================================

/// Byte-level cache backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Stored bytes for `key`, or `None` on any kind of miss.
    async fn get(&self, key: &CacheKey) -> Option<Vec<u8>>;

    /// Store `bytes` under `key`, replacing any previous entry.
    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> std::io::Result<()>;
}

// =============================================================================
// File Cache
// =============================================================================

/// Cache stored as one JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<platform cache dir>/iam-audit`. OCIDs are globally unique, so
    /// tenancies can share it.
    #[must_use]
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("iam-audit"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

#[async_trait]
impl CacheStore for FileCache {
    async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        tokio::fs::read(self.path(key)).await.ok()
    }

    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(key);
        // Write then rename so a concurrent reader never sees half an entry.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await
    }
}

// =============================================================================
// Memory Cache
// =============================================================================

/// Process-local cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, Vec<u8>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> std::io::Result<()> {
        self.entries.insert(key.clone(), bytes);
        Ok(())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Cache activity for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries present but undecodable, counted as misses too.
    pub corrupt: u64,
    pub write_failures: u64,
}

/// Counters shared by concurrent fetch tasks.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    corrupt: AtomicU64,
    write_failures: AtomicU64,
}

impl CacheCounters {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn corrupt(&self) {
        self.corrupt.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            corrupt: self.corrupt.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}
