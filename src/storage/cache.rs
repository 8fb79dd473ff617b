//! In-memory TTL caches.
//!
//! Both caches sit on a `moka` LRU with an entry-count bound. moka's own
//! expiry is global per cache, so every entry carries its own `expires_at`
//! and is checked on lookup; [`MetadataCache::sweep`] and
//! [`FileCache::sweep`] purge the rest periodically.
//!
//! A cached file is shared between the cache entry and every job that is
//! delivering it. It is deleted when the last of them lets go, so an entry
//! that is replaced or expires mid-upload never pulls the file away.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use url::Url;

use crate::core::error::AppResult;
use crate::core::types::MediaMode;
use crate::download::metadata::MediaMetadata;
use crate::download::scratch::ScratchFile;

/// Query parameters that only track where a link was shared from.
const TRACKING_PARAMS: &[&str] = &["si", "feature", "fbclid", "igshid", "igsh"];

/// Canonical form of a URL for cache keys: no fragment, no tracking params.
/// Hosts are already lowercased by `url`.
pub fn normalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&&**k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept.iter());
    }
    url.to_string()
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// File cache key: audio and video of one URL are different entries.
pub fn file_cache_key(url: &Url, mode: MediaMode) -> String {
    sha256_hex(&format!("{}|{}", normalize_url(url), mode.as_str()))
}

pub fn metadata_cache_key(url: &Url) -> String {
    sha256_hex(&normalize_url(url))
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Hit/miss counters and size of one cache, for /stats.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub name: &'static str,
    pub size: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Shared mechanics of both caches: per-entry TTL and hit/miss accounting.
struct TtlStore<V: Clone + Send + Sync + 'static> {
    name: &'static str,
    inner: Cache<String, CacheEntry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> TtlStore<V> {
    fn new(name: &'static str, inner: Cache<String, CacheEntry<V>>) -> Self {
        Self {
            name,
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the payload when present, not expired and accepted by `is_valid`.
    /// Rejected entries are removed.
    async fn lookup(&self, key: &str, is_valid: impl Fn(&V) -> bool) -> Option<V> {
        let found = match self.inner.get(key).await {
            Some(entry) if entry.is_expired(Instant::now()) => {
                self.inner.invalidate(key).await;
                None
            }
            Some(entry) if !is_valid(&entry.payload) => {
                log::debug!("{} cache: dropping invalid entry {}", self.name, key);
                self.inner.invalidate(key).await;
                None
            }
            Some(entry) => Some(entry.payload),
            None => None,
        };

        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    async fn insert(&self, key: String, payload: V, ttl: Duration) {
        let entry = CacheEntry {
            payload,
            expires_at: Instant::now() + ttl,
        };
        self.inner.insert(key, entry).await;
    }

    async fn sweep(&self, is_valid: impl Fn(&V) -> bool) -> usize {
        let now = Instant::now();
        let stale: Vec<Arc<String>> = self
            .inner
            .iter()
            .filter(|(_, entry)| entry.is_expired(now) || !is_valid(&entry.payload))
            .map(|(key, _)| key)
            .collect();

        for key in &stale {
            self.inner.invalidate(key.as_str()).await;
        }
        self.inner.run_pending_tasks().await;
        if !stale.is_empty() {
            log::debug!("{} cache: swept {} stale entries", self.name, stale.len());
        }
        stale.len()
    }

    async fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            name: self.name,
            size: self.inner.entry_count(),
            hits,
            misses,
            hit_rate,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataSnapshotEntry {
    key: String,
    expires_at: DateTime<Utc>,
    metadata: MediaMetadata,
}

/// Metadata cache with per-entry TTL.
///
/// Avoids a second probe of the same URL. Optionally saved to a JSON file
/// on shutdown and reloaded at startup.
pub struct MetadataCache {
    store: TtlStore<MediaMetadata>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self {
            store: TtlStore::new("metadata", inner),
            ttl,
        }
    }

    pub async fn lookup(&self, url: &Url) -> Option<MediaMetadata> {
        self.store.lookup(&metadata_cache_key(url), |_| true).await
    }

    /// Stores metadata with the default TTL. Entries without a title are not kept.
    pub async fn store(&self, url: &Url, metadata: MediaMetadata) {
        self.store_with_ttl(url, metadata, self.ttl).await;
    }

    pub async fn store_with_ttl(&self, url: &Url, metadata: MediaMetadata, ttl: Duration) {
        if metadata.title.trim().is_empty() {
            log::debug!("Not caching metadata without title for {}", url);
            return;
        }
        self.store.insert(metadata_cache_key(url), metadata, ttl).await;
    }

    /// Removes expired entries.
    pub async fn sweep(&self) -> usize {
        self.store.sweep(|_| true).await
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.stats().await
    }

    /// Writes live entries to `path` as JSON. Returns the number of saved entries.
    pub async fn save_to_file(&self, path: &Path) -> AppResult<usize> {
        let now = Instant::now();
        let wall_now = Utc::now();
        let entries: Vec<MetadataSnapshotEntry> = self
            .store
            .inner
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .filter_map(|(key, entry)| {
                let remaining = chrono::Duration::from_std(entry.expires_at - now).ok()?;
                Some(MetadataSnapshotEntry {
                    key: key.to_string(),
                    expires_at: wall_now + remaining,
                    metadata: entry.payload,
                })
            })
            .collect();

        let json = serde_json::to_vec_pretty(&entries)?;
        if let Some(parent) = path.parent() {
            fs_err::tokio::create_dir_all(parent).await?;
        }
        fs_err::tokio::write(path, json).await?;
        Ok(entries.len())
    }

    /// Loads entries saved by [`MetadataCache::save_to_file`], skipping expired ones.
    /// A missing file is not an error.
    pub async fn load_from_file(&self, path: &Path) -> AppResult<usize> {
        let raw = match fs_err::tokio::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let entries: Vec<MetadataSnapshotEntry> = serde_json::from_slice(&raw)?;

        let wall_now = Utc::now();
        let mut loaded = 0;
        for entry in entries {
            let Ok(remaining) = (entry.expires_at - wall_now).to_std() else {
                continue;
            };
            if remaining.is_zero() {
                continue;
            }
            self.store.insert(entry.key, entry.metadata, remaining).await;
            loaded += 1;
        }
        Ok(loaded)
    }
}

/// Owner of one file in the cache directory. Removes it on drop.
#[derive(Debug, PartialEq, Eq)]
struct StoredFile {
    path: PathBuf,
}

impl Drop for StoredFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Cached file removed: {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove cached file {}: {}", self.path.display(), e),
        }
    }
}

/// A finished download owned by the cache directory.
///
/// Clones share the file. It stays on disk while any clone is alive (the
/// cache entry, a job delivering it) and is removed when the last one drops.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFile {
    file: Arc<StoredFile>,
    pub size_bytes: u64,
    pub mode: MediaMode,
    pub metadata: MediaMetadata,
}

impl CachedFile {
    /// Takes ownership of the file at `path`. A path must be adopted only once.
    pub fn new(path: PathBuf, size_bytes: u64, mode: MediaMode, metadata: MediaMetadata) -> Self {
        Self {
            file: Arc::new(StoredFile { path }),
            size_bytes,
            mode,
            metadata,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    /// Number of live handles to the file, the cache entry included.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.file)
    }
}

/// Result cache: key → file in the cache directory.
///
/// An entry is only valid while its file exists. An entry leaving the cache
/// (expired, evicted, replaced, invalidated) releases its handle on the file;
/// the file goes once no running job holds it either.
pub struct FileCache {
    store: TtlStore<CachedFile>,
    dir: PathBuf,
    ttl: Duration,
}

impl FileCache {
    pub fn new(dir: PathBuf, max_entries: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(
                |_key: Arc<String>, entry: CacheEntry<CachedFile>, cause: RemovalCause| {
                    log::debug!(
                        "File cache entry released ({:?}): {} ({} holder(s) left)",
                        cause,
                        entry.payload.path().display(),
                        entry.payload.holders().saturating_sub(1)
                    );
                },
            )
            .build();
        Self {
            store: TtlStore::new("files", inner),
            dir,
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the cache directory and removes files left over from a previous run.
    pub async fn prepare_dir(&self) -> io::Result<usize> {
        fs_err::tokio::create_dir_all(&self.dir).await?;
        let mut removed = 0;
        let mut entries = fs_err::tokio::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                fs_err::tokio::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn lookup(&self, key: &str) -> Option<CachedFile> {
        self.store.lookup(key, |file| file.path().exists()).await
    }

    /// Stores an entry with the default TTL, replacing any previous one.
    pub async fn store(&self, key: &str, file: CachedFile) {
        self.store_with_ttl(key, file, self.ttl).await;
    }

    pub async fn store_with_ttl(&self, key: &str, file: CachedFile, ttl: Duration) {
        if let Some(existing) = self.store.inner.get(key).await {
            if Arc::ptr_eq(&existing.payload.file, &file.file) {
                log::debug!("File cache: {} already stored", file.path().display());
                return;
            }
        }
        self.store.insert(key.to_string(), file, ttl).await;
    }

    /// Moves a finished scratch file into the cache directory and stores it.
    pub async fn persist(
        &self,
        key: &str,
        job_id: &str,
        scratch: ScratchFile,
        mode: MediaMode,
        metadata: MediaMetadata,
    ) -> io::Result<CachedFile> {
        let extension = scratch.extension().unwrap_or_else(|| "bin".to_string());
        let dest = self.dir.join(format!("{}-{}.{}", key, job_id, extension));
        let size_bytes = scratch.size()?;
        let path = scratch.persist(&dest)?;

        let cached = CachedFile::new(path, size_bytes, mode, metadata);
        self.store(key, cached.clone()).await;
        Ok(cached)
    }

    /// Removes expired entries and entries whose file disappeared.
    pub async fn sweep(&self) -> usize {
        self.store.sweep(|file| file.path().exists()).await
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.stats().await
    }
}
