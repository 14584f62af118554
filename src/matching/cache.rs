//! Vector caching — embeddings are costly and rate-limited upstream, so
//! every retrieved vector is cached by its raw text.
//!
//! The cache contract is deliberately dumb: opaque string values, optional
//! TTL, no transactions. Two implementations: [`InMemoryCache`] for
//! single-run use and tests, and [`DiskCache`] for persistence across runs.
//!
//! ## LRU eviction
//!
//! When the disk cache exceeds `max_entries`, expired entries are evicted
//! first, then the least-recently-accessed entry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fnv::FnvHasher;
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use super::embedding::Embedder;

/// Default maximum number of cached vectors before LRU eviction.
const DEFAULT_MAX_ENTRIES: usize = 4096;

/// Key/value store with optional TTL. Values are opaque strings.
#[async_trait]
pub trait VectorCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>);
    async fn delete(&self, key: &str);
}

// ── In-memory backend ───────────────────────────────────────────────────────

struct MemEntry {
    value: String,
    // tokio's clock, so TTL behaves under paused test time.
    expires_at: Option<tokio::time::Instant>,
}

/// Process-local cache. No persistence, no size bound — a run touches a few
/// hundred distinct field names at most.
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, MemEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorCache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("cache lock");
        match entries.get(key) {
            Some(entry) => {
                if entry
                    .expires_at
                    .is_some_and(|at| tokio::time::Instant::now() >= at)
                {
                    entries.remove(key);
                    None
                } else {
                    Some(entry.value.clone())
                }
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let entry = MemEntry {
            value,
            expires_at: ttl.map(|t| tokio::time::Instant::now() + t),
        };
        self.entries
            .lock()
            .expect("cache lock")
            .insert(key.to_string(), entry);
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().expect("cache lock").remove(key);
    }
}

// ── Disk backend ────────────────────────────────────────────────────────────

struct DiskEntry {
    path: PathBuf,
    cached_at: SystemTime,
    ttl: Duration,
    last_accessed: std::time::Instant,
}

impl DiskEntry {
    fn is_expired(&self) -> bool {
        SystemTime::now()
            .duration_since(self.cached_at)
            .map(|elapsed| elapsed > self.ttl)
            .unwrap_or(true)
    }
}

struct DiskIndex {
    entries: HashMap<String, DiskEntry>,
}

/// Filesystem-backed cache: one file per key, TTL plus LRU eviction.
///
/// The persistent stand-in for a networked cache backend — same contract,
/// survives restarts, needs no running service.
pub struct DiskCache {
    cache_dir: PathBuf,
    index: Mutex<DiskIndex>,
    default_ttl: Duration,
    max_entries: usize,
}

impl DiskCache {
    /// Create a disk cache in `cache_dir`.
    ///
    /// Existing `.vec` files are re-indexed on creation (their mtime becomes
    /// `cached_at`), so vectors cached by earlier runs are immediately
    /// available.
    pub fn new(cache_dir: PathBuf, default_ttl: Duration) -> Result<Self> {
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

        let mut entries = HashMap::new();
        if let Ok(dir) = fs::read_dir(&cache_dir) {
            for entry in dir.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("vec") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let cached_at = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or_else(|_| SystemTime::now());
                entries.insert(
                    stem.to_string(),
                    DiskEntry {
                        path,
                        cached_at,
                        ttl: default_ttl,
                        last_accessed: std::time::Instant::now(),
                    },
                );
            }
        }

        tracing::debug!(
            "DiskCache initialized: {} entries from {}",
            entries.len(),
            cache_dir.display()
        );

        Ok(Self {
            cache_dir,
            index: Mutex::new(DiskIndex { entries }),
            default_ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
        })
    }

    /// Create a cache with default settings (`~/.formrelay/vectors/`, 30 days).
    pub fn default_cache() -> Result<Self> {
        let cache_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".formrelay")
            .join("vectors");
        Self::new(cache_dir, Duration::from_secs(30 * 24 * 3600))
    }

    #[cfg(test)]
    fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Stable on-disk name for a key. Keys hold arbitrary text (including
    /// unicode field names), so the filename is a hash, not the key itself.
    fn file_key(key: &str) -> String {
        let mut hasher = FnvHasher::default();
        key.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    fn evict_lru(index: &mut DiskIndex) {
        let expired: Vec<String> = index
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        if !expired.is_empty() {
            for key in expired {
                if let Some(entry) = index.entries.remove(&key) {
                    let _ = fs::remove_file(&entry.path);
                }
            }
            return;
        }

        if let Some(lru) = index
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(k, _)| k.clone())
        {
            tracing::debug!("evicting LRU vector cache entry {lru}");
            if let Some(entry) = index.entries.remove(&lru) {
                let _ = fs::remove_file(&entry.path);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.index.lock().expect("cache lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorCache for DiskCache {
    async fn get(&self, key: &str) -> Option<String> {
        let file_key = Self::file_key(key);
        let mut index = self.index.lock().expect("cache lock");
        let entry = index.entries.get_mut(&file_key)?;
        if entry.is_expired() {
            return None;
        }
        entry.last_accessed = std::time::Instant::now();
        fs::read_to_string(&entry.path).ok()
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let file_key = Self::file_key(key);
        let mut index = self.index.lock().expect("cache lock");

        if index.entries.len() >= self.max_entries && !index.entries.contains_key(&file_key) {
            Self::evict_lru(&mut index);
        }

        let path = self.cache_dir.join(format!("{file_key}.vec"));
        if let Err(e) = fs::write(&path, &value) {
            tracing::warn!("failed to write cache file {}: {e}", path.display());
            return;
        }
        index.entries.insert(
            file_key,
            DiskEntry {
                path,
                cached_at: SystemTime::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
                last_accessed: std::time::Instant::now(),
            },
        );
    }

    async fn delete(&self, key: &str) {
        let file_key = Self::file_key(key);
        let mut index = self.index.lock().expect("cache lock");
        if let Some(entry) = index.entries.remove(&file_key) {
            let _ = fs::remove_file(&entry.path);
        }
    }
}

// ── Cache-through retrieval ─────────────────────────────────────────────────

/// Fetches embedding vectors through the cache.
///
/// Cache keys are namespaced (`embedding:{text}`) so vectors never collide
/// with unrelated cached data; values are JSON float arrays. A miss triggers
/// exactly one upstream call and the result is cached before it is returned.
/// Concurrent misses for the same text may each call upstream — the last
/// write wins and both callers get identical vectors.
pub struct EmbeddingRetriever {
    embedder: Arc<dyn Embedder>,
    cache: Arc<dyn VectorCache>,
    ttl: Option<Duration>,
}

impl EmbeddingRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, cache: Arc<dyn VectorCache>) -> Self {
        Self {
            embedder,
            cache,
            ttl: None,
        }
    }

    /// Cache entries written by this retriever expire after `ttl`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// The embedding vector for `text`, from cache when possible.
    pub async fn retrieve(&self, text: &str) -> Result<Vec<f32>> {
        let key = format!("embedding:{text}");

        if let Some(raw) = self.cache.get(&key).await {
            match serde_json::from_str(&raw) {
                Ok(vector) => return Ok(vector),
                Err(_) => {
                    // Unreadable entry: drop it and re-embed.
                    self.cache.delete(&key).await;
                }
            }
        }

        let vector = self.embedder.embed(text).await?;
        let encoded = serde_json::to_string(&vector).context("failed to encode vector")?;
        self.cache.set(&key, encoded, self.ttl).await;
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Embedder that counts upstream calls and returns a fixed vector per text.
    pub(crate) struct CountingEmbedder {
        pub calls: AtomicU32,
        pub table: Vec<(&'static str, Vec<f32>)>,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.table
                .iter()
                .find(|(t, _)| *t == text)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| anyhow::anyhow!("no embedding for {text}"))
        }
    }

    #[tokio::test]
    async fn in_memory_roundtrip_and_delete() {
        let cache = InMemoryCache::new();
        cache.set("k", "v".into(), None).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        cache.delete("k").await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn in_memory_ttl_expires() {
        let cache = InMemoryCache::new();
        cache
            .set("k", "v".into(), Some(Duration::from_secs(60)))
            .await;
        assert!(cache.get("k").await.is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), Duration::from_secs(3600)).unwrap();

        cache.set("embedding:email", "[0.5,0.5]".into(), None).await;
        assert_eq!(
            cache.get("embedding:email").await.as_deref(),
            Some("[0.5,0.5]")
        );

        cache.delete("embedding:email").await;
        assert!(cache.get("embedding:email").await.is_none());
    }

    #[tokio::test]
    async fn disk_zero_ttl_is_immediately_expired() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), Duration::from_secs(0)).unwrap();
        cache.set("k", "v".into(), None).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn disk_reindexes_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache =
                DiskCache::new(dir.path().to_path_buf(), Duration::from_secs(3600)).unwrap();
            cache.set("k", "persisted".into(), None).await;
        }
        let cache = DiskCache::new(dir.path().to_path_buf(), Duration::from_secs(3600)).unwrap();
        assert_eq!(cache.get("k").await.as_deref(), Some("persisted"));
    }

    #[tokio::test]
    async fn disk_lru_eviction_drops_least_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), Duration::from_secs(3600))
            .unwrap()
            .with_max_entries(3);

        cache.set("a", "1".into(), None).await;
        cache.set("b", "2".into(), None).await;
        cache.set("c", "3".into(), None).await;
        assert_eq!(cache.len(), 3);

        // Touch b and c so a becomes the LRU entry.
        let _ = cache.get("b").await;
        let _ = cache.get("c").await;

        cache.set("d", "4".into(), None).await;
        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("d").await.is_some());
    }

    #[tokio::test]
    async fn disk_evicts_expired_before_live_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), Duration::from_secs(3600))
            .unwrap()
            .with_max_entries(3);

        cache
            .set("stale", "old".into(), Some(Duration::from_secs(0)))
            .await;
        cache.set("b", "2".into(), None).await;
        cache.set("c", "3".into(), None).await;

        cache.set("d", "4".into(), None).await;
        assert!(cache.get("stale").await.is_none());
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("c").await.is_some());
        assert!(cache.get("d").await.is_some());
    }

    #[tokio::test]
    async fn retriever_caches_misses_once() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicU32::new(0),
            table: vec![("email", vec![1.0, 0.0])],
        });
        let cache = Arc::new(InMemoryCache::new());
        let retriever = EmbeddingRetriever::new(embedder.clone(), cache.clone());

        let first = retriever.retrieve("email").await.unwrap();
        let second = retriever.retrieve("email").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1, "hit must not call upstream");
        assert!(cache.get("embedding:email").await.is_some(), "namespaced key written");
    }

    #[tokio::test]
    async fn retriever_recovers_from_corrupt_entry() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicU32::new(0),
            table: vec![("email", vec![1.0, 0.0])],
        });
        let cache = Arc::new(InMemoryCache::new());
        cache
            .set("embedding:email", "not json".into(), None)
            .await;

        let retriever = EmbeddingRetriever::new(embedder.clone(), cache.clone());
        let vector = retriever.retrieve("email").await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retriever_propagates_upstream_failure() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicU32::new(0),
            table: vec![],
        });
        let cache = Arc::new(InMemoryCache::new());
        let retriever = EmbeddingRetriever::new(embedder, cache);
        assert!(retriever.retrieve("unknown").await.is_err());
    }
}
