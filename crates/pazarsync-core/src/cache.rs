//! Response caching for idempotent marketplace reads.
//!
//! [`ResponseCache`] sits in front of a pluggable [`CacheBackend`]. Only
//! successful GET results are stored. Backend failures are logged and treated
//! as misses so a broken cache never fails a request.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::fs;
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::error::CacheError;
use crate::transport::{ApiResult, HttpMethod};
use crate::BoxFuture;

/// TTL for product and single-category lookups.
pub const PRODUCT_TTL: Duration = Duration::from_secs(300);
/// TTL for full category trees.
pub const CATEGORY_TREE_TTL: Duration = Duration::from_secs(86_400);

/// TTLs adapters apply to their cacheable lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub product: Duration,
    pub category_tree: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            product: PRODUCT_TTL,
            category_tree: CATEGORY_TREE_TTL,
        }
    }
}

/// Defines how a single request interacts with the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise, fetch from the network and write the response to the cache.
    #[default]
    Use,
    /// Always fetch from the network and write the new response to the cache.
    Refresh,
    /// Always fetch from the network and do not read from or write to the cache.
    Bypass,
}

impl CacheMode {
    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn writes(self) -> bool {
        matches!(self, Self::Use | Self::Refresh)
    }
}

/// Storage seam for cached response bytes.
pub trait CacheBackend: Send + Sync {
    /// Returns the stored bytes, or `None` when missing or expired.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>>;

    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Removes every expired entry and returns how many were dropped.
    fn purge_expired(&self) -> BoxFuture<'_, Result<usize, CacheError>>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: OffsetDateTime,
    hits: u64,
}

/// Process-local backend. Expired entries are evicted when read.
#[derive(Debug)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Times the entry has been served since it was written.
    pub fn hits(&self, key: &str) -> Option<u64> {
        self.entries.lock().get(key).map(|entry| entry.hits)
    }

    fn lookup(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>> {
        let value = self.lookup(key);
        Box::pin(async move { Ok(value) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        let expires_at = self.clock.now() + ttl;
        self.entries.lock().insert(
            key.to_owned(),
            MemoryEntry {
                value,
                expires_at,
                hits: 0,
            },
        );
        Box::pin(async { Ok(()) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        self.entries.lock().remove(key);
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        self.entries.lock().clear();
        Box::pin(async { Ok(()) })
    }

    fn purge_expired(&self) -> BoxFuture<'_, Result<usize, CacheError>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - entries.len();
        Box::pin(async move { Ok(purged) })
    }
}

/// Whole seconds covering `ttl`; a partial second counts as a full one.
fn ttl_seconds(ttl: Duration) -> i64 {
    let seconds = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    i64::try_from(seconds).unwrap_or(i64::MAX)
}

/// On-disk record: the original key is kept for inspection.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    expires_at: i64,
    payload: String,
}

/// Directory-backed cache. Each entry is one JSON file named by the SHA-256
/// of its key.
#[derive(Debug)]
pub struct FileCacheBackend {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileCacheBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(dir, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    async fn read_entry(path: &Path) -> Result<Option<StoredEntry>, CacheError> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn remove_if_present(path: &Path) -> Result<(), CacheError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(error) => return Err(error.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl CacheBackend for FileCacheBackend {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>> {
        Box::pin(async move {
            let path = self.entry_path(key);
            let Some(stored) = Self::read_entry(&path).await? else {
                return Ok(None);
            };
            if stored.expires_at <= self.clock.now_unix() {
                Self::remove_if_present(&path).await?;
                return Ok(None);
            }
            let payload = STANDARD
                .decode(stored.payload)
                .map_err(|e| CacheError::Backend(format!("corrupt cache entry: {e}")))?;
            Ok(Some(payload))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            fs::create_dir_all(&self.dir).await?;
            let stored = StoredEntry {
                key: key.to_owned(),
                expires_at: self.clock.now_unix() + ttl_seconds(ttl),
                payload: STANDARD.encode(value),
            };
            let path = self.entry_path(key);
            let staging = path.with_extension("tmp");
            fs::write(&staging, serde_json::to_vec(&stored)?).await?;
            fs::rename(&staging, &path).await?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move { Self::remove_if_present(&self.entry_path(key)).await })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            for path in self.entry_files().await? {
                Self::remove_if_present(&path).await?;
            }
            Ok(())
        })
    }

    fn purge_expired(&self) -> BoxFuture<'_, Result<usize, CacheError>> {
        Box::pin(async move {
            let now = self.clock.now_unix();
            let mut purged = 0;
            for path in self.entry_files().await? {
                let expired = match Self::read_entry(&path).await {
                    Ok(Some(stored)) => stored.expires_at <= now,
                    Ok(None) => false,
                    // Unreadable entries are dropped as well.
                    Err(_) => true,
                };
                if expired {
                    Self::remove_if_present(&path).await?;
                    purged += 1;
                }
            }
            Ok(purged)
        })
    }
}

/// Hit/miss counters for one [`ResponseCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

/// Typed cache of [`ApiResult`]s keyed by request identity.
#[derive(Clone)]
pub struct ResponseCache {
    backend: Arc<dyn CacheBackend>,
    stats: Arc<Mutex<CacheStats>>,
}

impl ResponseCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            stats: Arc::new(Mutex::new(CacheStats::default())),
        }
    }

    /// In-memory cache expiring entries on `clock`.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new(clock)))
    }

    /// Stable key for a request: SHA-256 over method, URL and sorted params.
    pub fn cache_key(method: HttpMethod, url: &str, params: &BTreeMap<String, String>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(url.as_bytes());
        for (name, value) in params {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<ApiResult> {
        let cached = match self.backend.get(key).await {
            Ok(cached) => cached,
            Err(error) => {
                warn!(%error, key, "cache read failed, treating as miss");
                self.stats.lock().errors += 1;
                None
            }
        };

        let decoded = cached.and_then(|bytes| match serde_json::from_slice::<ApiResult>(&bytes) {
            Ok(result) => Some(result),
            Err(error) => {
                warn!(%error, key, "cached entry is not a valid result, treating as miss");
                self.stats.lock().errors += 1;
                None
            }
        });

        let mut stats = self.stats.lock();
        if decoded.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        decoded
    }

    /// Stores a successful result; failed results are ignored.
    pub async fn set(&self, key: &str, result: &ApiResult, ttl: Duration) {
        if !result.success || ttl.is_zero() {
            return;
        }
        let bytes = match serde_json::to_vec(result) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, key, "cache serialization failed");
                self.stats.lock().errors += 1;
                return;
            }
        };
        match self.backend.set(key, bytes, ttl).await {
            Ok(()) => self.stats.lock().writes += 1,
            Err(error) => {
                warn!(%error, key, "cache write failed");
                self.stats.lock().errors += 1;
            }
        }
    }

    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.backend.delete(key).await
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.backend.clear().await
    }

    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.backend.purge_expired().await
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::HttpResponse;

    fn ok_result(body: &str) -> ApiResult {
        ApiResult::from_response(HttpResponse::ok_json(body))
    }

    #[test]
    fn cache_key_is_stable_and_param_sensitive() {
        let mut params = BTreeMap::new();
        params.insert(String::from("page"), String::from("0"));
        params.insert(String::from("size"), String::from("50"));

        let first = ResponseCache::cache_key(HttpMethod::Get, "https://a.test/p", &params);
        let second = ResponseCache::cache_key(HttpMethod::Get, "https://a.test/p", &params);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        params.insert(String::from("page"), String::from("1"));
        let third = ResponseCache::cache_key(HttpMethod::Get, "https://a.test/p", &params);
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn memory_entries_expire_lazily_on_read() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let backend = MemoryCacheBackend::new(clock.clone());

        backend
            .set("k", b"v".to_vec(), Duration::from_secs(300))
            .await
            .expect("set");
        assert_eq!(backend.get("k").await.expect("get"), Some(b"v".to_vec()));
        assert_eq!(backend.hits("k"), Some(1));

        clock.advance(Duration::from_secs(301));
        assert_eq!(backend.get("k").await.expect("get"), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn memory_purge_drops_only_expired_entries() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let backend = MemoryCacheBackend::new(clock.clone());
        backend
            .set("short", vec![1], Duration::from_secs(10))
            .await
            .expect("set");
        backend
            .set("long", vec![2], Duration::from_secs(1000))
            .await
            .expect("set");

        clock.advance(Duration::from_secs(11));
        assert_eq!(backend.purge_expired().await.expect("purge"), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn file_backend_persists_and_expires() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let backend = FileCacheBackend::with_clock(dir.path().join("cache"), clock.clone());

        backend
            .set("GET /categories", b"tree".to_vec(), Duration::from_secs(60))
            .await
            .expect("set");
        assert_eq!(
            backend.get("GET /categories").await.expect("get"),
            Some(b"tree".to_vec())
        );

        clock.advance(Duration::from_secs(60));
        assert_eq!(backend.get("GET /categories").await.expect("get"), None);
    }

    #[tokio::test]
    async fn file_backend_rounds_partial_seconds_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let backend = FileCacheBackend::with_clock(dir.path(), clock.clone());

        backend
            .set("GET /orders", b"[]".to_vec(), Duration::from_millis(500))
            .await
            .expect("set");
        assert_eq!(backend.get("GET /orders").await.expect("get"), Some(b"[]".to_vec()));

        clock.advance(Duration::from_secs(1));
        assert_eq!(backend.get("GET /orders").await.expect("get"), None);
    }

    #[tokio::test]
    async fn file_backend_clear_removes_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileCacheBackend::new(dir.path());
        backend
            .set("a", vec![1], Duration::from_secs(60))
            .await
            .expect("set");
        backend
            .set("b", vec![2], Duration::from_secs(60))
            .await
            .expect("set");

        backend.clear().await.expect("clear");
        assert_eq!(backend.get("a").await.expect("get"), None);
        assert_eq!(backend.get("b").await.expect("get"), None);
    }

    #[tokio::test]
    async fn response_cache_stores_only_successful_results() {
        let cache = ResponseCache::in_memory(Arc::new(SystemClock));
        let failed = ApiResult::from_response(HttpResponse::new(500, "oops"));

        cache.set("bad", &failed, PRODUCT_TTL).await;
        assert!(cache.get("bad").await.is_none());

        let ok = ok_result(r#"{"items":[]}"#);
        cache.set("good", &ok, PRODUCT_TTL).await;
        assert_eq!(cache.get("good").await, Some(ok));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }

    struct BrokenBackend;

    impl CacheBackend for BrokenBackend {
        fn get<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>> {
            Box::pin(async { Err(CacheError::Backend(String::from("down"))) })
        }

        fn set<'a>(&'a self, _: &'a str, _: Vec<u8>, _: Duration) -> BoxFuture<'a, Result<(), CacheError>> {
            Box::pin(async { Err(CacheError::Backend(String::from("down"))) })
        }

        fn delete<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
            Box::pin(async { Ok(()) })
        }

        fn clear(&self) -> BoxFuture<'_, Result<(), CacheError>> {
            Box::pin(async { Ok(()) })
        }

        fn purge_expired(&self) -> BoxFuture<'_, Result<usize, CacheError>> {
            Box::pin(async { Ok(0) })
        }
    }

    #[tokio::test]
    async fn backend_failures_degrade_to_misses() {
        let cache = ResponseCache::new(Arc::new(BrokenBackend));

        cache.set("k", &ok_result("{}"), PRODUCT_TTL).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.stats().errors, 2);
    }

    #[test]
    fn cache_modes_control_reads_and_writes() {
        assert!(CacheMode::Use.reads() && CacheMode::Use.writes());
        assert!(!CacheMode::Refresh.reads() && CacheMode::Refresh.writes());
        assert!(!CacheMode::Bypass.reads() && !CacheMode::Bypass.writes());
        assert_eq!(CacheMode::default(), CacheMode::Use);
    }
}
