//! Cache generations and the stores that hold them.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use lru::LruCache;
use ssm_net::{Request, Response, ResponseType};
use url::Url;

use crate::{Result, SwError};

/// Lookup key of a cached entry: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: Method,
    pub url: String,
}

impl CacheKey {
    /// Build a key for a method and URL.
    pub fn new(method: Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method,
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Key for a request.
    pub fn from_request(request: &Request) -> Self {
        Self::new(request.method.clone(), &request.url)
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Request URL (fragment stripped).
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, duplicates kept.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for storage under the request's key.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let mut url = request.url.clone();
        url.set_fragment(None);

        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url,
            method: request.method.clone(),
            status: response.status,
            headers,
            body: response.body.clone(),
            cached_at: ssm_common::unix_millis(),
        }
    }

    /// Key this entry is stored under.
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.method.clone(), &self.url)
    }

    /// Rebuild a response from the stored snapshot.
    pub fn to_response(&self) -> Result<Response> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| SwError::Cache(format!("bad stored header '{name}': {e}")))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| SwError::Cache(format!("bad stored header value: {e}")))?;
            headers.append(name, value);
        }

        Ok(Response {
            url: self.url.clone(),
            status: self.status,
            headers,
            body: self.body.clone(),
            response_type: ResponseType::Basic,
            redirected: false,
        })
    }
}

/// A named store of request → response pairs, shared by every controller
/// version of an origin.
///
/// Each call is atomic on its own; no cross-call transactions are offered.
pub trait CacheStore: Send + Sync {
    /// Open a generation, creating it if it doesn't exist.
    fn open(&self, name: &str) -> Result<()>;

    /// Check if a generation exists.
    fn has(&self, name: &str) -> Result<bool>;

    /// Delete a generation and all its entries.
    fn delete(&self, name: &str) -> Result<bool>;

    /// All generation names, in creation order.
    fn keys(&self) -> Result<Vec<String>>;

    /// Store an entry, replacing any entry with the same key. Opens the
    /// generation if needed.
    fn put(&self, name: &str, entry: CacheEntry) -> Result<()>;

    /// Look up a key in one generation.
    fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// All entries of a generation, oldest stored first.
    fn entries_in(&self, name: &str) -> Result<Vec<CacheEntry>>;

    /// Evict the oldest-stored entries until at most `max_entries` remain.
    /// Returns the number evicted.
    fn trim(&self, name: &str, max_entries: usize) -> Result<usize>;

    /// Look up a key across every generation, in creation order.
    fn match_any(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        for name in self.keys()? {
            if let Some(entry) = self.match_in(&name, key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

// ==================== Cache ====================

/// One in-memory generation. Entries are ordered by store time.
#[derive(Debug)]
pub struct Cache {
    /// Generation name.
    pub name: String,

    entries: LruCache<CacheKey, CacheEntry>,
}

impl Cache {
    /// Create an empty generation.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: LruCache::unbounded(),
        }
    }

    /// Match a key without touching store order.
    pub fn match_request(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.peek(key)
    }

    /// Add or replace an entry; it becomes the newest.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.put(entry.key(), entry);
    }

    /// Delete an entry.
    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.entries.pop(key).is_some()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the generation holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, oldest stored first.
    pub fn entries(&self) -> Vec<&CacheEntry> {
        self.entries.iter().rev().map(|(_, entry)| entry).collect()
    }

    /// Drop oldest entries beyond `max_entries`.
    pub fn trim(&mut self, max_entries: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max_entries {
            if self.entries.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }
}

// ==================== Memory Store ====================

#[derive(Debug, Default)]
struct Generations {
    caches: HashMap<String, Cache>,
    order: Vec<String>,
}

impl Generations {
    fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }
}

/// Process-local [`CacheStore`]; contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    inner: RwLock<Generations>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Generations> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Generations> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheStore for MemoryCacheStore {
    fn open(&self, name: &str) -> Result<()> {
        self.write().open(name);
        Ok(())
    }

    fn has(&self, name: &str) -> Result<bool> {
        Ok(self.read().caches.contains_key(name))
    }

    fn delete(&self, name: &str) -> Result<bool> {
        let mut generations = self.write();
        generations.order.retain(|n| n != name);
        Ok(generations.caches.remove(name).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.read().order.clone())
    }

    fn put(&self, name: &str, entry: CacheEntry) -> Result<()> {
        self.write().open(name).put(entry);
        Ok(())
    }

    fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self
            .read()
            .caches
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned())
    }

    fn entries_in(&self, name: &str) -> Result<Vec<CacheEntry>> {
        Ok(self
            .read()
            .caches
            .get(name)
            .map(|cache| cache.entries().into_iter().cloned().collect())
            .unwrap_or_default())
    }

    fn trim(&self, name: &str, max_entries: usize) -> Result<usize> {
        Ok(self
            .write()
            .caches
            .get_mut(name)
            .map(|cache| cache.trim(max_entries))
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn entry(url: &str, body: &str) -> CacheEntry {
        let request = Request::get(Url::parse(url).unwrap());
        let response = Response::new(request.url.clone(), StatusCode::OK, body.to_string())
            .with_header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("text/css"),
            );
        CacheEntry::from_response(&request, &response)
    }

    #[test]
    fn test_cache_key_strips_fragment() {
        let a = CacheKey::get(&Url::parse("https://example.com/page#top").unwrap());
        let b = CacheKey::get(&Url::parse("https://example.com/page").unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_includes_method() {
        let url = Url::parse("https://example.com/form/").unwrap();
        assert_ne!(CacheKey::get(&url), CacheKey::new(Method::POST, &url));
    }

    #[test]
    fn test_entry_response_round_trip_keeps_headers() {
        let entry = entry("https://example.com/style.css", "body{}");
        let response = entry.to_response().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from("body{}"));
        assert_eq!(response.content_type(), Some("text/css"));
        assert_eq!(response.response_type, ResponseType::Basic);
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("v1");
        cache.put(entry("https://example.com/style.css", "a"));

        let hit = CacheKey::get(&Url::parse("https://example.com/style.css").unwrap());
        let miss = CacheKey::get(&Url::parse("https://example.com/other.css").unwrap());
        assert!(cache.match_request(&hit).is_some());
        assert!(cache.match_request(&miss).is_none());

        assert!(cache.delete(&hit));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_put_overwrites() {
        let mut cache = Cache::new("v1");
        cache.put(entry("https://example.com/a.js", "old"));
        cache.put(entry("https://example.com/a.js", "new"));

        assert_eq!(cache.len(), 1);
        let key = CacheKey::get(&Url::parse("https://example.com/a.js").unwrap());
        assert_eq!(cache.match_request(&key).unwrap().body, Bytes::from("new"));
    }

    #[test]
    fn test_cache_trim_evicts_oldest_stored() {
        let mut cache = Cache::new("dyn");
        cache.put(entry("https://example.com/1", "1"));
        cache.put(entry("https://example.com/2", "2"));
        cache.put(entry("https://example.com/3", "3"));
        // Re-storing /1 makes it the newest.
        cache.put(entry("https://example.com/1", "1b"));

        assert_eq!(cache.trim(2), 1);
        let urls: Vec<_> = cache.entries().iter().map(|e| e.url.path().to_string()).collect();
        assert_eq!(urls, vec!["/3", "/1"]);
    }

    #[test]
    fn test_memory_store_keys_in_creation_order() {
        let store = MemoryCacheStore::new();
        store.open("static-v1").unwrap();
        store.open("dynamic-v1").unwrap();
        store.open("static-v1").unwrap();

        assert_eq!(store.keys().unwrap(), vec!["static-v1", "dynamic-v1"]);
        assert!(store.delete("static-v1").unwrap());
        assert!(!store.delete("static-v1").unwrap());
        assert_eq!(store.keys().unwrap(), vec!["dynamic-v1"]);
    }

    #[test]
    fn test_memory_store_match_any_prefers_older_generation() {
        let store = MemoryCacheStore::new();
        store.put("first", entry("https://example.com/x", "first")).unwrap();
        store.put("second", entry("https://example.com/x", "second")).unwrap();

        let key = CacheKey::get(&Url::parse("https://example.com/x").unwrap());
        let found = store.match_any(&key).unwrap().unwrap();
        assert_eq!(found.body, Bytes::from("first"));
    }

    #[test]
    fn test_memory_store_trim_missing_generation() {
        let store = MemoryCacheStore::new();
        assert_eq!(store.trim("nope", 1).unwrap(), 0);
        assert!(store.entries_in("nope").unwrap().is_empty());
    }
}
