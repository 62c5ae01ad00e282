//! Durable [`CacheStore`] on SQLite, so generations survive restarts.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use http::Method;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::{Result, SwError};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS caches (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS entries (
        cache TEXT NOT NULL,
        method TEXT NOT NULL,
        url TEXT NOT NULL,
        status INTEGER NOT NULL,
        headers TEXT NOT NULL,
        body BLOB NOT NULL,
        cached_at INTEGER NOT NULL,
        stored_seq INTEGER NOT NULL,
        PRIMARY KEY (cache, method, url)
    );
    CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(method, url);
";

const ENTRY_COLUMNS: &str = "e.method, e.url, e.status, e.headers, e.body, e.cached_at";

/// SQLite-backed cache store.
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    /// Open (or create) a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!(path = ?path.as_ref(), "Opening cache store");
        Self::init(Connection::open(path)?)
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn ensure_cache(conn: &Connection, name: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO caches (name) VALUES (?1)",
        params![name],
    )?;
    Ok(())
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<(String, String, u16, String, Vec<u8>, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_entry(raw: (String, String, u16, String, Vec<u8>, i64)) -> Result<CacheEntry> {
    let (method, url, status, headers, body, cached_at) = raw;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| SwError::Cache(format!("bad stored method '{method}': {e}")))?;
    let url = Url::parse(&url).map_err(|e| SwError::Cache(format!("bad stored url '{url}': {e}")))?;
    let headers: Vec<(String, String)> = serde_json::from_str(&headers)?;

    Ok(CacheEntry {
        url,
        method,
        status,
        headers,
        body: Bytes::from(body),
        cached_at: cached_at.max(0) as u64,
    })
}

impl CacheStore for SqliteCacheStore {
    fn open(&self, name: &str) -> Result<()> {
        ensure_cache(&self.conn(), name)
    }

    fn has(&self, name: &str) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM caches WHERE name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn delete(&self, name: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE cache = ?1", params![name])?;
        let removed = tx.execute("DELETE FROM caches WHERE name = ?1", params![name])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY seq")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn put(&self, name: &str, entry: CacheEntry) -> Result<()> {
        let headers = serde_json::to_string(&entry.headers)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        ensure_cache(&tx, name)?;
        tx.execute(
            "INSERT OR REPLACE INTO entries
                (cache, method, url, status, headers, body, cached_at, stored_seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7,
                (SELECT COALESCE(MAX(stored_seq), 0) + 1 FROM entries))",
            params![
                name,
                entry.method.as_str(),
                entry.url.as_str(),
                entry.status,
                headers,
                entry.body.as_ref(),
                entry.cached_at as i64,
            ],
        )?;
        tx.commit()?;
        debug!(cache = name, url = %entry.url, "Stored entry");
        Ok(())
    }

    fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let raw = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries e
                     WHERE e.cache = ?1 AND e.method = ?2 AND e.url = ?3"
                ),
                params![name, key.method.as_str(), key.url],
                row_to_entry,
            )
            .optional()?;
        raw.map(decode_entry).transpose()
    }

    fn match_any(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let raw = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries e
                     JOIN caches c ON c.name = e.cache
                     WHERE e.method = ?1 AND e.url = ?2
                     ORDER BY c.seq LIMIT 1"
                ),
                params![key.method.as_str(), key.url],
                row_to_entry,
            )
            .optional()?;
        raw.map(decode_entry).transpose()
    }

    fn entries_in(&self, name: &str) -> Result<Vec<CacheEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries e WHERE e.cache = ?1 ORDER BY e.stored_seq"
        ))?;
        let rows = stmt
            .query_map(params![name], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode_entry).collect()
    }

    fn trim(&self, name: &str, max_entries: usize) -> Result<usize> {
        let evicted = self.conn().execute(
            "DELETE FROM entries WHERE cache = ?1 AND stored_seq NOT IN (
                SELECT stored_seq FROM entries WHERE cache = ?1
                ORDER BY stored_seq DESC LIMIT ?2
            )",
            params![name, max_entries as i64],
        )?;
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use ssm_net::{Request, Response};

    fn entry(url: &str, body: &str) -> CacheEntry {
        let request = Request::get(Url::parse(url).unwrap());
        let response = Response::new(request.url.clone(), StatusCode::OK, body.to_string())
            .with_header(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static("text/html"),
            );
        CacheEntry::from_response(&request, &response)
    }

    fn key(url: &str) -> CacheKey {
        CacheKey::get(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_put_and_match() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let stored = entry("https://example.com/offline/", "<h1>offline</h1>");
        store.put("au-it-dept-v1", stored.clone()).unwrap();

        let found = store
            .match_in("au-it-dept-v1", &key("https://example.com/offline/"))
            .unwrap()
            .unwrap();
        assert_eq!(found, stored);
        assert!(store
            .match_in("au-it-dept-v1", &key("https://example.com/other/"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_keys_and_delete() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.open("old-v0").unwrap();
        store.put("au-it-dept-v1", entry("https://example.com/a", "a")).unwrap();
        store.open("au-it-dept-dynamic-v1").unwrap();

        assert_eq!(
            store.keys().unwrap(),
            vec!["old-v0", "au-it-dept-v1", "au-it-dept-dynamic-v1"]
        );
        assert!(store.has("old-v0").unwrap());
        assert!(store.delete("au-it-dept-v1").unwrap());
        assert!(!store.delete("au-it-dept-v1").unwrap());
        assert!(store.match_any(&key("https://example.com/a")).unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites_and_trim() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        store.put("dyn", entry("https://example.com/1", "1")).unwrap();
        store.put("dyn", entry("https://example.com/2", "2")).unwrap();
        store.put("dyn", entry("https://example.com/1", "1b")).unwrap();

        let entries = store.entries_in("dyn").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].body, Bytes::from("1b"));

        assert_eq!(store.trim("dyn", 1).unwrap(), 1);
        let remaining = store.entries_in("dyn").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].url.path(), "/1");
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches.db");

        {
            let store = SqliteCacheStore::open(&path).unwrap();
            store
                .put("au-it-dept-dynamic-v1", entry("https://example.com/results/42", "A+"))
                .unwrap();
        }

        let store = SqliteCacheStore::open(&path).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["au-it-dept-dynamic-v1"]);
        let found = store
            .match_any(&key("https://example.com/results/42"))
            .unwrap()
            .unwrap();
        assert_eq!(found.body, Bytes::from("A+"));
    }
}
