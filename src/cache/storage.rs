//! Named cache generations holding stored responses.
//!
//! A generation is a flat map from cache key to [`Response`]. Writing into a
//! generation that does not exist fails with [`StorageError::MissingGeneration`];
//! generations are only created by [`CacheStorage::open`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::request::Response;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cache generation {0} does not exist")]
    MissingGeneration(String),
    #[error("{0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StorageError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StorageError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

type StorageResult<T> = std::result::Result<T, StorageError>;

pub trait CacheStorage: Send + Sync {
    /// Names of every stored generation.
    fn generations(&self) -> StorageResult<Vec<String>>;

    /// Create the generation if it does not exist.
    fn open(&self, generation: &str) -> StorageResult<()>;

    /// Destroy a generation and everything in it. Returns whether it existed.
    fn delete(&self, generation: &str) -> StorageResult<bool>;

    fn get(&self, generation: &str, key: &str) -> StorageResult<Option<Response>>;

    /// Store a response, replacing any previous entry under `key`.
    fn put(&self, generation: &str, key: &str, response: &Response) -> StorageResult<()>;

    /// Cache keys stored in a generation.
    fn keys(&self, generation: &str) -> StorageResult<Vec<String>>;

    /// Sum of stored body sizes in a generation.
    fn size(&self, generation: &str) -> StorageResult<u64>;
}

// ============================================================================
// In-memory storage
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    generations: Mutex<BTreeMap<String, BTreeMap<String, Response>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, BTreeMap<String, BTreeMap<String, Response>>>> {
        self.generations
            .lock()
            .map_err(|_| StorageError::Backend("cache lock poisoned".to_string()))
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn generations(&self) -> StorageResult<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn open(&self, generation: &str) -> StorageResult<()> {
        self.lock()?.entry(generation.to_string()).or_default();
        Ok(())
    }

    fn delete(&self, generation: &str) -> StorageResult<bool> {
        Ok(self.lock()?.remove(generation).is_some())
    }

    fn get(&self, generation: &str, key: &str) -> StorageResult<Option<Response>> {
        Ok(self
            .lock()?
            .get(generation)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn put(&self, generation: &str, key: &str, response: &Response) -> StorageResult<()> {
        let mut generations = self.lock()?;
        let entries = generations
            .get_mut(generation)
            .ok_or_else(|| StorageError::MissingGeneration(generation.to_string()))?;
        entries.insert(key.to_string(), response.clone());
        Ok(())
    }

    fn keys(&self, generation: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .lock()?
            .get(generation)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn size(&self, generation: &str) -> StorageResult<u64> {
        Ok(self
            .lock()?
            .get(generation)
            .map(|entries| entries.values().map(Response::body_len).sum())
            .unwrap_or(0))
    }
}

// ============================================================================
// SQLite storage
// ============================================================================

/// Status and headers, stored next to the raw body.
#[derive(Debug, Serialize, Deserialize)]
struct ResponseMeta {
    status: u16,
    headers: Vec<(String, String)>,
}

/// SQLite-backed cache storage. Bodies are stored as raw blobs, response
/// metadata as MessagePack.
pub struct SqliteCacheStorage {
    db: Mutex<Connection>,
}

impl SqliteCacheStorage {
    pub fn new(db_path: &str) -> rusqlite::Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[CacheStorage] Opened cache database at {}", db_path);
        Ok(Self { db: Mutex::new(db) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_generations (
                name TEXT PRIMARY KEY,
                created_at INTEGER DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS cache_entries (
                generation TEXT NOT NULL,
                cache_key TEXT NOT NULL,
                meta BLOB NOT NULL,
                body BLOB NOT NULL,
                body_len INTEGER NOT NULL,
                PRIMARY KEY (generation, cache_key)
            );
            "#,
        )
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| StorageError::Backend("database lock poisoned".to_string()))
    }

    fn exists(conn: &Connection, generation: &str) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT 1 FROM cache_generations WHERE name = ?",
            params![generation],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
    }
}

impl CacheStorage for SqliteCacheStorage {
    fn generations(&self) -> StorageResult<Vec<String>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT name FROM cache_generations ORDER BY created_at, name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn open(&self, generation: &str) -> StorageResult<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
            params![generation],
        )?;
        Ok(())
    }

    fn delete(&self, generation: &str) -> StorageResult<bool> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM cache_entries WHERE generation = ?",
            params![generation],
        )?;
        let removed = tx.execute(
            "DELETE FROM cache_generations WHERE name = ?",
            params![generation],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn get(&self, generation: &str, key: &str) -> StorageResult<Option<Response>> {
        let db = self.conn()?;
        let row: Option<(Vec<u8>, Vec<u8>)> = db
            .query_row(
                "SELECT meta, body FROM cache_entries WHERE generation = ? AND cache_key = ?",
                params![generation, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((meta, body)) = row else {
            return Ok(None);
        };
        let meta: ResponseMeta = rmp_serde::from_slice(&meta)?;
        Ok(Some(Response {
            status: meta.status,
            headers: meta.headers,
            body: body.into(),
        }))
    }

    fn put(&self, generation: &str, key: &str, response: &Response) -> StorageResult<()> {
        let meta = rmp_serde::to_vec(&ResponseMeta {
            status: response.status,
            headers: response.headers.clone(),
        })?;

        let mut db = self.conn()?;
        let tx = db.transaction()?;
        if !Self::exists(&tx, generation)? {
            return Err(StorageError::MissingGeneration(generation.to_string()));
        }
        tx.execute(
            "INSERT INTO cache_entries (generation, cache_key, meta, body, body_len)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(generation, cache_key) DO UPDATE SET
                meta = excluded.meta, body = excluded.body, body_len = excluded.body_len",
            params![
                generation,
                key,
                meta,
                &response.body[..],
                response.body.len() as i64
            ],
        )?;
        tx.commit()?;
        debug!("[CacheStorage] Stored {} in {}", key, generation);
        Ok(())
    }

    fn keys(&self, generation: &str) -> StorageResult<Vec<String>> {
        let db = self.conn()?;
        let mut stmt =
            db.prepare("SELECT cache_key FROM cache_entries WHERE generation = ? ORDER BY cache_key")?;
        let keys = stmt
            .query_map(params![generation], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    fn size(&self, generation: &str) -> StorageResult<u64> {
        let db = self.conn()?;
        let total: i64 = db.query_row(
            "SELECT COALESCE(SUM(body_len), 0) FROM cache_entries WHERE generation = ?",
            params![generation],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn CacheStorage) {
        storage.open("road-monitor-static-v1").unwrap();
        storage.open("road-monitor-static-v1").unwrap();

        let response = Response::ok("<html></html>").with_header("Content-Type", "text/html");
        storage
            .put("road-monitor-static-v1", "https://field.example/", &response)
            .unwrap();

        assert_eq!(
            storage
                .get("road-monitor-static-v1", "https://field.example/")
                .unwrap(),
            Some(response)
        );
        assert_eq!(storage.size("road-monitor-static-v1").unwrap(), 13);
        assert_eq!(
            storage.keys("road-monitor-static-v1").unwrap(),
            vec!["https://field.example/".to_string()]
        );

        assert!(matches!(
            storage.put("missing", "k", &Response::ok("x")),
            Err(StorageError::MissingGeneration(_))
        ));

        assert!(storage.delete("road-monitor-static-v1").unwrap());
        assert!(!storage.delete("road-monitor-static-v1").unwrap());
        assert!(storage.generations().unwrap().is_empty());
        assert_eq!(storage.size("road-monitor-static-v1").unwrap(), 0);
    }

    #[test]
    fn test_memory_storage() {
        exercise(&MemoryCacheStorage::new());
    }

    #[test]
    fn test_sqlite_storage() {
        exercise(&SqliteCacheStorage::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_delete_drops_entries() {
        let storage = SqliteCacheStorage::in_memory().unwrap();
        storage.open("old").unwrap();
        storage.put("old", "a", &Response::ok("abc")).unwrap();
        storage.delete("old").unwrap();
        storage.open("old").unwrap();
        assert!(storage.get("old", "a").unwrap().is_none());
    }
}
